use thiserror::Error;

use crate::connection::expand_alias;
use crate::mode::{OpMode, RecoveryModel};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("'{0}' is not a valid mode. Use /? for help")]
    InvalidMode(String),
    #[error("Mode already set when processing '{0}'")]
    ModeAlreadySet(String),
    #[error("Mode has not been specified when {0} was encountered")]
    NoMode(&'static str),
    #[error("{field} is not valid for {mode}. Use /? for help")]
    NotAllowed {
        field: &'static str,
        mode: &'static str,
    },
    #[error("Unknown argument: '{0}'")]
    UnknownArgument(String),
    #[error("{0} requires a value")]
    MissingValue(&'static str),
    #[error("{0} cannot be empty")]
    EmptyValue(&'static str),
    #[error("Duplicate {0}")]
    Duplicate(&'static str),
    #[error("Cannot specify {flag} when {other} has already been specified")]
    Conflict {
        flag: &'static str,
        other: &'static str,
    },
    #[error("Database '{0}' is already in the list")]
    DuplicateDatabase(String),
    #[error("Backup location has already been set when processing '{0}'")]
    LocationAlreadySet(String),
    #[error("Cannot process '{0}' as integer")]
    InvalidNumber(String),
    #[error("Backup id has already been set when processing '{0}'")]
    BackupIdAlreadySet(String),
    #[error("Backup id cannot be zero")]
    ZeroBackupId,
    #[error("Recovery model already set to {current} when processing '{token}'")]
    RecoveryModelAlreadySet {
        current: RecoveryModel,
        token: String,
    },
}

/// A piece of command state that only some modes accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Selection,
    Connection,
    Location,
    BackupId,
    Verify,
    LogBackup,
    Dismount,
    RecoveryModel,
    Json,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Selection => "/ALL or /DB",
            Field::Connection => "/C",
            Field::Location => "/DIR or /FILE",
            Field::BackupId => "/ID",
            Field::Verify => "/VERIFY",
            Field::LogBackup => "/LOG",
            Field::Dismount => "/DISMOUNT",
            Field::RecoveryModel => "/FULL, /BULK or /SIMPLE",
            Field::Json => "/JSON",
        }
    }
}

/// Fields each mode accepts. Every mutation is checked against this table
/// before it touches any state.
pub fn legal_fields(mode: OpMode) -> &'static [Field] {
    use Field::*;
    match mode {
        OpMode::None => &[],
        OpMode::Help => &[Connection],
        OpMode::List => &[Connection, Json],
        OpMode::Backup => &[Connection, Selection, Location, Verify, LogBackup],
        OpMode::Restore => &[Connection, Selection, Location, BackupId, Dismount],
        OpMode::ChangeRecoveryMode => &[Connection, Selection, RecoveryModel],
        OpMode::BackupInfo => &[Connection, Selection, Location, Json],
        OpMode::DbInfo => &[Connection, Selection, Json],
        OpMode::PurgeBackupHistory | OpMode::TakeOffline | OpMode::TakeOnline => {
            &[Connection, Selection]
        }
    }
}

/// One state change requested by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SelectAll,
    SelectListed,
    AddDatabase(String),
    Connection(String),
    Location { path: String, is_directory: bool },
    BackupId(String),
    Verify,
    LogBackup,
    Dismount,
    Recovery { model: RecoveryModel, token: String },
    Json,
}

impl Action {
    pub fn field(&self) -> Field {
        match self {
            Action::SelectAll | Action::SelectListed | Action::AddDatabase(_) => Field::Selection,
            Action::Connection(_) => Field::Connection,
            Action::Location { .. } => Field::Location,
            Action::BackupId(_) => Field::BackupId,
            Action::Verify => Field::Verify,
            Action::LogBackup => Field::LogBackup,
            Action::Dismount => Field::Dismount,
            Action::Recovery { .. } => Field::RecoveryModel,
            Action::Json => Field::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLocation {
    pub path: String,
    pub is_directory: bool,
}

/// Accumulated invocation state. Built by the scanner, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommand {
    mode: OpMode,
    recovery_model: Option<RecoveryModel>,
    use_all_databases: Option<bool>,
    databases: Vec<String>,
    connection_string: Option<String>,
    location: Option<BackupLocation>,
    backup_id: i32,
    verify: bool,
    log_backup: bool,
    dismount: bool,
    json: bool,
}

/// Database names compare case-insensitively everywhere.
pub fn names_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

impl ParsedCommand {
    pub fn mode(&self) -> OpMode {
        self.mode
    }

    pub fn recovery_model(&self) -> Option<RecoveryModel> {
        self.recovery_model
    }

    /// `Some(true)`: all databases except `databases`; `Some(false)`: only
    /// `databases`; `None`: no selection given.
    pub fn use_all_databases(&self) -> Option<bool> {
        self.use_all_databases
    }

    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    pub fn location(&self) -> Option<&BackupLocation> {
        self.location.as_ref()
    }

    /// 0 when not given on the command line.
    pub fn backup_id(&self) -> i32 {
        self.backup_id
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn log_backup(&self) -> bool {
        self.log_backup
    }

    pub fn dismount(&self) -> bool {
        self.dismount
    }

    pub fn json(&self) -> bool {
        self.json
    }

    pub fn set_mode(&mut self, token: &str) -> Result<(), ParseError> {
        if self.mode != OpMode::None {
            return Err(ParseError::ModeAlreadySet(token.to_string()));
        }
        self.mode =
            OpMode::from_token(token).ok_or_else(|| ParseError::InvalidMode(token.to_string()))?;
        Ok(())
    }

    fn ensure_legal(&self, field: Field) -> Result<(), ParseError> {
        if self.mode == OpMode::None {
            return Err(ParseError::NoMode(field.label()));
        }
        if !legal_fields(self.mode).contains(&field) {
            return Err(ParseError::NotAllowed {
                field: field.label(),
                mode: self.mode.keyword(),
            });
        }
        Ok(())
    }

    pub fn apply(&mut self, action: Action) -> Result<(), ParseError> {
        self.ensure_legal(action.field())?;
        match action {
            Action::SelectAll => self.set_selection(true),
            Action::SelectListed => self.set_selection(false),
            Action::AddDatabase(name) => self.add_database(name),
            Action::Connection(value) => {
                if self.connection_string.is_some() {
                    return Err(ParseError::Duplicate("/C"));
                }
                self.connection_string = Some(expand_alias(&value));
                Ok(())
            }
            Action::Location { path, is_directory } => {
                if path.trim().is_empty() {
                    return Err(ParseError::EmptyValue(if is_directory { "/DIR" } else { "/FILE" }));
                }
                if self.location.is_some() {
                    return Err(ParseError::LocationAlreadySet(path));
                }
                self.location = Some(BackupLocation { path, is_directory });
                Ok(())
            }
            Action::BackupId(raw) => self.set_backup_id(&raw),
            Action::Verify => set_once(&mut self.verify, "/VERIFY"),
            Action::LogBackup => set_once(&mut self.log_backup, "/LOG"),
            Action::Dismount => set_once(&mut self.dismount, "/DISMOUNT"),
            Action::Json => set_once(&mut self.json, "/JSON"),
            Action::Recovery { model, token } => {
                if let Some(current) = self.recovery_model {
                    return Err(ParseError::RecoveryModelAlreadySet { current, token });
                }
                self.recovery_model = Some(model);
                Ok(())
            }
        }
    }

    fn set_selection(&mut self, all: bool) -> Result<(), ParseError> {
        let (flag, other) = if all { ("/ALL", "/DB") } else { ("/DB", "/ALL") };
        match self.use_all_databases {
            None => {
                self.use_all_databases = Some(all);
                Ok(())
            }
            Some(current) if current == all => Err(ParseError::Duplicate(flag)),
            Some(_) => Err(ParseError::Conflict { flag, other }),
        }
    }

    fn add_database(&mut self, name: String) -> Result<(), ParseError> {
        if name.is_empty() {
            return Err(ParseError::EmptyValue("Database name"));
        }
        if self.databases.iter().any(|known| names_match(known, &name)) {
            return Err(ParseError::DuplicateDatabase(name));
        }
        self.databases.push(name);
        Ok(())
    }

    fn set_backup_id(&mut self, raw: &str) -> Result<(), ParseError> {
        let parsed = raw
            .trim()
            .parse::<i32>()
            .map_err(|_| ParseError::InvalidNumber(raw.to_string()))?;
        if self.backup_id != 0 {
            return Err(ParseError::BackupIdAlreadySet(raw.to_string()));
        }
        if parsed == 0 {
            return Err(ParseError::ZeroBackupId);
        }
        self.backup_id = parsed;
        Ok(())
    }
}

fn set_once(flag: &mut bool, label: &'static str) -> Result<(), ParseError> {
    if *flag {
        return Err(ParseError::Duplicate(label));
    }
    *flag = true;
    Ok(())
}
