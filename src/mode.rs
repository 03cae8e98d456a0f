use std::{fmt, str::FromStr};

use serde::Serialize;

/// Every flag token starts with this marker; anything else is a bare word.
pub const FLAG_MARKER: char = '/';

/// Top-level operation selected by the first command line token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpMode {
    #[default]
    None,
    Help,
    List,
    Backup,
    Restore,
    ChangeRecoveryMode,
    BackupInfo,
    DbInfo,
    PurgeBackupHistory,
    TakeOffline,
    TakeOnline,
}

const MODE_TOKENS: &[(&str, OpMode)] = &[
    ("/?", OpMode::Help),
    ("/HELP", OpMode::Help),
    ("/LIST", OpMode::List),
    ("/BACKUP", OpMode::Backup),
    ("/RESTORE", OpMode::Restore),
    ("/MODE", OpMode::ChangeRecoveryMode),
    ("/INFO", OpMode::BackupInfo),
    ("/DBINFO", OpMode::DbInfo),
    ("/PURGE", OpMode::PurgeBackupHistory),
    ("/OFFLINE", OpMode::TakeOffline),
    ("/ONLINE", OpMode::TakeOnline),
];

impl OpMode {
    /// Case-insensitive lookup of a mode keyword such as `/backup`.
    pub fn from_token(token: &str) -> Option<OpMode> {
        let upper = token.trim().to_uppercase();
        MODE_TOKENS
            .iter()
            .find(|(keyword, _)| *keyword == upper)
            .map(|(_, mode)| *mode)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            OpMode::None => "no mode",
            OpMode::Help => "/HELP",
            OpMode::List => "/LIST",
            OpMode::Backup => "/BACKUP",
            OpMode::Restore => "/RESTORE",
            OpMode::ChangeRecoveryMode => "/MODE",
            OpMode::BackupInfo => "/INFO",
            OpMode::DbInfo => "/DBINFO",
            OpMode::PurgeBackupHistory => "/PURGE",
            OpMode::TakeOffline => "/OFFLINE",
            OpMode::TakeOnline => "/ONLINE",
        }
    }
}

/// Recovery model of a database, both as requested on the command line and
/// as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryModel {
    Simple,
    BulkLogged,
    Full,
}

impl RecoveryModel {
    /// Keyword used in `ALTER DATABASE ... SET RECOVERY`.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            RecoveryModel::Simple => "SIMPLE",
            RecoveryModel::BulkLogged => "BULK_LOGGED",
            RecoveryModel::Full => "FULL",
        }
    }
}

impl fmt::Display for RecoveryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_keyword())
    }
}

impl FromStr for RecoveryModel {
    type Err = anyhow::Error;

    /// Accepts the spellings used by `sys.databases`, `msdb` and
    /// `RESTORE HEADERONLY` (`BULK_LOGGED` vs `BULK-LOGGED`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SIMPLE" => Ok(RecoveryModel::Simple),
            "BULK_LOGGED" | "BULK-LOGGED" => Ok(RecoveryModel::BulkLogged),
            "FULL" => Ok(RecoveryModel::Full),
            other => anyhow::bail!("Unknown recovery model '{}'", other),
        }
    }
}

/// Canonical flag recognised after the mode token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Db,
    All,
    Log,
    Verify,
    Dismount,
    Json,
    Recovery(RecoveryModel),
    Connection,
    Dir,
    File,
    Id,
}

const FLAG_TOKENS: &[(&str, Flag)] = &[
    ("/DB", Flag::Db),
    ("/ALL", Flag::All),
    ("/LOG", Flag::Log),
    ("/VERIFY", Flag::Verify),
    ("/DISMOUNT", Flag::Dismount),
    ("/JSON", Flag::Json),
    ("/FULL", Flag::Recovery(RecoveryModel::Full)),
    ("/BULK", Flag::Recovery(RecoveryModel::BulkLogged)),
    ("/SIMPLE", Flag::Recovery(RecoveryModel::Simple)),
    ("/C", Flag::Connection),
    ("/DIR", Flag::Dir),
    ("/FILE", Flag::File),
    ("/ID", Flag::Id),
];

impl Flag {
    /// Case-insensitive lookup; `None` for bare words and unknown flags.
    pub fn classify(token: &str) -> Option<Flag> {
        let upper = token.to_uppercase();
        FLAG_TOKENS
            .iter()
            .find(|(keyword, _)| *keyword == upper)
            .map(|(_, flag)| *flag)
    }

    pub fn keyword(self) -> &'static str {
        FLAG_TOKENS
            .iter()
            .find(|(_, flag)| *flag == self)
            .map(|(keyword, _)| *keyword)
            .unwrap_or("?")
    }
}
