use thiserror::Error;

use crate::command::ParsedCommand;
use crate::mode::OpMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No mode specified. Use /? to get help")]
    NoMode,
    #[error("/DIR or /FILE is required")]
    MissingLocation,
    #[error("/ALL or /DB is required")]
    MissingSelection,
    #[error("/DB requires at least one database. Did you mean to use /ALL instead?")]
    EmptyDatabaseList,
    #[error("/MODE requires a recovery model (/FULL, /BULK or /SIMPLE)")]
    MissingRecoveryModel,
    #[error("A database or a backup location is required ({selection}; {location})")]
    MissingSelectionOrLocation {
        selection: Box<ValidationError>,
        location: Box<ValidationError>,
    },
    #[error("/C is required")]
    MissingConnection,
}

/// Check that the scanned command carries everything its mode needs.
/// Stops at the first missing requirement.
pub fn validate(cmd: &ParsedCommand) -> Result<(), ValidationError> {
    match cmd.mode() {
        OpMode::None => return Err(ValidationError::NoMode),
        OpMode::Backup | OpMode::Restore => {
            require_location(cmd)?;
            require_selection(cmd)?;
        }
        OpMode::ChangeRecoveryMode => {
            require_selection(cmd)?;
            if cmd.recovery_model().is_none() {
                return Err(ValidationError::MissingRecoveryModel);
            }
        }
        OpMode::BackupInfo => {
            if let Err(selection) = require_selection(cmd)
                && let Err(location) = require_location(cmd)
            {
                return Err(ValidationError::MissingSelectionOrLocation {
                    selection: Box::new(selection),
                    location: Box::new(location),
                });
            }
        }
        OpMode::DbInfo
        | OpMode::PurgeBackupHistory
        | OpMode::TakeOffline
        | OpMode::TakeOnline => require_selection(cmd)?,
        OpMode::Help | OpMode::List => {}
    }

    if cmd.mode() != OpMode::Help && cmd.connection_string().is_none() {
        return Err(ValidationError::MissingConnection);
    }
    Ok(())
}

fn require_location(cmd: &ParsedCommand) -> Result<(), ValidationError> {
    match cmd.location() {
        Some(location) if !location.path.trim().is_empty() => Ok(()),
        _ => Err(ValidationError::MissingLocation),
    }
}

fn require_selection(cmd: &ParsedCommand) -> Result<(), ValidationError> {
    match cmd.use_all_databases() {
        None => Err(ValidationError::MissingSelection),
        Some(false) if cmd.databases().is_empty() => Err(ValidationError::EmptyDatabaseList),
        Some(_) => Ok(()),
    }
}
