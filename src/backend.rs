use std::{fmt, str::FromStr};

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::command::names_match;
use crate::mode::RecoveryModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Log,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupKind::Full => "Database",
            BackupKind::Log => "Log",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbState {
    Online,
    Restoring,
    Recovering,
    RecoveryPending,
    Suspect,
    Emergency,
    Offline,
    Copying,
    OfflineSecondary,
}

const DB_STATES: &[(&str, DbState)] = &[
    ("ONLINE", DbState::Online),
    ("RESTORING", DbState::Restoring),
    ("RECOVERING", DbState::Recovering),
    ("RECOVERY_PENDING", DbState::RecoveryPending),
    ("SUSPECT", DbState::Suspect),
    ("EMERGENCY", DbState::Emergency),
    ("OFFLINE", DbState::Offline),
    ("COPYING", DbState::Copying),
    ("OFFLINE_SECONDARY", DbState::OfflineSecondary),
];

impl FromStr for DbState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        DB_STATES
            .iter()
            .find(|(name, _)| *name == upper)
            .map(|(_, state)| *state)
            .ok_or_else(|| anyhow::anyhow!("Unknown database state '{}'", s))
    }
}

impl fmt::Display for DbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = DB_STATES
            .iter()
            .find(|(_, state)| state == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN");
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    MultiUser,
    SingleUser,
    RestrictedUser,
}

impl FromStr for AccessType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MULTI_USER" => Ok(AccessType::MultiUser),
            "SINGLE_USER" => Ok(AccessType::SingleUser),
            "RESTRICTED_USER" => Ok(AccessType::RestrictedUser),
            other => anyhow::bail!("Unknown access type '{}'", other),
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessType::MultiUser => "MULTI_USER",
            AccessType::SingleUser => "SINGLE_USER",
            AccessType::RestrictedUser => "RESTRICTED_USER",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbInfo {
    pub name: String,
    pub created_at: NaiveDateTime,
    pub access: AccessType,
    pub state: DbState,
    pub recovery_model: RecoveryModel,
    pub read_only: bool,
}

/// One backup set, either from the server's history or from a backup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub database: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub size: u64,
    pub path: String,
    pub kind: BackupKind,
    pub recovery_model: RecoveryModel,
    /// Backup set position inside its file; what `/ID` addresses.
    pub position: i32,
}

/// Everything the dispatcher needs from the database server.
pub trait DbBackend {
    /// User databases, excluding system databases, in server order.
    fn list_databases(&self) -> Result<Vec<String>>;

    fn database_info(&self, name: &str) -> Result<Option<DbInfo>>;

    fn backup(&self, name: &str, destination: &str, kind: BackupKind, verify: bool) -> Result<()>;

    /// Restore the backup set at `backup_id` from `source`.
    fn restore(&self, name: &str, source: &str, kind: BackupKind, backup_id: i32) -> Result<()>;

    fn set_recovery_model(&self, name: &str, model: RecoveryModel) -> Result<()>;

    fn take_offline(&self, name: &str) -> Result<()>;

    fn take_online(&self, name: &str) -> Result<()>;

    fn delete_backup_history(&self, name: &str) -> Result<()>;

    /// Backup history kept by the server, most recent first.
    fn catalog_backups(&self, name: &str) -> Result<Vec<BackupRecord>>;

    /// Every backup set stored in a backup file.
    fn read_backup_file(&self, path: &str) -> Result<Vec<BackupRecord>>;

    /// Backup sets in a file, optionally limited to one database.
    fn file_backups(&self, path: &str, database: Option<&str>) -> Result<Vec<BackupRecord>> {
        let records = self.read_backup_file(path)?;
        Ok(match database {
            Some(name) => records
                .into_iter()
                .filter(|r| names_match(&r.database, name))
                .collect(),
            None => records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_round_trip_through_server_names() {
        let state: DbState = "recovery_pending".parse().unwrap();
        assert_eq!(state, DbState::RecoveryPending);
        assert_eq!(state.to_string(), "RECOVERY_PENDING");
        assert!("HAPPY".parse::<DbState>().is_err());
    }

    #[test]
    fn access_types_parse() {
        assert_eq!(
            "SINGLE_USER".parse::<AccessType>().unwrap(),
            AccessType::SingleUser
        );
        assert!("EVERYONE".parse::<AccessType>().is_err());
    }

    #[test]
    fn records_serialize_with_lowercase_kind() {
        let at = NaiveDateTime::parse_from_str("2024-05-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let record = BackupRecord {
            database: "sales".into(),
            started_at: at,
            finished_at: at,
            size: 1024,
            path: "/backups/sales.db.bak".into(),
            kind: BackupKind::Log,
            recovery_model: RecoveryModel::BulkLogged,
            position: 3,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "log");
        assert_eq!(json["recovery_model"], "BULK_LOGGED");
        assert_eq!(json["position"], 3);
    }
}
