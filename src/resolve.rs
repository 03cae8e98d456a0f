use thiserror::Error;

use crate::backend::{BackupKind, BackupRecord};
use crate::command::names_match;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No matching backup")]
    NoMatchingBackup,
    #[error("Negative offset '{0}' is too big")]
    OffsetTooBig(i32),
}

/// The backup set a `/ID` value points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved<'a> {
    /// Picked relative to the most recent backup.
    Record(&'a BackupRecord),
    /// Positive ids are absolute and left for the server to match.
    Literal(i32),
}

impl Resolved<'_> {
    pub fn position(&self) -> i32 {
        match self {
            Resolved::Record(record) => record.position,
            Resolved::Literal(id) => *id,
        }
    }
}

/// Restore candidates for one database: matching kind, newest id first.
pub fn restore_candidates(
    records: Vec<BackupRecord>,
    database: &str,
    kind: BackupKind,
) -> Vec<BackupRecord> {
    let mut candidates: Vec<BackupRecord> = records
        .into_iter()
        .filter(|r| r.kind == kind && names_match(&r.database, database))
        .collect();
    candidates.sort_by(|a, b| b.position.cmp(&a.position));
    candidates
}

/// Map a `/ID` value onto `candidates` (newest first).
///
/// `0` and `-1` both mean the newest backup, `-n` is the n-th newest, and
/// positive values are absolute backup set ids.
pub fn resolve(reference: i32, candidates: &[BackupRecord]) -> Result<Resolved<'_>, ResolveError> {
    if candidates.is_empty() {
        return Err(ResolveError::NoMatchingBackup);
    }
    match reference {
        0 | -1 => Ok(Resolved::Record(&candidates[0])),
        r if r < -1 => {
            let offset = r.unsigned_abs() as usize - 1;
            candidates
                .get(offset)
                .map(Resolved::Record)
                .ok_or(ResolveError::OffsetTooBig(r))
        }
        id => Ok(Resolved::Literal(id)),
    }
}
