use std::{io::Write, time::Instant};

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::backend::{BackupKind, BackupRecord, DbBackend};
use crate::command::{BackupLocation, ParsedCommand};
use crate::config::Config;
use crate::mode::OpMode;
use crate::report;
use crate::resolve::{resolve, restore_candidates};
use crate::select::select_databases;

/// Characters that cannot appear in a Windows file name.
const INVALID_FILE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub backup_extension: String,
}

impl From<&Config> for DispatchOptions {
    fn from(config: &Config) -> Self {
        DispatchOptions {
            backup_extension: config.backup_extension.clone(),
        }
    }
}

/// Backup file for one database: the `/FILE` itself, or
/// `<dir>/<sanitized name><extension>` for `/DIR`.
pub fn backup_path(location: &BackupLocation, database: &str, extension: &str) -> String {
    if !location.is_directory {
        return location.path.clone();
    }
    let sanitized: String = database
        .chars()
        .map(|c| {
            if INVALID_FILE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    // the path is interpreted by the server, which may be Windows
    let separator = if location.path.contains('\\') { '\\' } else { '/' };
    let dir = location.path.trim_end_matches(['/', '\\']);
    format!("{}{}{}{}", dir, separator, sanitized.trim(), extension)
}

fn backup_kind(cmd: &ParsedCommand) -> BackupKind {
    if cmd.log_backup() {
        BackupKind::Log
    } else {
        BackupKind::Full
    }
}

/// Targets of this invocation; the catalog is only read for `/ALL`.
pub fn select_targets(cmd: &ParsedCommand, backend: &dyn DbBackend) -> Result<Vec<String>> {
    let catalog = if cmd.use_all_databases() == Some(true) {
        backend
            .list_databases()
            .context("Failed to list databases on the server")?
    } else {
        Vec::new()
    };
    Ok(select_databases(cmd, &catalog))
}

/// Run `op` for every target, one after another. A failing database is
/// logged and counted; the batch always continues.
fn for_each_target<F>(targets: &[String], what: &str, mut op: F) -> usize
where
    F: FnMut(&str) -> Result<()>,
{
    let mut failures = 0;
    for name in targets {
        if let Err(err) = op(name) {
            error!(database = %name, "Failed to {} '{}': {:#}", what, name, err);
            failures += 1;
        }
    }
    failures
}

/// Execute a validated command. Returns the number of databases that
/// failed; an `Err` means the invocation itself could not proceed.
pub fn dispatch(
    cmd: &ParsedCommand,
    backend: &dyn DbBackend,
    options: &DispatchOptions,
    out: &mut dyn Write,
) -> Result<usize> {
    match cmd.mode() {
        OpMode::List => list(cmd, backend, out),
        OpMode::Backup => run_backup(cmd, backend, options, out),
        OpMode::Restore => run_restore(cmd, backend, options, out),
        OpMode::ChangeRecoveryMode => {
            let model = cmd
                .recovery_model()
                .context("Recovery model not set")?;
            batch(cmd, backend, out, "change recovery model of", |name, out| {
                writeln!(out, "Setting '{}' to {}...", name, model)?;
                backend.set_recovery_model(name, model)
            })
        }
        OpMode::TakeOffline => batch(cmd, backend, out, "take offline", |name, out| {
            writeln!(out, "Taking '{}' offline...", name)?;
            backend.take_offline(name)
        }),
        OpMode::TakeOnline => batch(cmd, backend, out, "take online", |name, out| {
            writeln!(out, "Taking '{}' online...", name)?;
            backend.take_online(name)
        }),
        OpMode::PurgeBackupHistory => {
            batch(cmd, backend, out, "delete backup history of", |name, out| {
                writeln!(out, "Purging backup history of '{}'...", name)?;
                backend.delete_backup_history(name)
            })
        }
        OpMode::DbInfo => db_info(cmd, backend, out),
        OpMode::BackupInfo => backup_info(cmd, backend, options, out),
        OpMode::Help | OpMode::None => {
            anyhow::bail!("Nothing to execute for {}", cmd.mode().keyword())
        }
    }
}

fn batch<F>(
    cmd: &ParsedCommand,
    backend: &dyn DbBackend,
    out: &mut dyn Write,
    what: &str,
    mut op: F,
) -> Result<usize>
where
    F: FnMut(&str, &mut dyn Write) -> Result<()>,
{
    let targets = select_targets(cmd, backend)?;
    let failures = for_each_target(&targets, what, |name| op(name, &mut *out));
    writeln!(out, "Completed with {} errors", failures)?;
    Ok(failures)
}

fn list(cmd: &ParsedCommand, backend: &dyn DbBackend, out: &mut dyn Write) -> Result<usize> {
    let names = backend
        .list_databases()
        .context("Failed to list databases on the server")?;
    if cmd.json() {
        report::write_json(out, &names)?;
    } else {
        for name in &names {
            writeln!(out, "{}", name)?;
        }
    }
    Ok(0)
}

fn run_backup(
    cmd: &ParsedCommand,
    backend: &dyn DbBackend,
    options: &DispatchOptions,
    out: &mut dyn Write,
) -> Result<usize> {
    let location = cmd.location().context("Backup location not set")?;
    let kind = backup_kind(cmd);
    let targets = select_targets(cmd, backend)?;
    let total = Instant::now();

    let failures = for_each_target(&targets, "back up", |name| {
        let started = Instant::now();
        let destination = backup_path(location, name, &options.backup_extension);
        writeln!(out, "Backing up database '{}'...", name)?;
        let result = backend.backup(name, &destination, kind, cmd.verify());
        writeln!(
            out,
            "Completed backup of '{}' after {:.1?}",
            name,
            started.elapsed()
        )?;
        result
    });

    writeln!(
        out,
        "Backup completed with {} errors after {:.1?}",
        failures,
        total.elapsed()
    )?;
    Ok(failures)
}

fn run_restore(
    cmd: &ParsedCommand,
    backend: &dyn DbBackend,
    options: &DispatchOptions,
    out: &mut dyn Write,
) -> Result<usize> {
    let location = cmd.location().context("Backup location not set")?;
    let kind = backup_kind(cmd);
    let targets = select_targets(cmd, backend)?;
    let total = Instant::now();

    let failures = for_each_target(&targets, "restore", |name| {
        let started = Instant::now();
        let source = backup_path(location, name, &options.backup_extension);
        writeln!(out, "Restoring database '{}'...", name)?;

        let candidates = restore_candidates(backend.file_backups(&source, Some(name))?, name, kind);
        let backup_id = resolve(cmd.backup_id(), &candidates)
            .with_context(|| {
                format!(
                    "Backup {} of kind '{}' not usable in '{}'",
                    cmd.backup_id(),
                    kind,
                    source
                )
            })?
            .position();
        info!(database = name, backup_id, source = %source, "resolved backup set");

        if cmd.dismount() && backend.database_info(name)?.is_some() {
            writeln!(out, "Taking '{}' offline before restore...", name)?;
            backend.take_offline(name)?;
        }

        let result = backend.restore(name, &source, kind, backup_id);
        writeln!(
            out,
            "Completed restore of '{}' after {:.1?}",
            name,
            started.elapsed()
        )?;
        result
    });

    writeln!(
        out,
        "Restore completed with {} errors after {:.1?}",
        failures,
        total.elapsed()
    )?;
    Ok(failures)
}

fn db_info(cmd: &ParsedCommand, backend: &dyn DbBackend, out: &mut dyn Write) -> Result<usize> {
    let targets = select_targets(cmd, backend)?;
    let mut infos = Vec::new();
    let failures = for_each_target(&targets, "get database information for", |name| {
        let info = backend
            .database_info(name)?
            .with_context(|| format!("Database '{}' cannot be found on the server", name))?;
        if !cmd.json() {
            report::write_db_info(&mut *out, &info)?;
        }
        infos.push(info);
        Ok(())
    });

    if cmd.json() {
        report::write_json(out, &infos)?;
    } else {
        writeln!(out, "Completed with {} errors", failures)?;
    }
    Ok(failures)
}

fn backup_info(
    cmd: &ParsedCommand,
    backend: &dyn DbBackend,
    options: &DispatchOptions,
    out: &mut dyn Write,
) -> Result<usize> {
    let targets = select_targets(cmd, backend)?;
    let mut records: Vec<BackupRecord> = Vec::new();
    let mut failures = 0;

    match cmd.location() {
        Some(location) if !targets.is_empty() => {
            failures = for_each_target(&targets, "read backup information of", |name| {
                let file = backup_path(location, name, &options.backup_extension);
                records.extend(backend.file_backups(&file, Some(name))?);
                Ok(())
            });
        }
        Some(location) => match backend.file_backups(&location.path, None) {
            Ok(found) => records = found,
            Err(err) => {
                error!(
                    "Failed to read backup information from '{}': {:#}",
                    location.path, err
                );
                failures = 1;
            }
        },
        None if targets.is_empty() => anyhow::bail!(
            "No databases specified or found on the server. \
             If the databases were deleted, use /FILE to read a backup file instead"
        ),
        None => {
            failures = for_each_target(&targets, "read backup history of", |name| {
                records.extend(backend.catalog_backups(name)?);
                Ok(())
            });
            if records.is_empty() && !cmd.json() {
                writeln!(out, "No backup history is available on the server")?;
            }
        }
    }

    if cmd.json() {
        report::write_json(out, &records)?;
    } else {
        for record in &records {
            report::write_backup_record(out, record)?;
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::NaiveDate;

    use super::*;
    use crate::backend::{AccessType, DbInfo, DbState};
    use crate::mode::RecoveryModel;
    use crate::parser::parse;

    /// Records every call; databases listed in `failing` error out.
    #[derive(Default)]
    struct FakeBackend {
        catalog: Vec<String>,
        failing: Vec<String>,
        file_records: Vec<BackupRecord>,
        history: Vec<BackupRecord>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeBackend {
        fn with_catalog(names: &[&str]) -> Self {
            FakeBackend {
                catalog: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }

        fn check(&self, name: &str) -> Result<()> {
            if self.failing.iter().any(|f| f == name) {
                anyhow::bail!("server rejected {}", name);
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl DbBackend for FakeBackend {
        fn list_databases(&self) -> Result<Vec<String>> {
            self.record("list".into());
            Ok(self.catalog.clone())
        }

        fn database_info(&self, name: &str) -> Result<Option<DbInfo>> {
            self.record(format!("info {name}"));
            if !self.catalog.iter().any(|c| c == name) {
                return Ok(None);
            }
            Ok(Some(DbInfo {
                name: name.to_string(),
                created_at: at(1),
                access: AccessType::MultiUser,
                state: DbState::Online,
                recovery_model: RecoveryModel::Simple,
                read_only: false,
            }))
        }

        fn backup(&self, name: &str, destination: &str, kind: BackupKind, verify: bool) -> Result<()> {
            self.record(format!("backup {name} {destination} {kind} {verify}"));
            self.check(name)
        }

        fn restore(&self, name: &str, source: &str, kind: BackupKind, backup_id: i32) -> Result<()> {
            self.record(format!("restore {name} {source} {kind} {backup_id}"));
            self.check(name)
        }

        fn set_recovery_model(&self, name: &str, model: RecoveryModel) -> Result<()> {
            self.record(format!("recovery {name} {model}"));
            self.check(name)
        }

        fn take_offline(&self, name: &str) -> Result<()> {
            self.record(format!("offline {name}"));
            self.check(name)
        }

        fn take_online(&self, name: &str) -> Result<()> {
            self.record(format!("online {name}"));
            self.check(name)
        }

        fn delete_backup_history(&self, name: &str) -> Result<()> {
            self.record(format!("purge {name}"));
            self.check(name)
        }

        fn catalog_backups(&self, name: &str) -> Result<Vec<BackupRecord>> {
            self.record(format!("history {name}"));
            self.check(name)?;
            Ok(self
                .history
                .iter()
                .filter(|r| r.database == name)
                .cloned()
                .collect())
        }

        fn read_backup_file(&self, path: &str) -> Result<Vec<BackupRecord>> {
            self.record(format!("headers {path}"));
            Ok(self.file_records.clone())
        }
    }

    fn at(day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap()
    }

    fn backup_set(database: &str, position: i32, kind: BackupKind) -> BackupRecord {
        BackupRecord {
            database: database.into(),
            started_at: at(position as u32),
            finished_at: at(position as u32),
            size: 4096,
            path: "/srv/all.bak".into(),
            kind,
            recovery_model: RecoveryModel::Full,
            position,
        }
    }

    fn run(line: &str, backend: &FakeBackend) -> (Result<usize>, String) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let cmd = parse(&tokens).unwrap();
        crate::validate::validate(&cmd).unwrap();
        let options = DispatchOptions {
            backup_extension: ".db.bak".into(),
        };
        let mut out: Vec<u8> = Vec::new();
        let result = dispatch(&cmd, backend, &options, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn backup_paths() {
        let dir = BackupLocation {
            path: r"D:\SqlBackup\".into(),
            is_directory: true,
        };
        assert_eq!(
            backup_path(&dir, "we|ird:name ", ".db.bak"),
            r"D:\SqlBackup\we_ird_name.db.bak"
        );
        let unix = BackupLocation {
            path: "/var/opt/mssql/backup".into(),
            is_directory: true,
        };
        assert_eq!(
            backup_path(&unix, "sales", ".bak"),
            "/var/opt/mssql/backup/sales.bak"
        );
        let file = BackupLocation {
            path: "/srv/all.bak".into(),
            is_directory: false,
        };
        assert_eq!(backup_path(&file, "sales", ".db.bak"), "/srv/all.bak");
    }

    #[test]
    fn one_failure_does_not_stop_the_batch() {
        let mut backend = FakeBackend::with_catalog(&["A", "B", "C"]);
        backend.failing = vec!["B".into()];
        let (result, out) = run("/OFFLINE /C LOCAL /ALL", &backend);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(
            backend.calls(),
            ["list", "offline A", "offline B", "offline C"]
        );
        assert!(out.contains("Completed with 1 errors"));
    }

    #[test]
    fn explicit_lists_skip_the_catalog() {
        let backend = FakeBackend::with_catalog(&["A"]);
        let (result, _) = run("/PURGE /C LOCAL /DB x y", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(backend.calls(), ["purge x", "purge y"]);
    }

    #[test]
    fn backup_all_except_with_dir_and_log() {
        let backend = FakeBackend::with_catalog(&["sales", "dev", "hr"]);
        let (result, out) = run("/BACKUP /C LOCAL /DIR /bk /ALL DEV /LOG /VERIFY", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(
            backend.calls(),
            [
                "list",
                "backup sales /bk/sales.db.bak Log true",
                "backup hr /bk/hr.db.bak Log true"
            ]
        );
        assert!(out.contains("Backup completed with 0 errors"));
    }

    #[test]
    fn restore_resolves_negative_ids_per_database() {
        let mut backend = FakeBackend::with_catalog(&["sales"]);
        backend.file_records = vec![
            backup_set("sales", 3, BackupKind::Full),
            backup_set("sales", 5, BackupKind::Full),
            backup_set("sales", 6, BackupKind::Log),
            backup_set("other", 9, BackupKind::Full),
            backup_set("sales", 4, BackupKind::Full),
        ];
        let (result, _) = run("/RESTORE /C LOCAL /FILE /srv/all.bak /DB sales /ID -2", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(
            backend.calls(),
            ["headers /srv/all.bak", "restore sales /srv/all.bak Database 4"]
        );
    }

    #[test]
    fn restore_defaults_to_newest_and_passes_positive_ids() {
        let mut backend = FakeBackend::default();
        backend.file_records = vec![
            backup_set("a", 1, BackupKind::Full),
            backup_set("a", 2, BackupKind::Full),
        ];
        let (result, _) = run("/RESTORE /C LOCAL /FILE f.bak /DB a", &backend);
        assert_eq!(result.unwrap(), 0);
        assert!(backend.calls().contains(&"restore a f.bak Database 2".to_string()));

        let (result, _) = run("/RESTORE /C LOCAL /FILE f.bak /DB a /ID 17", &backend);
        assert_eq!(result.unwrap(), 0);
        assert!(backend.calls().contains(&"restore a f.bak Database 17".to_string()));
    }

    #[test]
    fn restore_failures_are_counted_per_database() {
        let mut backend = FakeBackend::default();
        backend.file_records = vec![backup_set("a", 1, BackupKind::Full)];
        let (result, _) = run("/RESTORE /C LOCAL /DIR /bk /DB a b /ID -2", &backend);
        // a: offset too big, b: no backup sets at all
        assert_eq!(result.unwrap(), 2);
        assert!(!backend.calls().iter().any(|c| c.starts_with("restore")));
    }

    #[test]
    fn dismount_takes_existing_databases_offline_first() {
        let mut backend = FakeBackend::with_catalog(&["a"]);
        backend.file_records = vec![
            backup_set("a", 1, BackupKind::Full),
            backup_set("gone", 1, BackupKind::Full),
        ];
        let (result, _) = run("/RESTORE /C LOCAL /FILE f.bak /DB a gone /DISMOUNT", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(
            backend.calls(),
            [
                "headers f.bak",
                "info a",
                "offline a",
                "restore a f.bak Database 1",
                "headers f.bak",
                "info gone",
                "restore gone f.bak Database 1"
            ]
        );
    }

    #[test]
    fn recovery_mode_change() {
        let backend = FakeBackend::with_catalog(&["a", "b"]);
        let (result, out) = run("/MODE /C LOCAL /ALL /BULK", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(
            backend.calls(),
            ["list", "recovery a BULK_LOGGED", "recovery b BULK_LOGGED"]
        );
        assert!(out.contains("Setting 'a' to BULK_LOGGED..."));
    }

    #[test]
    fn db_info_counts_missing_databases() {
        let backend = FakeBackend::with_catalog(&["a"]);
        let (result, out) = run("/DBINFO /C LOCAL /DB a missing", &backend);
        assert_eq!(result.unwrap(), 1);
        assert!(out.contains("Name:     a"));
        assert!(out.contains("Completed with 1 errors"));
    }

    #[test]
    fn list_prints_catalog_or_json() {
        let backend = FakeBackend::with_catalog(&["a", "b"]);
        let (result, out) = run("/LIST /C LOCAL", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(out, "a\nb\n");

        let (_, out) = run("/LIST /C LOCAL /JSON", &backend);
        let names: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn backup_info_from_history() {
        let mut backend = FakeBackend::with_catalog(&["a", "b"]);
        backend.history = vec![backup_set("a", 2, BackupKind::Full)];
        let (result, out) = run("/INFO /C LOCAL /ALL", &backend);
        assert_eq!(result.unwrap(), 0);
        assert!(out.contains("DB   : a"));
        assert!(!out.contains("No backup history"));
    }

    #[test]
    fn backup_info_reports_empty_history() {
        let backend = FakeBackend::with_catalog(&["a"]);
        let (result, out) = run("/INFO /C LOCAL /DB a", &backend);
        assert_eq!(result.unwrap(), 0);
        assert!(out.contains("No backup history is available on the server"));
    }

    #[test]
    fn backup_info_without_targets_or_location_fails() {
        let backend = FakeBackend::with_catalog(&[]);
        let (result, _) = run("/INFO /C LOCAL /ALL", &backend);
        assert!(result.unwrap_err().to_string().contains("No databases specified"));
    }

    #[test]
    fn backup_info_reads_the_location_itself_without_targets() {
        let mut backend = FakeBackend::default();
        backend.file_records = vec![
            backup_set("a", 1, BackupKind::Full),
            backup_set("b", 2, BackupKind::Log),
        ];
        let (result, out) = run("/INFO /C LOCAL /FILE /srv/all.bak /JSON", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(backend.calls(), ["headers /srv/all.bak"]);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn backup_info_filters_per_target_file() {
        let mut backend = FakeBackend::default();
        backend.file_records = vec![
            backup_set("a", 1, BackupKind::Full),
            backup_set("b", 2, BackupKind::Full),
        ];
        let (result, out) = run("/INFO /C LOCAL /DIR /bk /DB A", &backend);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(backend.calls(), ["headers /bk/A.db.bak"]);
        assert!(out.contains("DB   : a"));
        assert!(!out.contains("DB   : b"));
    }

    #[test]
    fn catalog_failures_abort_before_any_work() {
        struct DownBackend;
        impl DbBackend for DownBackend {
            fn list_databases(&self) -> Result<Vec<String>> {
                anyhow::bail!("login failed")
            }
            fn database_info(&self, _: &str) -> Result<Option<DbInfo>> {
                unreachable!()
            }
            fn backup(&self, _: &str, _: &str, _: BackupKind, _: bool) -> Result<()> {
                unreachable!()
            }
            fn restore(&self, _: &str, _: &str, _: BackupKind, _: i32) -> Result<()> {
                unreachable!()
            }
            fn set_recovery_model(&self, _: &str, _: RecoveryModel) -> Result<()> {
                unreachable!()
            }
            fn take_offline(&self, _: &str) -> Result<()> {
                unreachable!()
            }
            fn take_online(&self, _: &str) -> Result<()> {
                unreachable!()
            }
            fn delete_backup_history(&self, _: &str) -> Result<()> {
                unreachable!()
            }
            fn catalog_backups(&self, _: &str) -> Result<Vec<BackupRecord>> {
                unreachable!()
            }
            fn read_backup_file(&self, _: &str) -> Result<Vec<BackupRecord>> {
                unreachable!()
            }
        }

        let cmd = parse(&["/ONLINE", "/C", "LOCAL", "/ALL"]).unwrap();
        let options = DispatchOptions {
            backup_extension: ".db.bak".into(),
        };
        let err = dispatch(&cmd, &DownBackend, &options, &mut Vec::<u8>::new()).unwrap_err();
        assert!(format!("{err:#}").contains("login failed"));
    }
}
