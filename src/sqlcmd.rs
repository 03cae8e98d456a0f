use std::{process::Command, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::backend::{BackupKind, BackupRecord, DbBackend, DbInfo, DbState};
use crate::config::Config;
use crate::connection::ConnectionSettings;
use crate::mode::RecoveryModel;

/// Column separator requested from sqlcmd (ASCII unit separator).
const SEPARATOR: char = '\u{1f}';
const PASSWORD_ENV: &str = "SQLCMDPASSWORD";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}").expect("static spinner template")
}

pub fn with_spinner<T, F>(message: &str, action: F) -> Result<T>
where
    F: FnOnce(&ProgressBar) -> Result<T>,
{
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = action(&pb);

    match &result {
        Ok(_) => pb.finish_with_message(format!("{} ✓", message)),
        Err(_) => pb.finish_with_message(format!("{} ✗", message)),
    }

    result
}

/// `[name]` with closing brackets doubled.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `N'value'` with single quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

/// Result set printed by sqlcmd with headers, `-W` and [`SEPARATOR`].
#[derive(Debug, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn parse(output: &str) -> Result<Table> {
        let mut lines = output.lines().filter(|l| !l.trim().is_empty());
        let Some(header) = lines.next() else {
            return Ok(Table::default());
        };
        let columns: Vec<String> = header.split(SEPARATOR).map(|c| c.trim().to_string()).collect();
        // dashed rule under the header
        lines.next();

        let mut rows = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for line in lines {
            let mut cells = line.split(SEPARATOR).map(str::to_string);
            // a cell with a line break continues on the next line
            if let Some(last) = pending.last_mut()
                && let Some(rest) = cells.next()
            {
                last.push('\n');
                last.push_str(&rest);
            }
            pending.extend(cells);
            if pending.len() > columns.len() {
                anyhow::bail!(
                    "Row {} has {} columns, expected {}",
                    rows.len() + 1,
                    pending.len(),
                    columns.len()
                );
            }
            if pending.len() == columns.len() {
                rows.push(pending.drain(..).map(|c| c.trim().to_string()).collect());
            }
        }
        if !pending.is_empty() {
            anyhow::bail!(
                "Row {} has {} columns, expected {}",
                rows.len() + 1,
                pending.len(),
                columns.len()
            );
        }
        Ok(Table { columns, rows })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row { table: self, cells })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

pub struct Row<'a> {
    table: &'a Table,
    cells: &'a [String],
}

impl Row<'_> {
    pub fn get(&self, column: &str) -> Result<&str> {
        let idx = self
            .table
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .with_context(|| format!("Column '{}' missing from sqlcmd output", column))?;
        Ok(&self.cells[idx])
    }

    pub fn parse<T>(&self, column: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get(column)?;
        raw.parse::<T>()
            .map_err(|e| anyhow::anyhow!("Cannot parse {} value '{}': {}", column, raw, e))
    }

    pub fn datetime(&self, column: &str) -> Result<NaiveDateTime> {
        let raw = self.get(column)?;
        NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
            .with_context(|| format!("Cannot parse {} value '{}' as a timestamp", column, raw))
    }

    pub fn flag(&self, column: &str) -> Result<bool> {
        match self.get(column)? {
            "1" => Ok(true),
            "0" => Ok(false),
            other => anyhow::bail!("Cannot parse {} value '{}' as a bit", column, other),
        }
    }
}

/// SQL Server reached through the `sqlcmd` client, one process per batch.
#[derive(Debug)]
pub struct SqlCmd {
    bin: String,
    settings: ConnectionSettings,
    query_timeout: Option<u32>,
}

impl SqlCmd {
    /// Prepare the login, asking for a password when the connection string
    /// names a user without one, and make sure the server answers.
    pub fn connect(config: &Config, connection_string: &str) -> Result<Self> {
        let mut settings =
            ConnectionSettings::parse(connection_string).context("Invalid connection string")?;
        if settings.login_timeout.is_none() {
            settings.login_timeout = config.login_timeout;
        }
        ensure_password(&mut settings)?;

        let session = SqlCmd {
            bin: config.sqlcmd_bin.clone(),
            settings,
            query_timeout: config.query_timeout,
        };
        let server = session.settings.server.clone().unwrap_or_default();
        with_spinner(&format!("Connecting to {}", server), |_pb| {
            session.query("SELECT 1 AS [probe]").map(|_| ())
        })
        .with_context(|| format!("Cannot connect to {}", server))?;
        Ok(session)
    }

    fn command(&self, sql: &str) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(self.settings.sqlcmd_args());
        // -b: fail on errors, -r1: messages to stderr, -x: no $(var) expansion
        cmd.args(["-b", "-r1", "-x", "-f", "65001", "-W", "-w", "65535", "-s"]);
        cmd.arg(SEPARATOR.to_string());
        if let Some(secs) = self.query_timeout {
            cmd.args(["-t", &secs.to_string()]);
        }
        cmd.arg("-Q").arg(format!("SET NOCOUNT ON;\n{}", sql));
        if let Some(password) = &self.settings.password {
            cmd.env(PASSWORD_ENV, password);
        }
        cmd
    }

    fn run(&self, sql: &str) -> Result<String> {
        debug!(bin = %self.bin, sql, "running sqlcmd");
        let output = self
            .command(sql)
            .output()
            .with_context(|| format!("Failed to invoke {} binary", self.bin))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            anyhow::bail!(
                "sqlcmd failed with status {}: {}",
                output.status,
                stderr.trim()
            );
        }
        if !stderr.trim().is_empty() {
            debug!(messages = %stderr.trim(), "sqlcmd messages");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn execute(&self, sql: &str) -> Result<()> {
        self.run(sql).map(|_| ())
    }

    fn query(&self, sql: &str) -> Result<Table> {
        let stdout = self.run(sql)?;
        Table::parse(&stdout).context("Failed to parse sqlcmd output")
    }

    fn verify(&self, name: &str, file: &str) -> Result<()> {
        let db = quote_literal(name);
        let sql = format!(
            "DECLARE @position INT;
SELECT @position = [position] FROM msdb.dbo.backupset
WHERE [database_name] = {db}
  AND [backup_set_id] = (SELECT MAX([backup_set_id]) FROM msdb.dbo.backupset WHERE [database_name] = {db});
IF @position IS NULL
BEGIN
    THROW 50000, {error}, 1;
END;
RESTORE VERIFYONLY FROM DISK = {file} WITH FILE = @position;",
            error = quote_literal(&format!("Backup verification of {} failed", name)),
            file = quote_literal(file),
        );
        with_spinner(&format!("Verifying backup of {}", name), |_pb| {
            self.execute(&sql)
        })
    }
}

fn ensure_password(settings: &mut ConnectionSettings) -> Result<()> {
    if !settings.needs_password() {
        return Ok(());
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        settings.password = Some(password);
        return Ok(());
    }
    let prompt = format!(
        "Password for {} on {}: ",
        settings.user.as_deref().unwrap_or_default(),
        settings.server.as_deref().unwrap_or_default()
    );
    let password = rpassword::prompt_password(prompt).context("Reading password failed")?;
    settings.password = Some(password);
    Ok(())
}

fn backup_kind_from_catalog(code: &str) -> Result<BackupKind> {
    match code {
        "D" | "I" => Ok(BackupKind::Full),
        "L" => Ok(BackupKind::Log),
        other => anyhow::bail!("Unsupported backup type '{}'", other),
    }
}

fn backup_kind_from_header(code: u8) -> Result<BackupKind> {
    match code {
        // 5 is a differential database backup
        1 | 5 => Ok(BackupKind::Full),
        2 => Ok(BackupKind::Log),
        other => anyhow::bail!("Unsupported backup type {}", other),
    }
}

impl DbBackend for SqlCmd {
    fn list_databases(&self) -> Result<Vec<String>> {
        let table = self.query(
            "SELECT [name] FROM master.sys.databases WHERE [owner_sid] <> 0x01 ORDER BY [database_id];",
        )?;
        table.rows().map(|row| row.get("name").map(str::to_string)).collect()
    }

    fn database_info(&self, name: &str) -> Result<Option<DbInfo>> {
        let table = self.query(&format!(
            "SELECT [name], CONVERT(varchar(23), [create_date], 121) AS [create_date],
    [user_access_desc], [state_desc], [recovery_model_desc], [is_read_only]
FROM master.sys.databases WHERE [name] = {};",
            quote_literal(name)
        ))?;
        let Some(row) = table.rows().next() else {
            return Ok(None);
        };
        Ok(Some(DbInfo {
            name: row.get("name")?.to_string(),
            created_at: row.datetime("create_date")?,
            access: row.parse("user_access_desc")?,
            state: row.parse("state_desc")?,
            recovery_model: row.parse("recovery_model_desc")?,
            read_only: row.flag("is_read_only")?,
        }))
    }

    fn backup(&self, name: &str, destination: &str, kind: BackupKind, verify: bool) -> Result<()> {
        let info = self
            .database_info(name)?
            .ok_or_else(|| anyhow::anyhow!("Database cannot be found"))?;
        if info.state != DbState::Online {
            anyhow::bail!("Database is not online. Current state is '{}'", info.state);
        }

        let (statement, set_name, description) = match kind {
            BackupKind::Full => (
                "BACKUP DATABASE",
                format!("{}-Full Database Backup", name),
                "Full backup of the entire database",
            ),
            BackupKind::Log => (
                "BACKUP LOG",
                format!("{}-Transaction Log Backup", name),
                "Transaction log backup",
            ),
        };
        let sql = format!(
            "{statement} {db} TO DISK = {file}
WITH DESCRIPTION = {description}, NAME = {set_name}, CHECKSUM, SKIP;",
            db = quote_ident(name),
            file = quote_literal(destination),
            description = quote_literal(description),
            set_name = quote_literal(&set_name),
        );
        with_spinner(&format!("Backing up {} to {}", name, destination), |_pb| {
            self.execute(&sql)
        })?;

        if verify {
            self.verify(name, destination)?;
        }
        Ok(())
    }

    fn restore(&self, name: &str, source: &str, kind: BackupKind, backup_id: i32) -> Result<()> {
        let info = self.database_info(name)?;
        let statement = match kind {
            BackupKind::Full => "RESTORE DATABASE",
            BackupKind::Log => "RESTORE LOG",
        };
        let db = quote_ident(name);
        let mut restore = format!(
            "{statement} {db} FROM DISK = {file} WITH FILE = {backup_id}",
            file = quote_literal(source),
        );
        // nothing to protect when the database is gone
        if info.is_none() {
            restore.push_str(", REPLACE");
        }
        let disconnect = info.is_some_and(|i| i.state == DbState::Online);

        let mut batch = vec!["USE [master]".to_string()];
        if disconnect {
            batch.push(format!("ALTER DATABASE {db} SET SINGLE_USER WITH ROLLBACK IMMEDIATE"));
        }
        batch.push(restore);
        if disconnect {
            batch.push(format!("ALTER DATABASE {db} SET MULTI_USER"));
        }
        let sql = batch.join(";\n") + ";";

        with_spinner(
            &format!("Restoring {} from {} (backup {})", name, source, backup_id),
            |_pb| self.execute(&sql),
        )
    }

    fn set_recovery_model(&self, name: &str, model: RecoveryModel) -> Result<()> {
        let info = self
            .database_info(name)?
            .ok_or_else(|| anyhow::anyhow!("Database does not exist"))?;
        if info.recovery_model == model {
            debug!(database = name, %model, "recovery model already set");
            return Ok(());
        }
        self.execute(&format!(
            "ALTER DATABASE {} SET RECOVERY {};",
            quote_ident(name),
            model.sql_keyword()
        ))
    }

    fn take_offline(&self, name: &str) -> Result<()> {
        with_spinner(&format!("Taking {} offline", name), |_pb| {
            self.execute(&format!(
                "USE [master];\nALTER DATABASE {} SET OFFLINE;",
                quote_ident(name)
            ))
        })
    }

    fn take_online(&self, name: &str) -> Result<()> {
        with_spinner(&format!("Taking {} online", name), |_pb| {
            self.execute(&format!(
                "USE [master];\nALTER DATABASE {} SET ONLINE;",
                quote_ident(name)
            ))
        })
    }

    fn delete_backup_history(&self, name: &str) -> Result<()> {
        self.execute(&format!(
            "EXEC msdb.dbo.sp_delete_database_backuphistory @database_name = {};",
            quote_literal(name)
        ))
    }

    fn catalog_backups(&self, name: &str) -> Result<Vec<BackupRecord>> {
        let table = self.query(&format!(
            "SELECT bus.[database_name],
    CONVERT(varchar(23), bus.[backup_start_date], 121) AS [backup_start_date],
    CONVERT(varchar(23), bus.[backup_finish_date], 121) AS [backup_finish_date],
    CAST(bus.[backup_size] AS bigint) AS [backup_size],
    bmf.[physical_device_name], bus.[type], bus.[recovery_model], bus.[position]
FROM msdb.dbo.backupset AS bus
JOIN msdb.dbo.backupmediafamily AS bmf ON bus.[media_set_id] = bmf.[media_set_id]
WHERE bus.[database_name] = {} AND bmf.[device_type] = 2
ORDER BY bus.[backup_start_date] DESC, bus.[position] DESC;",
            quote_literal(name)
        ))?;
        table
            .rows()
            .map(|row| -> Result<BackupRecord> {
                Ok(BackupRecord {
                    database: row.get("database_name")?.to_string(),
                    started_at: row.datetime("backup_start_date")?,
                    finished_at: row.datetime("backup_finish_date")?,
                    size: row.parse("backup_size")?,
                    path: row.get("physical_device_name")?.to_string(),
                    kind: backup_kind_from_catalog(row.get("type")?)?,
                    recovery_model: row.parse("recovery_model")?,
                    position: row.parse("position")?,
                })
            })
            .collect()
    }

    fn read_backup_file(&self, path: &str) -> Result<Vec<BackupRecord>> {
        let table = with_spinner(&format!("Reading backup headers of {}", path), |pb| {
            let sql = format!("RESTORE HEADERONLY FROM DISK = {};", quote_literal(path));
            let table = self.query(&sql)?;
            pb.set_message(format!(
                "Reading backup headers of {} ({} found)",
                path,
                table.len()
            ));
            Ok(table)
        })?;
        table
            .rows()
            .map(|row| -> Result<BackupRecord> {
                Ok(BackupRecord {
                    database: row.get("DatabaseName")?.to_string(),
                    started_at: row.datetime("BackupStartDate")?,
                    finished_at: row.datetime("BackupFinishDate")?,
                    size: row.parse("BackupSize")?,
                    path: path.to_string(),
                    kind: backup_kind_from_header(row.parse("BackupType")?)?,
                    recovery_model: row.parse("RecoveryModel")?,
                    position: row.parse("Position")?,
                })
            })
            .collect()
    }
}
