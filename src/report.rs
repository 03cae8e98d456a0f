use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::backend::{BackupRecord, DbInfo};

const SIZE_UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "E"];

/// Decimal units, two digits: `1234567` -> `1.23 M`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", size, SIZE_UNITS[unit])
}

pub fn write_db_info(out: &mut dyn Write, info: &DbInfo) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "Name:     {}", info.name)?;
    writeln!(out, "State:    {}", info.state)?;
    writeln!(out, "Access:   {}", info.access)?;
    writeln!(out, "Readonly: {}", if info.read_only { 'Y' } else { 'N' })?;
    writeln!(out, "Created:  {}", info.created_at.format("%Y-%m-%d %H:%M"))?;
    writeln!(out, "Recovery: {}", info.recovery_model)?;
    Ok(())
}

pub fn write_backup_record(out: &mut dyn Write, record: &BackupRecord) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "DB   : {}", record.database)?;
    writeln!(out, "Date : {}", record.finished_at.format("%Y-%m-%d %H:%M"))?;
    writeln!(out, "Type : {}", record.kind)?;
    writeln!(out, "Size : {}", format_size(record.size))?;
    writeln!(out, "Id   : {}", record.position)?;
    writeln!(out, "Model: {}", record.recovery_model)?;
    writeln!(out, "File : {}", record.path)?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("Failed to encode JSON output")?;
    writeln!(out)?;
    Ok(())
}
