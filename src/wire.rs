//! The pulse record: nine fields joined by a delimiter, fixed order
//!
//! `cpuLoad:databaseActive:uptimeSeconds:diskTotalKB:diskFreeKB:diskUsageRatio:memTotalKB:memFreeKB:memUsageRatio`
//!
//! Booleans render as `1`/`0`. Floats carry at most four fractional digits
//! with trailing zeros trimmed, so `0.6000` is written `0.6`.

use crate::collectors::Usage;
use crate::snapshot::Snapshot;
use thiserror::Error;

pub const FIELD_COUNT: usize = 9;

const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "cpuLoad",
    "databaseActive",
    "uptimeSeconds",
    "diskTotalKB",
    "diskFreeKB",
    "diskUsageRatio",
    "memTotalKB",
    "memFreeKB",
    "memUsageRatio",
];

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("expected 9 fields, found {0}")]
    FieldCount(usize),
    #[error("field {field} has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },
}

pub fn encode(snapshot: &Snapshot, delimiter: &str) -> String {
    let fields: [String; FIELD_COUNT] = [
        format_ratio(snapshot.cpu_load),
        if snapshot.database_active { "1" } else { "0" }.to_string(),
        snapshot.uptime_seconds.to_string(),
        snapshot.disk.total_kb.to_string(),
        snapshot.disk.free_kb.to_string(),
        format_ratio(snapshot.disk.usage_ratio),
        snapshot.memory.total_kb.to_string(),
        snapshot.memory.free_kb.to_string(),
        format_ratio(snapshot.memory.usage_ratio),
    ];
    fields.join(delimiter)
}

pub fn decode(record: &str, delimiter: &str) -> Result<Snapshot, WireError> {
    let fields: Vec<&str> = record.trim_end_matches(['\r', '\n']).split(delimiter).collect();
    if fields.len() != FIELD_COUNT {
        return Err(WireError::FieldCount(fields.len()));
    }

    let database_active = match fields[1] {
        "1" => true,
        "0" => false,
        other => return Err(invalid(1, other)),
    };
    let disk = usage_from(&fields, 3)?;
    let memory = usage_from(&fields, 6)?;

    Ok(Snapshot {
        cpu_load: float_at(&fields, 0)?,
        database_active,
        uptime_seconds: int_at(&fields, 2)?,
        disk,
        memory,
    })
}

pub(crate) fn format_ratio(value: f64) -> String {
    let fixed = format!("{value:.4}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn usage_from(fields: &[&str], start: usize) -> Result<Usage, WireError> {
    let total_kb = int_at(fields, start)?;
    let free_kb = int_at(fields, start + 1)?;
    let ratio = float_at(fields, start + 2)?;
    if free_kb > total_kb {
        return Err(invalid(start + 1, fields[start + 1]));
    }
    if ratio > 1.0 {
        return Err(invalid(start + 2, fields[start + 2]));
    }
    Ok(Usage {
        total_kb,
        free_kb,
        usage_ratio: ratio,
    })
}

fn int_at(fields: &[&str], idx: usize) -> Result<u64, WireError> {
    fields[idx].parse().map_err(|_| invalid(idx, fields[idx]))
}

fn float_at(fields: &[&str], idx: usize) -> Result<f64, WireError> {
    match fields[idx].parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(invalid(idx, fields[idx])),
    }
}

fn invalid(idx: usize, value: &str) -> WireError {
    WireError::InvalidField {
        field: FIELD_NAMES[idx],
        value: value.to_string(),
    }
}
