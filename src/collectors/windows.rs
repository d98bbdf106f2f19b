use super::{disk_usage, round4, Fact, OsFacts, PlatformStrategy, Usage, BYTES_PER_KB};
use crate::error::ProbeError;
use crate::platform::Platform;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct WindowsStrategy {
    facts: Arc<dyn OsFacts>,
}

impl WindowsStrategy {
    pub fn new(facts: Arc<dyn OsFacts>) -> Self {
        Self { facts }
    }

    fn read(&self, sampler: &'static str, fact: Fact) -> Result<String, ProbeError> {
        self.facts
            .read(&fact)
            .map_err(|err| ProbeError::unavailable(sampler, err.to_string()))
    }
}

impl PlatformStrategy for WindowsStrategy {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn cpu_load(&self) -> Result<f64, ProbeError> {
        let text = self.read("cpu", Fact::CpuLoadPercentage)?;
        let rows: Vec<f64> = value_rows(&text)
            .filter_map(|row| row.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .collect();
        if rows.is_empty() {
            return Err(ProbeError::unavailable("cpu", "no LoadPercentage rows"));
        }
        let mean = rows.iter().sum::<f64>() / rows.len() as f64;
        Ok(round4(mean / 100.0))
    }

    fn database_running(&self, names: &BTreeSet<String>) -> bool {
        let listing = match self.facts.read(&Fact::ProcessList) {
            Ok(listing) => listing,
            Err(err) => {
                debug!(error = %err, "process listing unavailable");
                return false;
            }
        };
        listing
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|image| names.contains(image))
    }

    fn uptime(&self) -> Result<u64, ProbeError> {
        let text = self.read("uptime", Fact::LastBootUpTime)?;
        let raw = value_rows(&text)
            .next()
            .ok_or_else(|| ProbeError::unavailable("uptime", "no LastBootUpTime row"))?;
        let boot = parse_wmi_datetime(raw)
            .ok_or_else(|| ProbeError::unavailable("uptime", "malformed boot timestamp"))?;
        seconds_between(boot, Utc::now())
            .ok_or_else(|| ProbeError::unavailable("uptime", "boot time is in the future"))
    }

    fn disk_space(&self, path: &Path) -> Result<Usage, ProbeError> {
        disk_usage(self.facts.as_ref(), path)
    }

    fn memory(&self) -> Result<Usage, ProbeError> {
        let free_text = self.read("memory", Fact::FreePhysicalMemory)?;
        let free_kb = free_text
            .lines()
            .filter_map(|line| line.trim().strip_prefix("FreePhysicalMemory="))
            .find_map(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| ProbeError::unavailable("memory", "no FreePhysicalMemory value"))?;

        let total_text = self.read("memory", Fact::TotalPhysicalMemory)?;
        let total_bytes = value_rows(&total_text)
            .find_map(|row| row.parse::<u64>().ok())
            .ok_or_else(|| ProbeError::unavailable("memory", "no TotalPhysicalMemory row"))?;

        Usage::from_kb(total_bytes / BYTES_PER_KB, free_kb)
            .ok_or_else(|| ProbeError::unavailable("memory", "free memory exceeds total"))
    }
}

/// Non-empty rows of a `wmic ... get X` table, header skipped.
fn value_rows(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .skip(1)
}

/// Parses a WMI datetime such as `20170515093000.500000+060`. The first 14
/// characters are fixed-width `yyyyMMddHHmmss`; the optional suffix carries
/// the UTC offset in minutes. Without a usable offset the stamp is local time.
fn parse_wmi_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let (stamp, suffix) = raw.split_once('.').unwrap_or((raw, ""));
    if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| stamp[range].parse::<u32>().ok();
    let year = stamp[0..4].parse::<i32>().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?.and_hms_opt(
        field(8..10)?,
        field(10..12)?,
        field(12..14)?,
    )?;

    match parse_offset(suffix) {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc)),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

fn parse_offset(suffix: &str) -> Option<FixedOffset> {
    let pos = suffix.find(['+', '-'])?;
    let minutes = suffix[pos..].parse::<i32>().ok()?;
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

fn seconds_between(boot: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
    u64::try_from((now - boot).num_seconds()).ok()
}
