use super::{disk_usage, round4, Fact, OsFacts, PlatformStrategy, Usage};
use crate::error::ProbeError;
use crate::platform::Platform;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct PosixStrategy {
    facts: Arc<dyn OsFacts>,
}

impl PosixStrategy {
    pub fn new(facts: Arc<dyn OsFacts>) -> Self {
        Self { facts }
    }

    fn read(&self, sampler: &'static str, fact: Fact) -> Result<String, ProbeError> {
        self.facts
            .read(&fact)
            .map_err(|err| ProbeError::unavailable(sampler, err.to_string()))
    }
}

impl PlatformStrategy for PosixStrategy {
    fn platform(&self) -> Platform {
        Platform::Posix
    }

    fn cpu_load(&self) -> Result<f64, ProbeError> {
        let text = self.read("cpu", Fact::LoadAverage)?;
        let one_minute = parse_loadavg(&text)
            .ok_or_else(|| ProbeError::unavailable("cpu", "load average is not a number"))?;
        let cores = self
            .facts
            .cpu_count()
            .map_err(|err| ProbeError::unavailable("cpu", err.to_string()))?;
        Ok(round4(one_minute / cores.max(1) as f64))
    }

    fn database_running(&self, names: &BTreeSet<String>) -> bool {
        for name in names {
            match self.facts.read(&Fact::ProcessByName(name.clone())) {
                Ok(out) if lists_pid(&out) => return true,
                Ok(_) => {}
                Err(err) => debug!(process = %name, error = %err, "process lookup found nothing"),
            }
        }
        false
    }

    fn uptime(&self) -> Result<u64, ProbeError> {
        let text = self.read("uptime", Fact::Uptime)?;
        parse_uptime(&text)
            .ok_or_else(|| ProbeError::unavailable("uptime", "uptime counter is not a number"))
    }

    fn disk_space(&self, path: &Path) -> Result<Usage, ProbeError> {
        disk_usage(self.facts.as_ref(), path)
    }

    fn memory(&self) -> Result<Usage, ProbeError> {
        let text = self.read("memory", Fact::MemInfo)?;
        let table = parse_meminfo(&text);
        let total = *table
            .get("MemTotal")
            .ok_or_else(|| ProbeError::unavailable("memory", "MemTotal missing"))?;
        let free = *table
            .get("MemFree")
            .ok_or_else(|| ProbeError::unavailable("memory", "MemFree missing"))?;
        Usage::from_kb(total, free)
            .ok_or_else(|| ProbeError::unavailable("memory", "free memory exceeds total"))
    }
}

fn parse_loadavg(text: &str) -> Option<f64> {
    let v = text.split_whitespace().next()?.parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0).then_some(v)
}

fn parse_uptime(text: &str) -> Option<u64> {
    let v = text.split_whitespace().next()?.parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0).then(|| v.trunc() as u64)
}

/// `pgrep` prints one pid per line.
fn lists_pid(out: &str) -> bool {
    out.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .is_some_and(|l| l.parse::<u32>().is_ok())
}

/// Parses `Key: value [unit]` lines; values keep their leading integer only.
fn parse_meminfo(text: &str) -> HashMap<&str, u64> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let digits: String = value
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            Some((key.trim(), digits.parse().ok()?))
        })
        .collect()
}
