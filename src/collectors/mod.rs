pub mod posix;
pub mod system;
pub mod windows;

use crate::error::ProbeError;
use crate::platform::Platform;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const BYTES_PER_KB: u64 = 1024;

/// A raw operating-system fact, returned as the text the OS exposes it in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fact {
    /// `/proc/loadavg` shape: `0.52 0.58 0.59 1/467 12345`.
    LoadAverage,
    /// `/proc/uptime` shape: seconds since boot, then idle seconds.
    Uptime,
    /// `/proc/meminfo` shape: `Key:   value kB` lines.
    MemInfo,
    /// Pids of processes whose command name is exactly the given name.
    ProcessByName(String),
    /// `tasklist` table.
    ProcessList,
    /// `wmic cpu get LoadPercentage`.
    CpuLoadPercentage,
    /// `wmic os get lastbootuptime`.
    LastBootUpTime,
    /// `wmic OS get FreePhysicalMemory /Value`.
    FreePhysicalMemory,
    /// `wmic computersystem get TotalPhysicalMemory`.
    TotalPhysicalMemory,
}

#[derive(Debug, Error)]
pub enum FactError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    Status { command: String, status: String },
    #[error("path {path} is not accessible: {source}")]
    Path {
        path: String,
        source: std::io::Error,
    },
    #[error("{command} did not finish within {after:?}")]
    Timeout { command: String, after: Duration },
    #[error("{0} is not available on this host")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Source of raw OS facts. Production reads the live host; tests hand in
/// canned text.
pub trait OsFacts: Send + Sync {
    fn read(&self, fact: &Fact) -> Result<String, FactError>;
    fn cpu_count(&self) -> Result<usize, FactError>;
    fn disk_space(&self, path: &Path) -> Result<DiskSpace, FactError>;
}

/// Total/free pair in binary kilobytes plus the derived usage ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub total_kb: u64,
    pub free_kb: u64,
    pub usage_ratio: f64,
}

impl Usage {
    /// Returns `None` when `free_kb > total_kb`.
    pub fn from_kb(total_kb: u64, free_kb: u64) -> Option<Self> {
        if free_kb > total_kb {
            return None;
        }
        Some(Self {
            total_kb,
            free_kb,
            usage_ratio: usage_ratio(total_kb, free_kb),
        })
    }
}

/// `1 - free/total` rounded to 4 places; a zero total yields `0.0`.
pub fn usage_ratio(total: u64, free: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round4(1.0 - free as f64 / total as f64).clamp(0.0, 1.0)
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Per-platform way of gathering each snapshot facet.
pub trait PlatformStrategy: Send + Sync {
    fn platform(&self) -> Platform;
    fn cpu_load(&self) -> Result<f64, ProbeError>;
    fn database_running(&self, names: &BTreeSet<String>) -> bool;
    fn uptime(&self) -> Result<u64, ProbeError>;
    fn disk_space(&self, path: &Path) -> Result<Usage, ProbeError>;
    fn memory(&self) -> Result<Usage, ProbeError>;
}

pub fn strategy_for(platform: Platform, facts: Arc<dyn OsFacts>) -> Arc<dyn PlatformStrategy> {
    match platform {
        Platform::Posix => Arc::new(posix::PosixStrategy::new(facts)),
        Platform::Windows => Arc::new(windows::WindowsStrategy::new(facts)),
    }
}

/// Disk space is queried the same way on every platform.
pub(crate) fn disk_usage(facts: &dyn OsFacts, path: &Path) -> Result<Usage, ProbeError> {
    let space = facts
        .disk_space(path)
        .map_err(|err| ProbeError::unavailable("disk", err.to_string()))?;
    Usage::from_kb(
        space.total_bytes / BYTES_PER_KB,
        space.available_bytes / BYTES_PER_KB,
    )
    .ok_or_else(|| ProbeError::unavailable("disk", "free space exceeds total"))
}

/// Test double returning canned text per fact.
#[cfg(test)]
pub(crate) mod canned {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct CannedFacts {
        pub texts: HashMap<Fact, String>,
        pub cpus: usize,
        pub disk: Option<DiskSpace>,
    }

    impl CannedFacts {
        pub fn new() -> Self {
            Self {
                cpus: 1,
                ..Self::default()
            }
        }

        pub fn with(mut self, fact: Fact, text: &str) -> Self {
            self.texts.insert(fact, text.to_string());
            self
        }

        pub fn with_cpus(mut self, cpus: usize) -> Self {
            self.cpus = cpus;
            self
        }

        pub fn with_disk(mut self, total_bytes: u64, available_bytes: u64) -> Self {
            self.disk = Some(DiskSpace {
                total_bytes,
                available_bytes,
            });
            self
        }
    }

    impl OsFacts for CannedFacts {
        fn read(&self, fact: &Fact) -> Result<String, FactError> {
            self.texts.get(fact).cloned().ok_or(FactError::Status {
                command: format!("{fact:?}"),
                status: "exit status: 1".to_string(),
            })
        }

        fn cpu_count(&self) -> Result<usize, FactError> {
            if self.cpus == 0 {
                return Err(FactError::Unsupported("cpu count"));
            }
            Ok(self.cpus)
        }

        fn disk_space(&self, path: &Path) -> Result<DiskSpace, FactError> {
            self.disk.ok_or_else(|| FactError::Path {
                path: path.display().to_string(),
                source: std::io::ErrorKind::NotFound.into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::canned::CannedFacts;
    use super::*;

    #[test]
    fn ratio_for_known_disk() {
        let usage = Usage::from_kb(102_400_000, 40_960_000).unwrap();
        assert_eq!(usage.usage_ratio, 0.6);
    }

    #[test]
    fn zero_total_gives_zero_ratio() {
        assert_eq!(usage_ratio(0, 0), 0.0);
        let usage = Usage::from_kb(0, 0).unwrap();
        assert_eq!(usage.usage_ratio, 0.0);
    }

    #[test]
    fn free_above_total_is_rejected() {
        assert!(Usage::from_kb(10, 11).is_none());
    }

    #[test]
    fn ratio_stays_in_unit_interval() {
        let totals = [1_u64, 2, 3, 7, 1024, 999_999, 16_384_000, u64::MAX / 2];
        for total in totals {
            let step = (total / 13).max(1);
            let mut free = 0;
            while free <= total {
                let ratio = usage_ratio(total, free);
                assert!((0.0..=1.0).contains(&ratio), "{free}/{total} -> {ratio}");
                assert_eq!(ratio, round4(ratio));
                free = match free.checked_add(step) {
                    Some(v) => v,
                    None => break,
                };
            }
            assert_eq!(usage_ratio(total, total), 0.0);
            assert_eq!(usage_ratio(total, 0), 1.0);
        }
    }

    #[test]
    fn round4_rounds_half_away_from_zero() {
        assert_eq!(round4(0.12345), 0.1235);
        assert_eq!(round4(0.25), 0.25);
        assert_eq!(round4(0.99999), 1.0);
    }

    #[test]
    fn disk_usage_converts_bytes_to_binary_kb() {
        let facts = CannedFacts::new().with_disk(102_400_000 * 1024 + 1023, 40_960_000 * 1024);
        let usage = disk_usage(&facts, Path::new(".")).unwrap();
        assert_eq!(usage.total_kb, 102_400_000);
        assert_eq!(usage.free_kb, 40_960_000);
        assert_eq!(usage.usage_ratio, 0.6);
    }

    #[test]
    fn disk_usage_failure_is_sampler_unavailable() {
        let facts = CannedFacts::new();
        let err = disk_usage(&facts, Path::new("/nowhere")).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::SamplerUnavailable { sampler: "disk", .. }
        ));
    }

    #[test]
    fn strategy_for_selects_platform() {
        let facts: Arc<dyn OsFacts> = Arc::new(CannedFacts::new());
        assert_eq!(strategy_for(Platform::Posix, facts.clone()).platform(), Platform::Posix);
        assert_eq!(strategy_for(Platform::Windows, facts).platform(), Platform::Windows);
    }
}
