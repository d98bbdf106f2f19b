use crate::collectors::{PlatformStrategy, Usage};
use crate::error::ProbeError;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::warn;

/// One request's worth of metrics. Built fresh per request, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub cpu_load: f64,
    pub database_active: bool,
    pub uptime_seconds: u64,
    pub disk: Usage,
    pub memory: Usage,
}

pub struct Assembler {
    strategy: Arc<dyn PlatformStrategy>,
    database_processes: Arc<BTreeSet<String>>,
    disk_path: Arc<PathBuf>,
    timeout: Duration,
}

impl Assembler {
    pub fn new(
        strategy: Arc<dyn PlatformStrategy>,
        database_processes: BTreeSet<String>,
        disk_path: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            strategy,
            database_processes: Arc::new(database_processes),
            disk_path: Arc::new(disk_path),
            timeout,
        }
    }

    /// Runs every sampler concurrently and waits for all of them. Any failure
    /// aborts the whole snapshot; a partial record is never produced.
    pub async fn assemble(&self) -> Result<Snapshot, ProbeError> {
        let cpu = {
            let strategy = self.strategy.clone();
            blocking("cpu", move || strategy.cpu_load())
        };
        let database = {
            let strategy = self.strategy.clone();
            let names = self.database_processes.clone();
            blocking("database", move || Ok(strategy.database_running(&names)))
        };
        let uptime = {
            let strategy = self.strategy.clone();
            blocking("uptime", move || strategy.uptime())
        };
        let disk = {
            let strategy = self.strategy.clone();
            let path = self.disk_path.clone();
            blocking("disk", move || strategy.disk_space(&path))
        };
        let memory = {
            let strategy = self.strategy.clone();
            blocking("memory", move || strategy.memory())
        };

        let joined = tokio::time::timeout(self.timeout, async {
            tokio::join!(cpu, database, uptime, disk, memory)
        })
        .await;
        let (cpu, database, uptime, disk, memory) = match joined {
            Ok(results) => results,
            Err(_) => {
                let err = ProbeError::unavailable(
                    "snapshot",
                    format!("samplers did not finish within {:?}", self.timeout),
                );
                warn!(platform = %self.strategy.platform(), error = %err, "snapshot timed out");
                return Err(err);
            }
        };

        let snapshot = Snapshot {
            cpu_load: cpu?,
            database_active: database?,
            uptime_seconds: uptime?,
            disk: disk?,
            memory: memory?,
        };
        Ok(snapshot)
    }
}

async fn blocking<T, F>(sampler: &'static str, f: F) -> Result<T, ProbeError>
where
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    let result = match task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(err) => Err(ProbeError::unavailable(sampler, format!("sampler task failed: {err}"))),
    };
    if let Err(err) = &result {
        warn!(sampler, error = %err, "sampler failed");
    }
    result
}

/// Strategy double with fixed readings and switchable failures.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::platform::Platform;
    use std::path::Path;

    #[derive(Clone)]
    pub struct FakeStrategy {
        pub cpu_load: f64,
        pub running: Vec<String>,
        pub uptime: u64,
        pub disk: Usage,
        pub memory: Usage,
        pub failing: Option<&'static str>,
        pub delay: Option<Duration>,
    }

    impl Default for FakeStrategy {
        fn default() -> Self {
            Self {
                cpu_load: 0.23,
                running: vec!["mysqld".to_string()],
                uptime: 128_340,
                disk: Usage::from_kb(102_400_000, 40_960_000).unwrap(),
                memory: Usage::from_kb(16_384_000, 4_096_000).unwrap(),
                failing: None,
                delay: None,
            }
        }
    }

    impl FakeStrategy {
        pub fn failing(sampler: &'static str) -> Self {
            Self {
                failing: Some(sampler),
                ..Self::default()
            }
        }

        fn check(&self, sampler: &'static str) -> Result<(), ProbeError> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.failing == Some(sampler) {
                return Err(ProbeError::unavailable(sampler, "forced failure"));
            }
            Ok(())
        }
    }

    impl PlatformStrategy for FakeStrategy {
        fn platform(&self) -> Platform {
            Platform::Posix
        }

        fn cpu_load(&self) -> Result<f64, ProbeError> {
            self.check("cpu")?;
            Ok(self.cpu_load)
        }

        fn database_running(&self, names: &BTreeSet<String>) -> bool {
            self.running.iter().any(|p| names.contains(p))
        }

        fn uptime(&self) -> Result<u64, ProbeError> {
            self.check("uptime")?;
            Ok(self.uptime)
        }

        fn disk_space(&self, _path: &Path) -> Result<Usage, ProbeError> {
            self.check("disk")?;
            Ok(self.disk)
        }

        fn memory(&self) -> Result<Usage, ProbeError> {
            self.check("memory")?;
            Ok(self.memory)
        }
    }

    pub fn assembler(strategy: FakeStrategy) -> Assembler {
        Assembler::new(
            Arc::new(strategy),
            ["mysql", "mysqld.exe", "mysqld"]
                .into_iter()
                .map(String::from)
                .collect(),
            PathBuf::from("."),
            Duration::from_secs(5),
        )
    }
}
