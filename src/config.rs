use crate::auth::{AccessGuard, DigestAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default = "default_path")]
    pub path: String,
    pub auth: AuthConfig,
    #[serde(default = "default_database_processes")]
    pub database_processes: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    #[serde(default = "default_sampler_timeout_secs")]
    pub sampler_timeout_secs: u64,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: DigestAlgorithm,
    pub expected_digest: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_daemon_listen")]
    pub listen: String,
    #[serde(default)]
    pub allow_remote_shutdown: bool,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_daemon_listen(),
            allow_remote_shutdown: false,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let mut cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.auth.expected_digest = cfg.auth.expected_digest.trim().to_ascii_lowercase();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_listen("listen", &self.listen)?;
        if !self.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "path must start with '/'".to_string(),
            ));
        }
        if self.sampler_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "sampler_timeout_secs must be >= 1".to_string(),
            ));
        }

        validate_auth(&self.auth)?;
        validate_database_processes(&self.database_processes)?;
        validate_delimiter(&self.delimiter)?;

        if self.daemon.enabled {
            validate_listen("daemon.listen", &self.daemon.listen)?;
        }
        if self.daemon.idle_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "daemon.idle_timeout_secs must be >= 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }

    pub fn access_guard(&self) -> AccessGuard {
        AccessGuard::new(self.auth.algorithm, &self.auth.expected_digest)
    }

    pub fn database_process_set(&self) -> BTreeSet<String> {
        self.database_processes
            .iter()
            .map(|name| name.trim().to_string())
            .collect()
    }

    pub fn sampler_timeout(&self) -> Duration {
        Duration::from_secs(self.sampler_timeout_secs)
    }
}

fn validate_listen(field: &str, listen: &str) -> Result<(), ConfigError> {
    if listen.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} is required")));
    }
    if SocketAddr::from_str(listen).is_err() {
        return Err(ConfigError::Validation(format!(
            "{field} must be a host:port socket address"
        )));
    }
    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let digest = auth.expected_digest.trim();
    if digest.len() != auth.algorithm.hex_len() {
        return Err(ConfigError::Validation(format!(
            "auth.expected_digest must be {} hex characters for {:?}",
            auth.algorithm.hex_len(),
            auth.algorithm
        )));
    }
    if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ConfigError::Validation(
            "auth.expected_digest must be hexadecimal".to_string(),
        ));
    }
    Ok(())
}

fn validate_database_processes(names: &[String]) -> Result<(), ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::Validation(
            "database_processes must list at least one process name".to_string(),
        ));
    }
    if names.iter().any(|n| n.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "database_processes[*] must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// The delimiter must never occur inside a rendered field.
fn validate_delimiter(delimiter: &str) -> Result<(), ConfigError> {
    if delimiter.is_empty() {
        return Err(ConfigError::Validation(
            "delimiter must not be empty".to_string(),
        ));
    }
    if delimiter
        .chars()
        .any(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '.' | '-' | '+'))
    {
        return Err(ConfigError::Validation(format!(
            "delimiter '{delimiter}' would clash with rendered numbers"
        )));
    }
    Ok(())
}

fn default_path() -> String {
    "/nslserva".to_string()
}

const fn default_algorithm() -> DigestAlgorithm {
    DigestAlgorithm::Gost
}

fn default_database_processes() -> Vec<String> {
    ["mysql", "mysqld.exe", "mysqld"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_delimiter() -> String {
    ":".to_string()
}

fn default_disk_path() -> PathBuf {
    PathBuf::from(".")
}

const fn default_sampler_timeout_secs() -> u64 {
    10
}

fn default_daemon_listen() -> String {
    "0.0.0.0:50110".to_string()
}

const fn default_idle_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            listen: "127.0.0.1:8080".to_string(),
            path: default_path(),
            auth: AuthConfig {
                algorithm: DigestAlgorithm::Sha256,
                expected_digest: DigestAlgorithm::Sha256.hex_digest("secret"),
            },
            database_processes: default_database_processes(),
            delimiter: default_delimiter(),
            disk_path: default_disk_path(),
            sampler_timeout_secs: 10,
            daemon: DaemonConfig::default(),
        }
    }

    #[test]
    fn example_config_is_valid() {
        let mut cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.auth.expected_digest = cfg.auth.expected_digest.to_ascii_lowercase();
        cfg.validate().expect("example validates");
        assert_eq!(cfg.auth.algorithm, DigestAlgorithm::Gost);
        assert_eq!(cfg.delimiter, ":");
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let yaml = format!(
            "listen: \"127.0.0.1:9000\"\nauth:\n  expected_digest: \"{}\"\n",
            DigestAlgorithm::Gost.hex_digest("x")
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.path, "/nslserva");
        assert_eq!(cfg.auth.algorithm, DigestAlgorithm::Gost);
        assert_eq!(cfg.sampler_timeout(), Duration::from_secs(10));
        assert!(!cfg.daemon.enabled);
        assert_eq!(
            cfg.database_process_set(),
            ["mysql", "mysqld", "mysqld.exe"]
                .into_iter()
                .map(String::from)
                .collect::<BTreeSet<String>>()
        );
    }

    #[test]
    fn rejects_bad_listen() {
        let mut cfg = valid_config();
        cfg.listen = "localhost".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_digest_of_wrong_length() {
        let mut cfg = valid_config();
        cfg.auth.algorithm = DigestAlgorithm::Sha512;
        assert!(cfg.validate().is_err());
        cfg.auth.algorithm = DigestAlgorithm::Sha256;
        cfg.auth.expected_digest = "zz".repeat(32);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_ambiguous_delimiters() {
        for bad in ["", ".", "1", " ", "-", "a+b"] {
            let mut cfg = valid_config();
            cfg.delimiter = bad.to_string();
            assert!(cfg.validate().is_err(), "delimiter {bad:?} must be rejected");
        }
        let mut cfg = valid_config();
        cfg.delimiter = "|".to_string();
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_empty_process_list() {
        let mut cfg = valid_config();
        cfg.database_processes.clear();
        assert!(cfg.validate().is_err());
        cfg.database_processes = vec!["  ".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn daemon_listen_checked_only_when_enabled() {
        let mut cfg = valid_config();
        cfg.daemon.listen = "nope".to_string();
        cfg.validate().unwrap();
        cfg.daemon.enabled = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn access_guard_uses_configured_digest() {
        let guard = valid_config().access_guard();
        assert!(guard.is_authorized("secret"));
        assert!(!guard.is_authorized("Secret"));
    }
}
