use crate::snapshot::Snapshot;
use crate::wire::{self, WireError};
use reqwest::{Client, Url};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const KB_PER_GIB: f64 = 1_048_576.0;

#[derive(Debug, Error)]
pub enum ProbeClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(#[from] WireError),
}

/// Polls probe endpoints and renders what they report.
pub struct ProbeClient {
    http: Client,
    delimiter: String,
}

impl ProbeClient {
    pub fn new(delimiter: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent(concat!("pulsed/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            delimiter: delimiter.to_string(),
        }
    }

    pub async fn probe(&self, url: &str) -> Result<Snapshot, ProbeClientError> {
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(wire::decode(&body, &self.delimiter)?)
    }

    /// Probes every URL on its own and returns one report block per URL.
    pub async fn report_all(&self, urls: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(urls.len());
        for raw in urls {
            let url = normalize_url(raw);
            let mut block = format!("probing {url}\n");
            match self.probe(&url).await {
                Ok(snapshot) => block.push_str(&render_report(&host_of(&url), &snapshot)),
                Err(ProbeClientError::Decode(err)) => {
                    debug!(url = %url, error = %err, "probe returned no record");
                    block.push_str("failed...\n");
                }
                Err(err) => {
                    let _ = writeln!(block, "pulse error for {url}: {err}");
                }
            }
            out.push(block);
        }
        out
    }
}

pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str().map(|h| match u.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            })
        })
        .unwrap_or_else(|| url.to_string())
}

fn gib(kb: u64) -> String {
    format!("{:.2}", kb as f64 / KB_PER_GIB)
}

pub fn render_report(host: &str, snapshot: &Snapshot) -> String {
    let uptime = Duration::from_secs(snapshot.uptime_seconds);
    let mut out = String::new();
    let _ = writeln!(out, "is alive...");
    let _ = writeln!(out, "host: {host}");
    let _ = writeln!(out, "cpu: {}", wire::format_ratio(snapshot.cpu_load));
    let _ = writeln!(
        out,
        "database: {}",
        if snapshot.database_active { "up" } else { "down" }
    );
    let _ = writeln!(
        out,
        "uptime: {} second(s) ({})",
        snapshot.uptime_seconds,
        humantime::format_duration(uptime)
    );
    let _ = writeln!(out, "free disk: {}gb", gib(snapshot.disk.free_kb));
    let _ = writeln!(out, "total disk: {}gb", gib(snapshot.disk.total_kb));
    let _ = writeln!(out, "free ram: {}gb", gib(snapshot.memory.free_kb));
    let _ = writeln!(out, "total ram: {}gb", gib(snapshot.memory.total_kb));
    let _ = writeln!(out, "disk usage: {}", wire::format_ratio(snapshot.disk.usage_ratio));
    let _ = writeln!(out, "ram usage: {}", wire::format_ratio(snapshot.memory.usage_ratio));
    out
}
