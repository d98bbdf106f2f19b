mod auth;
mod client;
mod collectors;
mod config;
mod daemon;
mod error;
mod http;
mod platform;
mod service;
mod snapshot;
mod wire;

use auth::DigestAlgorithm;
use axum::serve;
use clap::Parser;
use client::ProbeClient;
use collectors::system::SystemFacts;
use config::Config;
use daemon::DaemonSettings;
use platform::Platform;
use service::PulseService;
use snapshot::Assembler;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "pulsed")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Sample once without authentication and print the record.
    #[arg(long)]
    once: bool,
    /// Print the digest of TOKEN for auth.expected_digest.
    #[arg(long, value_name = "TOKEN")]
    hash_token: Option<String>,
    #[arg(long, value_enum, requires = "hash_token")]
    algorithm: Option<DigestAlgorithm>,
    /// Poll one or more probe URLs and print a report for each.
    #[arg(
        long,
        value_name = "URL",
        value_delimiter = ',',
        conflicts_with_all = ["once", "hash_token"]
    )]
    probe: Vec<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    if let Some(token) = cli.hash_token.as_deref() {
        let algorithm = cli.algorithm.unwrap_or_else(|| {
            Config::load_from_file(&cli.config)
                .map(|cfg| cfg.auth.algorithm)
                .unwrap_or(DigestAlgorithm::Gost)
        });
        println!("{}", algorithm.hex_digest(token));
        return;
    }

    if !cli.probe.is_empty() {
        let delimiter = Config::load_from_file(&cli.config)
            .map(|cfg| cfg.delimiter)
            .unwrap_or_else(|_| ":".to_string());
        let client = ProbeClient::new(&delimiter, PROBE_TIMEOUT);
        for block in client.report_all(&cli.probe).await {
            println!("{block}");
        }
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let platform = match Platform::current() {
        Ok(platform) => platform,
        Err(err) => {
            error!(error = %err, "unsupported platform");
            std::process::exit(1);
        }
    };

    let strategy = collectors::strategy_for(platform, Arc::new(SystemFacts::new(cfg.sampler_timeout())));
    let assembler = Assembler::new(
        strategy,
        cfg.database_process_set(),
        cfg.disk_path.clone(),
        cfg.sampler_timeout(),
    );
    let service = PulseService::new(cfg.access_guard(), assembler, &cfg.delimiter);

    if cli.once {
        match service.sample().await {
            Ok(record) => println!("{record}"),
            Err(err) => {
                error!(kind = err.kind(), error = %err, "sampling failed");
                std::process::exit(1);
            }
        }
        return;
    }

    info!(
        listen = %cfg.listen,
        path = %cfg.path,
        %platform,
        daemon = cfg.daemon.enabled,
        "starting pulsed"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let http_listener = bind_or_exit("listen", &cfg.listen).await;
    let daemon_listener = if cfg.daemon.enabled {
        Some(bind_or_exit("daemon.listen", &cfg.daemon.listen).await)
    } else {
        None
    };

    let http_task = {
        let app = http::build_router(&cfg.path, service.clone());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(http_listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let daemon_task = daemon_listener.map(|listener| {
        let settings = DaemonSettings::from(&cfg.daemon);
        let service = service.clone();
        let shutdown = shutdown_tx.clone();
        info!(listen = %cfg.daemon.listen, "pulse daemon listening");
        tokio::spawn(daemon::serve(listener, service, settings, shutdown))
    });

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error!(error = %err, "failed to wait for Ctrl+C");
            }
            info!("received Ctrl+C, shutting down");
        }
        _ = shutdown_rx.changed() => {
            info!("remote shutdown received, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);

    if let Some(task) = daemon_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

async fn bind(listen: &str) -> io::Result<TcpListener> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    TcpListener::bind(addr).await
}

/// A listener that cannot bind is fatal; serving nothing is not a valid state.
async fn bind_or_exit(field: &str, listen: &str) -> TcpListener {
    match bind(listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, field, listen = %listen, "failed to bind listener");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
