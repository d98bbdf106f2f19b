use crate::config::DaemonConfig;
use crate::error::ProbeError;
use crate::service::PulseService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

const BUFFER_LEN: usize = 512;
const CMD_CLOSE: &str = "dc";
const CMD_SHUTDOWN: &str = "kserv";

#[derive(Debug, Clone, Copy)]
pub struct DaemonSettings {
    pub idle_timeout: Duration,
    pub allow_remote_shutdown: bool,
}

impl From<&DaemonConfig> for DaemonSettings {
    fn from(cfg: &DaemonConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
            allow_remote_shutdown: cfg.allow_remote_shutdown,
        }
    }
}

/// Accepts connections until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    service: PulseService,
    settings: DaemonSettings,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("pulse daemon stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let service = service.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(handle_connection(stream, peer, service, settings, shutdown));
                    }
                    Err(err) => warn!(error = %err, "failed to accept daemon connection"),
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    service: PulseService,
    settings: DaemonSettings,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut buf = [0_u8; BUFFER_LEN];
    let mut authenticated = false;

    loop {
        let n = match time::timeout(settings.idle_timeout, stream.read(&mut buf)).await {
            Err(_) => {
                debug!(%peer, "idle daemon connection closed");
                return;
            }
            Ok(Err(err)) => {
                debug!(%peer, error = %err, "daemon read failed");
                return;
            }
            Ok(Ok(0)) => return,
            Ok(Ok(n)) => n,
        };
        let raw = String::from_utf8_lossy(&buf[..n]);
        let message = raw.trim_end_matches(['\r', '\n']);

        match service.respond(message).await {
            Ok(record) => {
                if let Err(err) = stream.write_all(record.as_bytes()).await {
                    debug!(%peer, error = %err, "daemon write failed");
                    return;
                }
                authenticated = true;
            }
            Err(ProbeError::AuthorizationFailure) if !authenticated => {
                warn!(%peer, "rejected daemon connection");
                return;
            }
            Err(ProbeError::AuthorizationFailure) => match message {
                CMD_CLOSE => return,
                CMD_SHUTDOWN if settings.allow_remote_shutdown => {
                    info!(%peer, "remote shutdown requested");
                    let _ = shutdown.send(true);
                    return;
                }
                CMD_SHUTDOWN => warn!(%peer, "remote shutdown is disabled"),
                _ => {}
            },
            Err(err) => {
                warn!(%peer, kind = err.kind(), error = %err, "daemon probe failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{service, TOKEN};
    use crate::snapshot::fake::FakeStrategy;

    async fn start(
        strategy: FakeStrategy,
        allow_remote_shutdown: bool,
    ) -> (SocketAddr, Arc<watch::Sender<bool>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _rx) = watch::channel(false);
        let tx = Arc::new(tx);
        let settings = DaemonSettings {
            idle_timeout: Duration::from_secs(5),
            allow_remote_shutdown,
        };
        tokio::spawn(serve(listener, service(strategy), settings, tx.clone()));
        (addr, tx)
    }

    async fn exchange(stream: &mut TcpStream, message: &str) -> Option<String> {
        stream.write_all(message.as_bytes()).await.ok()?;
        let mut buf = [0_u8; BUFFER_LEN];
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(String::from_utf8_lossy(&buf[..n]).to_string()),
        }
    }

    #[tokio::test]
    async fn key_yields_record_and_repeats() {
        let (addr, _tx) = start(FakeStrategy::default(), false).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let first = exchange(&mut stream, TOKEN).await.unwrap();
        assert_eq!(
            first,
            "0.23:1:128340:102400000:40960000:0.6:16384000:4096000:0.75"
        );
        let second = exchange(&mut stream, &format!("{TOKEN}\r\n")).await.unwrap();
        assert_eq!(second.split(':').count(), 9);
    }

    #[tokio::test]
    async fn wrong_key_closes_connection() {
        let (addr, _tx) = start(FakeStrategy::default(), false).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(exchange(&mut stream, "wrong").await, None);
    }

    #[tokio::test]
    async fn commands_need_authentication() {
        let (addr, tx) = start(FakeStrategy::default(), true).await;
        let mut rx = tx.subscribe();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(exchange(&mut stream, "kserv").await, None);
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn dc_closes_connection() {
        let (addr, _tx) = start(FakeStrategy::default(), false).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        exchange(&mut stream, TOKEN).await.unwrap();
        assert_eq!(exchange(&mut stream, "dc").await, None);
    }

    #[tokio::test]
    async fn kserv_signals_shutdown_when_allowed() {
        let (addr, tx) = start(FakeStrategy::default(), true).await;
        let mut rx = tx.subscribe();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        exchange(&mut stream, TOKEN).await.unwrap();
        stream.write_all(b"kserv").await.unwrap();

        time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("shutdown signalled")
            .unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn sampler_failure_closes_without_record() {
        let (addr, _tx) = start(FakeStrategy::failing("disk"), false).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(exchange(&mut stream, TOKEN).await, None);
    }
}
