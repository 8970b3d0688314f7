use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::keys::PrivateKey;
use russh::server::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ssh::{CaptureHandler, KeyIssuer};

/// Read an OpenSSH private key, expanding a leading `~`.
pub fn load_host_key(path: &str) -> Result<PrivateKey> {
    let expanded = shellexpand::tilde(path);
    russh::keys::load_secret_key(Path::new(expanded.as_ref()), None)
        .with_context(|| format!("reading SSH host key from {}", expanded))
}

/// Listener loop handing every accepted connection to its own task.
pub struct CaptureServer {
    config: Arc<Config>,
    issuer: Arc<dyn KeyIssuer>,
}

impl CaptureServer {
    pub fn new(host_key: PrivateKey, issuer: Arc<dyn KeyIssuer>) -> Self {
        let config = Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        Self {
            config: Arc::new(config),
            issuer,
        }
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Accept errors are logged and the loop carries on. A failing handshake
    /// only ends its own task.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr().context("reading SSH listener address")?;
        info!(addr = %local, "SSH capture server listening");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "accepting SSH connection");
                    continue;
                }
            };

            let config = self.config.clone();
            let handler = CaptureHandler::new(self.issuer.clone(), Some(peer));
            tokio::spawn(async move {
                debug!(peer = %peer, "SSH connection accepted");
                match russh::server::run_stream(config, stream, handler).await {
                    Ok(session) => {
                        if let Err(err) = session.await {
                            debug!(peer = %peer, error = %err, "SSH session ended with error");
                        }
                    }
                    Err(err) => warn!(peer = %peer, error = %err, "SSH handshake failed"),
                }
            });
        }

        info!("SSH capture server stopped");
        Ok(())
    }
}
