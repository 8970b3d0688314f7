use std::net::SocketAddr;
use std::time::Duration;

use clap::Args;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::db::DatabaseConfig;
use crate::signin::WaiterMode;
use crate::ssh::signin_url;

/// Settings for `keyhole serve`. Every flag can also come from the environment.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Private key (OpenSSH format) the SSH server identifies itself with
    #[arg(long, env = "KEYHOLE_SSH_KEY", default_value = "ssh-identity")]
    pub ssh_key: String,

    /// Address the SSH server listens on
    #[arg(long, env = "KEYHOLE_SSH_LISTEN", default_value = "0.0.0.0:2022")]
    pub ssh_listen: SocketAddr,

    /// Host and port of the SSH server as users reach it
    #[arg(long, env = "KEYHOLE_SSH_ADVERTISE", default_value = "localhost:2022")]
    pub ssh_advertise: String,

    /// Address the HTTP server listens on
    #[arg(long, env = "KEYHOLE_HTTP_LISTEN", default_value = "0.0.0.0:3000")]
    pub http_listen: SocketAddr,

    /// Public base URL of the HTTP server, used in signin links
    #[arg(long, env = "KEYHOLE_HTTP_ADVERTISE", default_value = "http://localhost:3000")]
    pub http_advertise: Url,

    /// Store URL, e.g. `memory`, `surrealkv://data` or `ws://db:8000`
    #[arg(long, env = "KEYHOLE_DB_URL", default_value = "memory")]
    pub db_url: String,

    /// Keep confirmation streams open after the first event
    #[arg(long, env = "KEYHOLE_KEEP_LISTENING", default_value_t = false)]
    pub keep_listening: bool,

    /// Seconds between sweeps of expired signin requests and sessions
    #[arg(long, env = "KEYHOLE_SWEEP_INTERVAL", default_value_t = 60)]
    pub sweep_interval_secs: u64,
}

impl ServerConfig {
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.db_url.clone(),
            ..Default::default()
        }
    }

    pub fn waiter_mode(&self) -> WaiterMode {
        if self.keep_listening {
            WaiterMode::KeepListening
        } else {
            WaiterMode::Once
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn links(&self) -> Links {
        Links {
            ssh_advertise: self.ssh_advertise.clone(),
            http_advertise: self.http_advertise.clone(),
        }
    }
}

/// Directives used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_DIRECTIVES: &str = "keyhole=info,russh=warn";

/// Log filter built from `RUST_LOG`, falling back to [`DEFAULT_LOG_DIRECTIVES`].
pub fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVES))
}

/// Public addresses shown to users.
#[derive(Debug, Clone)]
pub struct Links {
    pub ssh_advertise: String,
    pub http_advertise: Url,
}

impl Links {
    /// Command a user runs to confirm `token`, e.g. `ssh -p 2022 <token>@localhost`.
    pub fn ssh_command(&self, token: &str) -> String {
        match self.ssh_advertise.rsplit_once(':') {
            Some((host, "22")) => format!("ssh {}@{}", token, host),
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                format!("ssh -p {} {}@{}", port, token, host)
            }
            _ => format!("ssh {}@{}", token, self.ssh_advertise),
        }
    }

    pub fn signin_url(&self, token: &str) -> anyhow::Result<Url> {
        signin_url(&self.http_advertise, token)
    }

    /// URL of the confirmation event stream for `token`.
    pub fn events_url(&self, token: &str) -> anyhow::Result<String> {
        Ok(format!("{}/events", self.signin_url(token)?))
    }
}
