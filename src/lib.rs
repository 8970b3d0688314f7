// Core modules
pub mod api;
pub mod auth;
pub mod broker;
pub mod config;
mod db;
pub mod signin;
pub mod ssh;
pub mod sweeper;
pub mod token;
pub mod types;
mod utils;

// Re-export key types and functions
pub use api::{AppState, create_router};
pub use auth::{SessionManager, UserStore};
pub use broker::Broker;
pub use config::{Links, ServerConfig, log_filter};
pub use db::{DatabaseConfig, Db, create_connection, ensure_schema};
pub use signin::{ConfirmationWaiter, SigninRequestStore, WaiterMode};
pub use ssh::{CaptureServer, SigninIssuer, load_host_key};
pub use sweeper::Sweeper;
pub use types::Fingerprint;
pub use utils::fingerprint;

use std::sync::Arc;

/// Everything `serve` runs, wired to one store and one broker.
pub struct Services {
    pub state: AppState,
    pub issuer: Arc<SigninIssuer>,
    pub sweeper: Sweeper,
}

/// Assemble the stores, waiter, SSH issuer and sweeper.
///
/// `host_fingerprint` is shown to users so they can check the SSH host key.
/// Spawns the notification broker, so it must run inside a Tokio runtime.
pub fn create_services(db: Db, config: &ServerConfig, host_fingerprint: Fingerprint) -> Services {
    let broker = Broker::spawn();
    let signins = SigninRequestStore::new(db.clone(), broker);
    let sessions = SessionManager::new(db.clone());

    let state = AppState {
        waiter: ConfirmationWaiter::new(signins.clone(), config.waiter_mode()),
        signins: signins.clone(),
        sessions: sessions.clone(),
        users: UserStore::new(db),
        links: config.links(),
        host_fingerprint,
    };

    Services {
        issuer: Arc::new(SigninIssuer::new(
            signins.clone(),
            config.http_advertise.clone(),
        )),
        sweeper: Sweeper::new(signins, sessions, config.sweep_interval()),
        state,
    }
}
