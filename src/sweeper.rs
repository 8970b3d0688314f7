//! Periodic removal of expired signin requests and idle sessions.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::auth::SessionManager;
use crate::signin::SigninRequestStore;
use crate::utils::unix_now;

/// Rows removed by one sweep. `None` means that deletion failed and was logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub signin_requests: Option<usize>,
    pub sessions: Option<usize>,
}

#[derive(Clone)]
pub struct Sweeper {
    signins: SigninRequestStore,
    sessions: SessionManager,
    interval: Duration,
}

impl Sweeper {
    pub fn new(signins: SigninRequestStore, sessions: SessionManager, interval: Duration) -> Self {
        Self {
            signins,
            sessions,
            interval,
        }
    }

    /// Delete everything that has expired as of `now`.
    ///
    /// The two deletions are independent; one failing does not skip the other.
    pub async fn sweep_once(&self, now: i64) -> SweepReport {
        let signin_requests = match self.signins.delete_expired(now).await {
            Ok(count) => Some(count),
            Err(err) => {
                error!(error = %err, "sweeping expired signin requests");
                None
            }
        };

        let sessions = match self.sessions.delete_inactive(now).await {
            Ok(count) => Some(count),
            Err(err) => {
                error!(error = %err, "sweeping inactive sessions");
                None
            }
        };

        SweepReport {
            signin_requests,
            sessions,
        }
    }

    /// Run on a fixed interval until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep_once(unix_now()).await;
                        debug!(?report, "sweep finished");
                    }
                }
            }

            info!("sweeper stopped");
        })
    }
}
