use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::PublicKey;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tracing::{debug, info, warn};

use crate::ssh::{APOLOGY, CapturedKey, KeyIssuer, ShellReply};
use crate::utils::fingerprint;

/// SSH_EXTENDED_DATA_STDERR
const STDERR: u32 = 1;

/// Per-connection state. One shell request is served, then the channel closes.
pub struct CaptureHandler {
    issuer: Arc<dyn KeyIssuer>,
    peer: Option<SocketAddr>,
    captured: Option<CapturedKey>,
    served: bool,
}

impl CaptureHandler {
    pub fn new(issuer: Arc<dyn KeyIssuer>, peer: Option<SocketAddr>) -> Self {
        Self {
            issuer,
            peer,
            captured: None,
            served: false,
        }
    }

    async fn reply(&mut self) -> ShellReply {
        match self.captured.clone() {
            Some(key) => ShellReply::from_issued(self.issuer.issue(key).await),
            None => {
                warn!(peer = ?self.peer, "shell request without a captured key");
                ShellReply::Stderr(format!("{}\r\n", APOLOGY))
            }
        }
    }
}

impl Handler for CaptureHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        match public_key.to_bytes() {
            Ok(pubkey) => {
                info!(
                    peer = ?self.peer,
                    fingerprint = %fingerprint(&pubkey),
                    "public key captured"
                );
                self.captured = Some(CapturedKey {
                    login: user.to_string(),
                    pubkey,
                });
            }
            // Still accepted; the shell request answers with the apology.
            Err(err) => warn!(peer = ?self.peer, error = %err, "could not encode public key"),
        }
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.served {
            session.channel_failure(channel)?;
            return Ok(());
        }
        self.served = true;
        session.channel_success(channel)?;

        match self.reply().await {
            ShellReply::Stdout(text) => session.data(channel, CryptoVec::from(text))?,
            ShellReply::Stderr(text) => {
                session.extended_data(channel, STDERR, CryptoVec::from(text))?
            }
        }

        session.eof(channel)?;
        session.close(channel)?;
        debug!(peer = ?self.peer, "shell request served");
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        _name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel)?;
        Ok(())
    }
}
