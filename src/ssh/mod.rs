//! SSH endpoint that captures the public key a client authenticates with.
//!
//! Any key is accepted. A `shell` request on a `session` channel hands the
//! captured key to a [`KeyIssuer`], writes its answer to the client and closes
//! the channel. Nothing else is served.

mod handler;
mod issuer;
mod server;

pub use handler::CaptureHandler;
pub use issuer::{CONFIRMED_MESSAGE, SigninIssuer, TERMINAL_HINT, signin_url};
pub use server::{CaptureServer, load_host_key};

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Sent to the client's stderr whenever the issuer fails.
pub const APOLOGY: &str = "Sorry, there was an error signing you in :(";

/// What the client presented during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedKey {
    /// SSH login name, e.g. the `<token>` in `ssh <token>@host`.
    pub login: String,
    /// Public key in SSH wire format.
    pub pubkey: Vec<u8>,
}

/// Callback invoked once per shell request with the captured key.
///
/// The returned string is written to the client's stdout as a single line.
pub trait KeyIssuer: Send + Sync {
    fn issue(
        &self,
        key: CapturedKey,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;
}

/// Advice attached to an issuer failure, printed on the line after the apology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueHint(pub &'static str);

impl fmt::Display for IssueHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Bytes to write back on the shell channel and which stream they go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellReply {
    Stdout(String),
    Stderr(String),
}

impl ShellReply {
    pub fn from_issued(issued: anyhow::Result<String>) -> Self {
        match issued {
            Ok(message) => Self::Stdout(format!("{}\r\n", message)),
            Err(err) => {
                tracing::warn!(error = %err, "key issuer failed");
                let mut text = format!("{}\r\n", APOLOGY);
                if let Some(hint) = err.downcast_ref::<IssueHint>() {
                    text.push_str(&format!("{}\r\n", hint));
                }
                Self::Stderr(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_success_goes_to_stdout() {
        let reply = ShellReply::from_issued(Ok("http://localhost:3000/signin/ybndrfg8ejkm".into()));
        assert_eq!(
            reply,
            ShellReply::Stdout("http://localhost:3000/signin/ybndrfg8ejkm\r\n".into())
        );
    }

    #[test]
    fn test_reply_failure_is_generic() {
        let reply = ShellReply::from_issued(Err(anyhow::anyhow!("store is down")));
        match reply {
            ShellReply::Stderr(text) => {
                assert!(text.starts_with(APOLOGY));
                assert!(!text.contains("store is down"));
            }
            other => panic!("expected stderr reply, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_failure_carries_hint() {
        let err = anyhow::anyhow!("unknown token").context(IssueHint("try again"));
        assert_eq!(
            ShellReply::from_issued(Err(err)),
            ShellReply::Stderr(format!("{}\r\ntry again\r\n", APOLOGY))
        );
    }
}
