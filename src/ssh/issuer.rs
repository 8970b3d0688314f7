use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use tracing::info;
use url::Url;

use crate::signin::{Recorded, SigninError, SigninRequestStore};
use crate::ssh::{CapturedKey, IssueHint, KeyIssuer};
use crate::token::{TokenShape, is_well_formed};

/// Answer for a browser-first signin.
pub const CONFIRMED_MESSAGE: &str = "Signed in. You can return to your browser.";

/// Shown when a login name looked like a signin token but matched no request.
pub const TERMINAL_HINT: &str =
    "That signin link may have expired. To sign in from the terminal, connect with a different user name.";

/// `<base>/signin/<token>`, keeping any path prefix on `base`.
pub fn signin_url(base: &Url, token: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&format!("signin/{}", token))
        .with_context(|| format!("building signin URL on {}", base))
}

/// Feeds captured keys into the signin request store.
///
/// A login name shaped like a signin token confirms that pending request.
/// Any other login name starts a signin from the terminal: a request is
/// created with the key already attached and its URL is returned.
pub struct SigninIssuer {
    store: SigninRequestStore,
    http_advertise: Url,
}

impl SigninIssuer {
    pub fn new(store: SigninRequestStore, http_advertise: Url) -> Self {
        Self {
            store,
            http_advertise,
        }
    }

    async fn issue_for(&self, key: CapturedKey) -> Result<String> {
        if is_well_formed(&key.login)
            && let Some((id, secret)) = TokenShape::SIGNIN.split(&key.login)
        {
            let recorded = match self.store.record_pubkey(id, secret, &key.pubkey).await {
                Ok(recorded) => recorded,
                Err(SigninError::InvalidToken) => {
                    return Err(anyhow::Error::new(SigninError::InvalidToken)
                        .context(IssueHint(TERMINAL_HINT)));
                }
                Err(err) => return Err(err.into()),
            };
            if recorded == Recorded::Unchanged {
                info!(signin_id = %id, "signin request already confirmed with this key");
            }
            return Ok(CONFIRMED_MESSAGE.to_string());
        }

        let request = self.store.create_authenticated(&key.pubkey).await?;
        let url = signin_url(&self.http_advertise, &request.token())?;
        Ok(url.to_string())
    }
}

impl KeyIssuer for SigninIssuer {
    fn issue(
        &self,
        key: CapturedKey,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(self.issue_for(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::db::test_db;
    use crate::ssh::{APOLOGY, ShellReply};

    const KEY: &[u8] = b"\x00\x00\x00\x0bssh-ed25519 issuer";

    async fn setup() -> (SigninRequestStore, SigninIssuer) {
        let store = SigninRequestStore::new(test_db().await, Broker::spawn());
        let base = Url::parse("http://localhost:3000").unwrap();
        let issuer = SigninIssuer::new(store.clone(), base);
        (store, issuer)
    }

    fn captured(login: &str) -> CapturedKey {
        CapturedKey {
            login: login.to_string(),
            pubkey: KEY.to_vec(),
        }
    }

    #[test]
    fn test_signin_url_keeps_prefix() {
        let base = Url::parse("https://example.com/auth").unwrap();
        let url = signin_url(&base, "ybndrfg8ejkm").unwrap();
        assert_eq!(url.as_str(), "https://example.com/auth/signin/ybndrfg8ejkm");

        let base = Url::parse("http://localhost:3000").unwrap();
        let url = signin_url(&base, "ybndrfg8ejkm").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/signin/ybndrfg8ejkm");
    }

    #[tokio::test]
    async fn test_browser_first_records_key() {
        let (store, issuer) = setup().await;
        let request = store.create().await.unwrap();

        let message = issuer.issue(captured(&request.token())).await.unwrap();
        assert_eq!(message, CONFIRMED_MESSAGE);

        let found = store.lookup_token(&request.token()).await.unwrap().unwrap();
        assert_eq!(found.pubkey(), Some(KEY));
    }

    #[tokio::test]
    async fn test_browser_first_unknown_token_fails() {
        let (_store, issuer) = setup().await;

        let err = issuer.issue(captured("ybndrfg8ejkm")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SigninError>(),
            Some(SigninError::InvalidToken)
        ));
        assert_eq!(
            ShellReply::from_issued(Err(err)),
            ShellReply::Stderr(format!("{}\r\n{}\r\n", APOLOGY, TERMINAL_HINT))
        );
    }

    #[tokio::test]
    async fn test_terminal_first_returns_signin_url() {
        let (store, issuer) = setup().await;

        let message = issuer.issue(captured("alice")).await.unwrap();
        let token = message
            .strip_prefix("http://localhost:3000/signin/")
            .unwrap();

        let request = store.lookup_token(token).await.unwrap().unwrap();
        assert!(request.is_authenticated());
        assert_eq!(request.pubkey(), Some(KEY));
    }
}
