use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ControlError, ControlResult};

/// Obtains a fresh access token from a vendor API.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> ControlResult<String>;
}

/// Access token shared by every call a site makes to its hardware.
///
/// Logins are serialized: callers that hit an expired token together cause
/// exactly one re-login, and a call is retried at most once.
pub struct TokenSession<A> {
    auth: A,
    token: Mutex<Option<String>>,
    logins: AtomicUsize,
}

impl<A: Authenticator> TokenSession<A> {
    pub fn new(auth: A) -> Self {
        Self {
            auth,
            token: Mutex::new(None),
            logins: AtomicUsize::new(0),
        }
    }

    /// Run `op` with the current token, re-logging in once if it is rejected.
    pub async fn call<T, F, Fut>(&self, op: F) -> ControlResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        let token = self.token().await?;
        match op(token.clone()).await {
            Err(ControlError::AuthExpired(reason)) => {
                warn!(%reason, "access token rejected, logging in again");
                let fresh = self.refresh(&token).await?;
                op(fresh).await
            }
            other => other,
        }
    }

    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    async fn token(&self) -> ControlResult<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn refresh(&self, stale: &str) -> ControlResult<String> {
        let mut guard = self.token.lock().await;
        if let Some(current) = guard.as_ref() {
            if current != stale {
                // Someone else already logged in again.
                return Ok(current.clone());
            }
        }
        *guard = None;
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn login(&self) -> ControlResult<String> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        match self.auth.login().await {
            Ok(token) => {
                info!("logged in to storage system");
                Ok(token)
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(ControlError::AuthExpired(reason)) => Err(ControlError::AuthExpired(reason)),
            Err(e) => Err(ControlError::AuthExpired(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::Arc;

    struct CountingAuth {
        issued: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Authenticator for CountingAuth {
        async fn login(&self) -> ControlResult<String> {
            if self.fail {
                return Err(ControlError::upstream("auth", "invalid credentials"));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{n}"))
        }
    }

    fn session(fail: bool) -> Arc<TokenSession<CountingAuth>> {
        Arc::new(TokenSession::new(CountingAuth {
            issued: AtomicUsize::new(0),
            fail,
        }))
    }

    #[tokio::test]
    async fn test_token_is_reused() {
        let s = session(false);
        for _ in 0..3 {
            let t = s.call(|token| async move { Ok(token) }).await.unwrap();
            assert_eq!(t, "token-0");
        }
        assert_eq!(s.login_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_token_triggers_single_relogin() {
        let s = session(false);
        s.call(|_| async { Ok(()) }).await.unwrap();

        // The server now only accepts token-1.
        let valid = Arc::new(SyncMutex::new("token-1".to_string()));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let s = s.clone();
            let valid = valid.clone();
            handles.push(tokio::spawn(async move {
                s.call(|token| {
                    let valid = valid.clone();
                    async move {
                        if *valid.lock() == token {
                            Ok(token)
                        } else {
                            Err(ControlError::AuthExpired("token expired".into()))
                        }
                    }
                })
                .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(s.login_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_login_surfaces_auth_expired() {
        let s = session(true);
        let err = s.call(|_| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ControlError::AuthExpired(_)));
    }

    #[tokio::test]
    async fn test_second_rejection_is_not_retried() {
        let s = session(false);
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let err = s
            .call(move |_| {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ControlError::AuthExpired("revoked".into()))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::AuthExpired(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(s.login_count(), 2);
    }
}
