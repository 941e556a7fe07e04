// Re-armable one-shot "authorised" condition.

use std::sync::Arc;

use tokio::sync::watch;

use super::token::AbsoluteToken;
use crate::error::Error;

pub(crate) type GateResult = Result<Arc<AbsoluteToken>, Arc<Error>>;

/// Resolves exactly once, with a token or with the failure that
/// prevented obtaining one.
///
/// A new gate is created for each (re)authorisation. Waiters keep the
/// gate they started on, so a later replacement never changes what they
/// are waiting for.
#[derive(Debug)]
pub struct AuthGate {
    tx: watch::Sender<Option<GateResult>>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Suspend until the gate resolves.
    pub async fn wait(&self) -> GateResult {
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(Arc::new(Error::Authorisation {
                    message: "authorisation was abandoned".into(),
                    source: None,
                }));
            }
        }
    }

    /// Resolve the gate. Later calls are ignored.
    pub fn resolve(&self, result: GateResult) -> bool {
        let mut result = Some(result);
        self.tx.send_if_modified(|value| {
            if value.is_some() {
                return false;
            }
            *value = result.take();
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn peek(&self) -> Option<GateResult> {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn token(access: &str) -> Arc<AbsoluteToken> {
        Arc::new(AbsoluteToken {
            refresh_token: "r".into(),
            access_token: access.into(),
            access_expires_at: 0,
            scopes: Vec::new(),
        })
    }

    #[tokio::test]
    async fn resolves_once() {
        let gate = AuthGate::new();
        assert!(!gate.is_resolved());
        assert!(gate.resolve(Ok(token("first"))));
        assert!(!gate.resolve(Ok(token("second"))));
        assert_eq!(gate.wait().await.unwrap().access_token, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_unblocks_on_resolution() {
        let gate = Arc::new(AuthGate::new());
        let waiter = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.wait().await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        gate.resolve(Err(Arc::new(Error::Config("nope".into()))));
        let result = waiter.await.unwrap();
        assert!(result.is_err());
    }
}
