//! A cooperative cancellation flag: one side signals it (a `SIGINT`/`SIGTERM`
//! handler), the other observes it from inside an async wait loop.

use tokio::sync::watch;

/// Held by whatever observes `SIGINT`/`SIGTERM`; fires the flag once.
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Cloneable handle a wait loop polls or awaits. Cheap to clone: all clones
/// observe the same underlying flag.
#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// A token tied to no handle; `cancelled()` never resolves.
    pub fn inert() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelToken(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once `CancelHandle::cancel` has been called; otherwise
    /// never resolves, so it is safe to use as a `tokio::select!` branch
    /// alongside branches that are expected to complete first.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Build a connected handle/token pair for one run.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelToken(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inert_token_never_reports_cancelled() {
        let token = CancelToken::inert();
        assert!(!token.is_cancelled());
        tokio::select! {
            _ = token.cancelled() => panic!("inert token should never fire"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
    }

    #[tokio::test]
    async fn test_cancel_is_observed() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_observed_from_clone_created_before_signal() {
        let (handle, token) = cancel_pair();
        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });
        handle.cancel();
        waiter.await.unwrap();
    }
}
