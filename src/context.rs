//! Cancellation-bearing call context
//!
//! Every blocking call made by the engine (admission, backend create,
//! backend cancel) runs through `CallContext::run`, so a cancelled or
//! expired context aborts the in-flight future and surfaces an error
//! without producing a new state.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation token plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context that is never cancelled on its own
    pub fn background() -> Self {
        Self::default()
    }

    /// Context bound to an existing cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that also expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token, for handing to background work
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail fast if the context is already done
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::cancelled(operation));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded {
                    operation: operation.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever happens first
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::cancelled(operation)),
            _ = deadline => Err(Error::DeadlineExceeded {
                operation: operation.to_string(),
            }),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = CallContext::background();
        let value = ctx.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let ctx = CallContext::background();
        ctx.cancel();
        let err = ctx.run("create", async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let ctx = CallContext::background();
        let child = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_deadline() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }

    #[test]
    fn test_child_inherits_cancel() {
        let parent = CallContext::background();
        let child = parent.with_timeout(Duration::from_secs(5));
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
