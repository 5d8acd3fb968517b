//! Cooperative cancellation and deadlines for a run.
//!
//! Every suspension point in the pipeline (object-store calls, embedding
//! calls, the inter-batch delay, vector-store writes) goes through
//! [`RunControl::guard`] or [`RunControl::sleep`], so a cancelled token or
//! an expired deadline stops the run at the next await.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunControl {
    /// A control that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail fast if the run is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PipelineError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the run is cancelled or times out first.
    ///
    /// The inner result is returned untouched so callers can apply their
    /// own failure policy to it; interruption is reported separately.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(PipelineError::Cancelled),
            _ = deadline => Err(PipelineError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), PipelineError> {
        self.guard(tokio::time::sleep(duration)).await
    }
}
