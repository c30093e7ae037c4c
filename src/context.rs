use crate::{error::Result, PipelineError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope for a pipeline run.
///
/// Wraps a [`CancellationToken`] and an optional deadline. Every step
/// invocation receives the same context, so a timeout set by the caller
/// bounds the whole run. The pipeline checks it before starting each
/// step; steps may also await [`cancelled`](Self::cancelled) to stop
/// their own I/O early.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an externally owned token, e.g. one shared with a UI cancel button.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Bound the run to `timeout` from now. An earlier existing deadline is kept.
    ///
    /// A timeout too large to represent (e.g. `Duration::MAX`) sets no deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Bound the run to an absolute deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// A context cancelled together with this one, but whose own
    /// cancellation does not propagate upwards.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// `Err(Cancelled)` or `Err(DeadlineExceeded)` once the run should stop.
    pub fn check(&self) -> Result<()> {
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

    /// Resolves when the token is cancelled or the deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// The error describing why [`cancelled`](Self::cancelled) resolved.
    pub fn interruption(&self) -> PipelineError {
        match self.check() {
            Err(e) => e,
            Ok(()) => PipelineError::Cancelled,
        }
    }
}
