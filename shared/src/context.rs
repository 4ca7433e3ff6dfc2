use crate::{Error, Op, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request cancellation and deadline scope
///
/// Cloning shares the same cancellation token. Use [`Context::child`] or one
/// of the `with_*` constructors to derive a scope that can be cancelled
/// without affecting its parent.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child scope; cancelling the parent cancels the child
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child scope that expires `timeout` from now
    ///
    /// An earlier deadline inherited from the parent is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Background context with the configured per-call timeout, if any
    pub fn from_config(config: &crate::config::Config) -> Self {
        match config.op_timeout {
            Some(timeout) => Self::background().with_timeout(timeout),
            None => Self::background(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` to completion unless this context is cancelled or its
    /// deadline passes first, in which case `fut` is dropped mid-flight.
    pub async fn run<F>(&self, op: Op, key: &str, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled {
                op,
                key: key.to_string(),
            }),
            _ = deadline => Err(Error::DeadlineExceeded {
                op,
                key: key.to_string(),
            }),
            out = fut => Ok(out),
        }
    }
}
