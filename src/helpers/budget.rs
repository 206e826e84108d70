//! Cooperative time budget shared by a file's loader and analysis passes.

use crate::error::SheetSleuthError;
use std::time::Duration;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A deadline plus a cancellation token. Long-running loops call [`Budget::check`]
/// between rows so a timed-out or cancelled file stops at the next row boundary.
#[derive(Clone, Debug)]
pub struct Budget {
    deadline: Option<Instant>,
    limit: Duration,
    token: CancellationToken,
}

impl Budget {
    /// Creates a budget ending `limit` from now.
    pub fn new(limit: Duration, token: CancellationToken) -> Self {
        Budget {
            deadline: Instant::now().checked_add(limit),
            limit,
            token,
        }
    }

    /// A budget that never expires and is only stopped through its token.
    pub fn unbounded() -> Self {
        Budget {
            deadline: None,
            limit: Duration::MAX,
            token: CancellationToken::new(),
        }
    }

    /// Derives a tighter budget for one sub-task; it shares this budget's cancellation.
    pub fn child(&self, limit: Duration) -> Budget {
        let deadline = Instant::now().checked_add(limit);
        let deadline = match (self.deadline, deadline) {
            (Some(parent), Some(child)) => Some(parent.min(child)),
            (parent, child) => parent.or(child),
        };
        Budget {
            deadline,
            limit: limit.min(self.limit),
            token: self.token.child_token(),
        }
    }

    /// Fails with `TimeoutError` past the deadline, or `CancelledError` once cancelled.
    pub fn check(&self) -> Result<(), SheetSleuthError> {
        if self.token.is_cancelled() {
            Err(SheetSleuthError::CancelledError)
        } else if self.is_expired() {
            Err(SheetSleuthError::TimeoutError(self.limit))
        } else {
            Ok(())
        }
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
