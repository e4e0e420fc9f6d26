//! Per-call resolution options.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bounds on how long one caller is willing to wait.
///
/// Options only affect the calling task. The shared computation behind a
/// request keeps running when a caller gives up, so other waiters and later
/// callers still get its result.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up with `DeadlineExceeded` at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Give up with `DeadlineExceeded` after `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Give up with `Cancelled` once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// The deadline to apply, falling back to `default_timeout` from now.
    pub(crate) fn effective_deadline(&self, default_timeout: Option<Duration>) -> Option<Instant> {
        self.deadline
            .or_else(|| default_timeout.map(|timeout| Instant::now() + timeout))
    }
}
