//! Cancellation and deadline for a single search call.
//!
//! The embedding call and the vector scan are the only slow steps of a
//! search. Both check the context between units of work; the provider call
//! itself is not interruptible, so a deadline that expires during it is
//! reported right after it returns.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How often (in candidates) long scans poll the context.
pub const CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("search cancelled")]
    Cancelled,

    #[error("search deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl SearchContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context expiring `timeout` from now. A zero timeout means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        let deadline = if timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + timeout)
        };

        Self {
            token: CancellationToken::new(),
            deadline,
        }
    }

    /// Attach an externally owned token, e.g. one cancelled on client disconnect.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context_never_interrupts() {
        let ctx = SearchContext::new();
        assert_eq!(ctx.check(), Ok(()));
    }

    #[test]
    fn test_cancel() {
        let ctx = SearchContext::new();
        let clone = ctx.clone();
        clone.cancel();
        assert_eq!(ctx.check(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_external_token() {
        let token = CancellationToken::new();
        let ctx = SearchContext::new().with_token(token.clone());
        token.cancel();
        assert_eq!(ctx.check(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_deadline() {
        let ctx = SearchContext::with_timeout(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ctx.check(), Err(Interrupted::DeadlineExceeded));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let ctx = SearchContext::with_timeout(Duration::ZERO);
        assert_eq!(ctx.check(), Ok(()));
    }
}
