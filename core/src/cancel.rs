//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a cloneable flag shared between the caller, the agent
//! loop, the provider stream, and in-flight tools. Cancellation is polled,
//! never preemptive: a provider observing the token yields a terminal error
//! event with an aborted reason, and a tool observing it returns promptly.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Cloneable cancellation flag polled by providers, tools, and the loop.
///
/// All clones share the same state; cancelling any clone cancels them all.
///
/// # Example
///
/// ```rust
/// use strand_core::CancelToken;
///
/// let token = CancelToken::new();
/// let observer = token.clone();
/// assert!(!observer.is_cancelled());
///
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a new, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        // Cancelling again is a no-op.
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn fresh_token_is_live() {
        assert!(!CancelToken::new().is_cancelled());
    }
}
