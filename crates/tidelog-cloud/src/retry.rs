//! Retry Chain with Exponential Backoff and Hierarchical Cancellation
//!
//! A `RetryChain` couples a backoff policy with a cancellation token. Nested
//! operations (a hydration inside a read inside a fetch plan) each take a
//! `child()` of their parent's chain: cancelling the parent cancels every
//! descendant, while a child can be cancelled on its own.
//!
//! Backoff follows the usual exponential shape:
//!
//! ```text
//! backoff = min(initial_backoff * multiplier^attempt, max_backoff)
//!
//! Defaults (100ms initial, 2x multiplier, 10s max):
//! - Attempt 0: 100ms
//! - Attempt 1: 200ms
//! - Attempt 2: 400ms
//! - ...capped at 10s
//! ```
//!
//! Cancellation always takes precedence over a queued retry: `sleep` races
//! the token and reports whether the wait completed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Backoff policy for retried remote operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial try
    pub max_retries: usize,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff for a 0-indexed attempt:
    /// `min(initial_backoff * multiplier^attempt, max_backoff)`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let millis =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

/// A retry policy bound to a cancellation scope
#[derive(Debug, Clone)]
pub struct RetryChain {
    policy: RetryPolicy,
    token: CancellationToken,
}

impl RetryChain {
    /// Root chain for a new scope.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            token: CancellationToken::new(),
        }
    }

    /// Child chain: cancelled when this chain is cancelled, and independently
    /// cancellable without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            token: self.token.child_token(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for `duration` unless cancelled first. Returns `true` when the
    /// full wait elapsed, `false` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl Default for RetryChain {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        // Capped
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(9), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let root = RetryChain::default();
        let child = root.child();
        let grandchild = child.child();

        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_alive() {
        let root = RetryChain::default();
        let child = root.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_cut_short_by_cancellation() {
        let chain = RetryChain::default();
        let sleeper = chain.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(60)).await });

        tokio::task::yield_now().await;
        chain.cancel();
        let completed = handle.await.unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_sleep_completes_when_not_cancelled() {
        let chain = RetryChain::default();
        assert!(chain.sleep(Duration::from_millis(5)).await);
    }
}
