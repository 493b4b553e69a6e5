//! Cooperative cancellation.

use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

/// Cancellation flag shared between a sorting job and its controller.
///
/// Clones observe the same flag. The sorter checks it before consuming every input record and
/// before emitting every output record.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Requests cancellation of every job observing this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, atomic::Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod test {
    use super::CancellationToken;

    #[test]
    fn test_clones_share_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(token.is_cancelled());
    }
}
