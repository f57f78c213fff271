use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for blocking transport receives.
///
/// The inner flag can be handed to `signal_hook::flag::register` so that
/// SIGINT/SIGTERM cancel a pending receive.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that is never cancelled by anyone else.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Shared flag backing this token.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::CancelToken;

    #[test]
    fn clones_observe_the_same_cancellation() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn external_flag_writes_cancel_the_token() {
        let token = CancelToken::never();
        token.flag().store(true, Ordering::SeqCst);
        assert!(token.is_cancelled());
    }
}
