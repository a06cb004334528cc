//! Cooperative cancellation checked between pass steps

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CrosslistError, Result};

/// Cloneable flag checked between the steps of a pass.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the running pass stops at its next step boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the token can be reused
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CrosslistError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(token.check().is_ok());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(CrosslistError::Cancelled)));

        token.reset();
        assert!(!handle.is_cancelled());
    }
}
