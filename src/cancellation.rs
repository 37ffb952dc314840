use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{DriverError, Result};

/// A handle for cancelling in-flight session operations.
///
/// Clones share the same underlying flag, so a token handed to a transaction
/// callback can be triggered from any thread. Cancellation is checked before
/// every retry attempt and every commit attempt, and takes priority over any
/// retry decision.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new, unsignalled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals cancellation to every clone of this token.
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Checks if cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`DriverError::Cancelled`] if the token is signalled.
    #[inline]
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DriverError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
