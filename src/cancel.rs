use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FtsError, Result};

/// Cooperative cancellation flag shared between a caller and a running
/// request. Long traversals poll it at a configured interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FtsError::Cancelled)
        } else {
            Ok(())
        }
    }
}
