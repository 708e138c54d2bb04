//! Cooperative cancellation for long-running reads.
//!
//! Statement generation may scan a tenant's entire ledger. Callers hand in a
//! `Cancellation` and aggregation loops poll it between batches of lines.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{DomainError, DomainResult};

/// Cancel flag plus optional deadline. Cheap to clone; clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A token that never fires unless `cancel()` is called.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Returns `DomainError::Cancelled` once the token has fired.
    pub fn check(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            Err(DomainError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_cancel_flag() {
        let token = Cancellation::none();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert_eq!(clone.check(), Err(DomainError::Cancelled));
    }

    #[test]
    fn elapsed_deadline_counts_as_cancelled() {
        let token = Cancellation::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(token.is_cancelled());
    }
}
