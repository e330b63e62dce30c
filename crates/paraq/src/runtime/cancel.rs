use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use paraq_error::{DbError, Result};

/// Number of elements processed between cancellation checks, minus one.
///
/// Enumerators check for cancellation every 64 elements.
pub const CANCELLATION_POLL_MASK: usize = 0x3F;

/// Caller-owned handle for canceling queries.
///
/// Cloning the token shares the underlying flag. Once canceled, a token stays
/// canceled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// Cancellation state for a single query execution.
///
/// Combines any tokens provided by the caller with an internal token that's
/// tripped when a partition fails, so peers stop as soon as possible.
#[derive(Debug, Clone, Default)]
pub struct MergedCancellation {
    external: Vec<CancellationToken>,
    internal: CancellationToken,
}

impl MergedCancellation {
    pub fn new(external: impl IntoIterator<Item = CancellationToken>) -> Self {
        MergedCancellation {
            external: external.into_iter().collect(),
            internal: CancellationToken::new(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.internal.is_canceled() || self.external.iter().any(|t| t.is_canceled())
    }

    /// Returns a canceled error if either the caller or a peer partition
    /// requested cancellation.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(DbError::canceled());
        }
        Ok(())
    }

    pub fn is_canceled_externally(&self) -> bool {
        self.external.iter().any(|t| t.is_canceled())
    }

    pub(crate) fn cancel_internal(&self) {
        self.internal.cancel();
    }

    pub fn poller(&self) -> CancellationPoller {
        CancellationPoller {
            cancellation: self.clone(),
            count: 0,
        }
    }
}

/// Checks cancellation periodically while iterating.
#[derive(Debug, Clone)]
pub struct CancellationPoller {
    cancellation: MergedCancellation,
    count: usize,
}

impl CancellationPoller {
    /// Record one unit of work, checking for cancellation on the first call
    /// and every 64th call after.
    pub fn tick(&mut self) -> Result<()> {
        let count = self.count;
        self.count = self.count.wrapping_add(1);
        if count & CANCELLATION_POLL_MASK == 0 {
            self.cancellation.check()
        } else {
            Ok(())
        }
    }

    pub fn cancellation(&self) -> &MergedCancellation {
        &self.cancellation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_sees_external_cancel() {
        let token = CancellationToken::new();
        let merged = MergedCancellation::new([token.clone()]);
        merged.check().unwrap();

        token.cancel();
        assert!(merged.check().unwrap_err().is_canceled());
        assert!(merged.is_canceled_externally());
    }

    #[test]
    fn internal_cancel_does_not_touch_callers_token() {
        let token = CancellationToken::new();
        let merged = MergedCancellation::new([token.clone()]);

        merged.cancel_internal();
        assert!(merged.is_canceled());
        assert!(!token.is_canceled());
        assert!(!merged.is_canceled_externally());
    }

    #[test]
    fn poller_checks_periodically() {
        let merged = MergedCancellation::new([]);
        let mut poller = merged.poller();

        poller.tick().unwrap();
        merged.cancel_internal();

        // Next check happens on the 65th tick.
        for _ in 0..CANCELLATION_POLL_MASK {
            poller.tick().unwrap();
        }
        assert!(poller.tick().is_err());
    }
}
