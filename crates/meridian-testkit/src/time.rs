//! Manually advanced physical time.

use meridian_core::effects::PhysicalTimeEffects;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Time that only moves when a test says so. Clones share one clock.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now_ms: Arc<AtomicU64>,
}

impl ManualTime {
    /// Start at `start_ms`
    pub fn starting_at(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move forward by `ms`
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl PhysicalTimeEffects for ManualTime {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
