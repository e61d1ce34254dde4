//! Wall-clock time for lease expiry and resend backoff.

/// Millisecond wall clock.
///
/// Kept synchronous because it is read while holding sequencer locks.
pub trait PhysicalTimeEffects: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}
