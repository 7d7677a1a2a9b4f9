//! Environment abstraction for deterministic testing.
//!
//! Decouples the engine from system resources (time, randomness). Tests
//! drive the engine with a virtual clock and a seeded RNG; production
//! code (in `cld-client`) supplies the OS monotonic clock and CSPRNG.
//! Session IDs, transaction IDs, and the initial outbound sequence ID
//! all come from here, so the engine keeps no process-wide state.

use std::ops::{Add, Sub};
use std::time::Duration;

/// Abstract environment providing monotonic time and randomness.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards within one execution context
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + 'static {
    /// The instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; simulated
    /// environments use virtual time.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + Sub<Output = Duration>
        + Add<Duration, Output = Self::Instant>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generate a random `u64`.
    ///
    /// Convenience for session, transaction, and sequence-ID seeding.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }
}
