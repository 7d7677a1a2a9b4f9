//! Production environment: OS clock and OS entropy.

use std::time::Instant;

use rand::RngCore;
use rand::rngs::OsRng;

use cld_core::Environment;

/// [`Environment`] backed by `std::time::Instant` and the operating
/// system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }

    fn random_u64(&self) -> u64 {
        OsRng.next_u64()
    }
}
