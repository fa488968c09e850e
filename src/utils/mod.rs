//! Utility modules shared across handlers.

pub mod cancel;

pub use cancel::{CancelHandle, Dispose};

use std::time::Instant;

/// Milliseconds elapsed since `start`.
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
