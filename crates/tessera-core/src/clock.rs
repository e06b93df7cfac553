//! Time source for replicas.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

/// Supplies the current time in microseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> Timestamp {
        // A clock before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as Timestamp)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{MAX_TIMESTAMP, MIN_TIMESTAMP};

    #[test]
    fn test_system_clock_is_in_valid_range() {
        let now = SystemClock.now_micros();
        assert!((MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&now));
    }
}
