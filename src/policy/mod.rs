use std::time::Duration;
use thiserror::Error;

/// A policy that cannot be enforced.
///
/// Raised while profiles are being constructed, never while a request is being processed.
#[derive(Debug, Clone, Copy, Error, Eq, PartialEq)]
pub enum InvalidPolicy {
    #[error("A quota policy must permit at least one point per window")]
    ZeroPoints,
    #[error("A quota policy window must be at least one second long")]
    ZeroDuration,
    #[error("A quota policy window or block may not exceed 100 years")]
    DurationTooLarge,
}

/// Upper bound for a window or block, roughly 100 years.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// The (points, window, block duration) triple governing a limiter profile.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct QuotaPolicy {
    points: u64,
    duration: Duration,
    block_duration: Duration,
}

impl QuotaPolicy {
    /// # Arguments
    ///
    /// * `points`: The total consumptions permitted within a window.
    /// * `duration_secs`: The width of the window.
    /// * `block_duration_secs`: How long a key stays locked out once it exceeds the quota,
    ///   zero disables blocking.
    pub fn new(
        points: u64,
        duration_secs: u64,
        block_duration_secs: u64,
    ) -> Result<Self, InvalidPolicy> {
        if points < 1 {
            return Err(InvalidPolicy::ZeroPoints);
        }
        if duration_secs < 1 {
            return Err(InvalidPolicy::ZeroDuration);
        }
        if duration_secs > MAX_DURATION_SECS || block_duration_secs > MAX_DURATION_SECS {
            return Err(InvalidPolicy::DurationTooLarge);
        }
        Ok(Self {
            points,
            duration: Duration::from_secs(duration_secs),
            block_duration: Duration::from_secs(block_duration_secs),
        })
    }

    /// Policies hardcoded by the profiles, checked at compile time.
    pub(crate) const fn fixed(points: u64, duration_secs: u64, block_duration_secs: u64) -> Self {
        assert!(points >= 1 && duration_secs >= 1);
        assert!(duration_secs <= MAX_DURATION_SECS && block_duration_secs <= MAX_DURATION_SECS);
        Self {
            points,
            duration: Duration::from_secs(duration_secs),
            block_duration: Duration::from_secs(block_duration_secs),
        }
    }

    pub fn points(&self) -> u64 {
        self.points
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    pub fn blocks(&self) -> bool {
        !self.block_duration.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_policies() {
        assert_eq!(QuotaPolicy::new(0, 60, 0), Err(InvalidPolicy::ZeroPoints));
        assert_eq!(QuotaPolicy::new(5, 0, 0), Err(InvalidPolicy::ZeroDuration));
    }

    #[test]
    fn test_rejects_oversized_durations() {
        assert_eq!(QuotaPolicy::new(1, u64::MAX, 0), Err(InvalidPolicy::DurationTooLarge));
        assert_eq!(
            QuotaPolicy::new(1, 60, 10_000_000_000_000),
            Err(InvalidPolicy::DurationTooLarge)
        );
        assert_eq!(
            QuotaPolicy::new(1, MAX_DURATION_SECS + 1, 0),
            Err(InvalidPolicy::DurationTooLarge)
        );
        let policy = QuotaPolicy::new(1, MAX_DURATION_SECS, MAX_DURATION_SECS).unwrap();
        assert_eq!(policy.block_duration(), Duration::from_secs(MAX_DURATION_SECS));
    }

    #[test]
    fn test_accepts_zero_block() {
        let policy = QuotaPolicy::new(1, 1, 0).unwrap();
        assert_eq!(policy.points(), 1);
        assert_eq!(policy.duration(), Duration::from_secs(1));
        assert!(!policy.blocks());
    }
}
