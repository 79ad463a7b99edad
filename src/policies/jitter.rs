//! # Jitter policy for recovery delays.
//!
//! [`JitterPolicy`] spreads backoff waits so modules failing in the same cycle
//! do not all become retry-ready at the same instant.
//!
//! The recovery defaults use [`JitterPolicy::None`] so waits are exactly `2^attempt` seconds.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Randomization applied to a backoff delay.
///
/// Serialized as `"none"`, `"full"`, `"equal"` or `"decorrelated"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// Exact backoff delay.
    #[default]
    None,
    /// Anywhere in `[0, delay]`.
    Full,
    /// Anywhere in `[delay / 2, delay]`.
    Equal,
    /// Anywhere in `[floor, 3 × delay]`, capped at the backoff maximum.
    Decorrelated,
}

impl JitterPolicy {
    /// Picks the wait for a backoff step whose exact delay is `delay`.
    ///
    /// `floor` and `max` bound the decorrelated window; the other policies
    /// never exceed `delay`.
    pub fn spread(&self, delay: Duration, floor: Duration, max: Duration) -> Duration {
        let ms = as_ms(delay);
        let (lo, hi) = match self {
            JitterPolicy::None => return delay,
            JitterPolicy::Full => (0, ms),
            JitterPolicy::Equal => (ms / 2, ms),
            JitterPolicy::Decorrelated => {
                let lo = as_ms(floor);
                (lo, ms.saturating_mul(3).min(as_ms(max)).max(lo))
            }
        };
        Duration::from_millis(pick(lo, hi))
    }
}

fn as_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Uniform in `[lo, hi]`; `lo` when the window is empty.
fn pick(lo: u64, hi: u64) -> u64 {
    if hi <= lo {
        return lo;
    }
    rand::rng().random_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: Duration = Duration::from_secs(60);

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.spread(d, Duration::ZERO, CAP), d);
    }

    #[test]
    fn test_zero_delay_stays_zero() {
        assert_eq!(JitterPolicy::Full.spread(Duration::ZERO, Duration::ZERO, CAP), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.spread(Duration::ZERO, Duration::ZERO, CAP), Duration::ZERO);
    }

    #[test]
    fn test_decorrelated_floor_wins_over_small_cap() {
        let floor = Duration::from_millis(500);
        let got = JitterPolicy::Decorrelated.spread(Duration::from_millis(100), floor, Duration::from_millis(200));
        assert_eq!(got, floor);
    }

    #[test]
    fn test_serde_names() {
        let j: JitterPolicy = serde_json::from_str("\"equal\"").unwrap();
        assert_eq!(j, JitterPolicy::Equal);
        assert_eq!(serde_json::to_string(&JitterPolicy::None).unwrap(), "\"none\"");
    }
}
