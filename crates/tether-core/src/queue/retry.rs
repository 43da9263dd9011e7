//! Delay policy: decides backoff delays between attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Backoff policy: attempts made so far -> wait before the next attempt.
#[derive(Clone)]
pub enum DelayPolicy {
    /// Same delay before every retry.
    Constant(Duration),

    /// Delay before the n-th retry is `schedule[n - 1]`.
    ///
    /// Past the end of the schedule the last entry is reused.
    Schedule(Vec<Duration>),

    /// Arbitrary function of the attempt count.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl DelayPolicy {
    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        DelayPolicy::Custom(Arc::new(f))
    }

    /// Schedule from millisecond values.
    pub fn schedule_ms(millis: impl IntoIterator<Item = u64>) -> Self {
        DelayPolicy::Schedule(millis.into_iter().map(Duration::from_millis).collect())
    }

    /// `10^attempts` seconds: 10s, 100s, 1000s, ...
    pub fn exponential() -> Self {
        DelayPolicy::custom(|attempts| {
            Duration::from_millis(10u64.saturating_pow(attempts).saturating_mul(1000))
        })
    }

    /// Retry budget implied by the policy when none is configured.
    pub fn default_max_retries(&self) -> u32 {
        match self {
            DelayPolicy::Schedule(steps) => u32::try_from(steps.len()).unwrap_or(u32::MAX),
            _ => 3,
        }
    }

    /// Calculate the wait after `attempts` attempts.
    ///
    /// The first attempt is never delayed: `attempts == 0` always yields zero.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        match self {
            DelayPolicy::Constant(delay) => *delay,
            DelayPolicy::Schedule(steps) => {
                let index = usize::try_from(attempts - 1).unwrap_or(usize::MAX);
                steps
                    .get(index)
                    .or_else(|| steps.last())
                    .copied()
                    .unwrap_or(Duration::ZERO)
            }
            DelayPolicy::Custom(f) => f(attempts),
        }
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl fmt::Debug for DelayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayPolicy::Constant(delay) => f.debug_tuple("Constant").field(delay).finish(),
            DelayPolicy::Schedule(steps) => f.debug_tuple("Schedule").field(steps).finish(),
            DelayPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[rstest]
    #[case::constant(DelayPolicy::Constant(ms(50)))]
    #[case::schedule(DelayPolicy::schedule_ms([20, 30, 40, 50]))]
    #[case::custom(DelayPolicy::custom(|retry| ms(u64::from(retry) * 20)))]
    #[case::exponential(DelayPolicy::exponential())]
    fn first_attempt_is_never_delayed(#[case] policy: DelayPolicy) {
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert!(policy.delay_for(1) > Duration::ZERO);
    }

    #[rstest]
    #[case(1, 20)]
    #[case(2, 30)]
    #[case(3, 40)]
    #[case(4, 40)]
    #[case(9, 40)]
    fn schedule_indexes_by_retry_and_clamps(#[case] attempts: u32, #[case] expected: u64) {
        let policy = DelayPolicy::schedule_ms([20, 30, 40]);
        assert_eq!(policy.delay_for(attempts), ms(expected));
    }

    #[test]
    fn constant_and_custom_policies() {
        assert_eq!(DelayPolicy::Constant(ms(50)).delay_for(7), ms(50));

        let linear = DelayPolicy::custom(|retry| ms(u64::from(retry) * 20));
        assert_eq!(linear.delay_for(1), ms(20));
        assert_eq!(linear.delay_for(5), ms(100));
    }

    #[test]
    fn default_is_powers_of_ten_seconds() {
        let policy = DelayPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(100));
        assert_eq!(policy.delay_for(3), Duration::from_secs(1000));
    }

    #[test]
    fn default_max_retries_follows_schedule_length() {
        assert_eq!(DelayPolicy::schedule_ms([20, 30, 40, 50]).default_max_retries(), 4);
        assert_eq!(DelayPolicy::Constant(ms(1)).default_max_retries(), 3);
        assert_eq!(DelayPolicy::default().default_max_retries(), 3);
    }
}
