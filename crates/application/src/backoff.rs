use config::ReconnectPolicy;
use rand::Rng;
use std::time::Duration;

/// 重连退避：`min(base * 2^(n-1), cap)`，n 为连续失败次数
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn exponential(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_ratio: 0.0,
        }
    }

    pub fn from_policy(policy: &ReconnectPolicy) -> Self {
        Self::exponential(policy.base_delay(), policy.cap_delay()).with_jitter(policy.jitter_ratio)
    }

    /// 抖动比例会被限制在 [0, 1]，非有限值视为不抖动
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// 第 `failures` 次连续失败之后的等待时间
    pub fn delay_at(&self, failures: u32) -> Duration {
        let exp = std::cmp::min(failures.saturating_sub(1), 20);
        let factor = 1u32 << exp;
        std::cmp::min(self.base.saturating_mul(factor), self.cap)
    }

    /// 带抖动的等待时间，只向下抖动，不会超过上限
    pub fn jittered(&self, failures: u32) -> Duration {
        let delay = self.delay_at(failures);
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let cut = rand::rng().random_range(0.0..=self.jitter_ratio);
        delay.mul_f64(1.0 - cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_cap() {
        let backoff = Backoff::exponential(Duration::from_millis(1_000), Duration::from_millis(10_000));

        assert_eq!(backoff.delay_at(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay_at(2), Duration::from_millis(2_000));
        assert_eq!(backoff.delay_at(3), Duration::from_millis(4_000));
        assert_eq!(backoff.delay_at(4), Duration::from_millis(8_000));
        assert_eq!(backoff.delay_at(5), Duration::from_millis(10_000));
        assert_eq!(backoff.delay_at(30), Duration::from_millis(10_000));
    }

    #[test]
    fn test_delays_are_non_decreasing() {
        let backoff = Backoff::exponential(Duration::from_millis(300), Duration::from_millis(7_000));
        let delays: Vec<_> = (1..=40).map(|n| backoff.delay_at(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(7_000)));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::exponential(Duration::from_millis(1_000), Duration::from_millis(10_000))
            .with_jitter(0.5);
        for failures in 1..=8 {
            let exact = backoff.delay_at(failures);
            let jittered = backoff.jittered(failures);
            assert!(jittered <= exact);
            assert!(jittered >= exact.mul_f64(0.5));
        }
    }

    #[test]
    fn test_non_finite_jitter_disables_jitter() {
        for ratio in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let backoff = Backoff::exponential(Duration::from_millis(500), Duration::from_secs(4))
                .with_jitter(ratio);
            assert_eq!(backoff.jittered(1), Duration::from_millis(500));
            assert_eq!(backoff.jittered(5), Duration::from_secs(4));
        }

        let policy = ReconnectPolicy {
            jitter_ratio: f64::NAN,
            ..ReconnectPolicy::default()
        };
        assert_eq!(Backoff::from_policy(&policy).jittered(2), Duration::from_secs(2));
    }

    #[test]
    fn test_from_policy() {
        let backoff = Backoff::from_policy(&ReconnectPolicy::default());
        assert_eq!(backoff.delay_at(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_at(10), Duration::from_secs(10));
    }
}
