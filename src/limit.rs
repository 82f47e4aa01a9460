use std::time::Duration;

/// Wait bound meaning "any finite wait is acceptable".
pub const INF_DURATION: Duration = Duration::MAX;

/// Finite refill rate in tokens per second. Only [`Limit::per_second`]
/// builds one, so the value is always finite and `>= 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rate(f64);

impl Rate {
    pub fn get(self) -> f64 { self.0 }
}

/// Events permitted per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Limit {
    /// No rate limiting at all; every admission succeeds.
    Unlimited,
    /// Tokens refill at this rate.
    PerSecond(Rate),
}

impl Limit {
    /// Build a finite rate. `+inf` maps to `Unlimited`; NaN and negative
    /// rates are clamped to zero (the bucket never refills).
    pub fn per_second(rate: f64) -> Self {
        if rate == f64::INFINITY {
            Limit::Unlimited
        } else if rate > 0.0 {
            Limit::PerSecond(Rate(rate))
        } else {
            Limit::PerSecond(Rate(0.0))
        }
    }

    /// One event every `interval`. A zero interval is unconstrained.
    pub fn every(interval: Duration) -> Self {
        if interval.is_zero() {
            return Limit::Unlimited;
        }
        Limit::per_second(1.0 / interval.as_secs_f64())
    }

    /// Signed variant of [`Limit::every`] for config surfaces; `ms <= 0` is unlimited.
    pub fn every_millis(ms: i64) -> Self {
        if ms <= 0 {
            return Limit::Unlimited;
        }
        Limit::every(Duration::from_millis(ms as u64))
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Rate as a float, `f64::INFINITY` for `Unlimited`. Display only.
    pub fn as_f64(&self) -> f64 {
        match self {
            Limit::Unlimited => f64::INFINITY,
            Limit::PerSecond(r) => r.get(),
        }
    }

    /// How long `tokens` take to accumulate. Saturates at [`INF_DURATION`]
    /// when the rate is zero or the wait does not fit in a `Duration`.
    pub fn tokens_to_duration(&self, tokens: f64) -> Duration {
        if tokens <= 0.0 {
            return Duration::ZERO;
        }
        match *self {
            Limit::Unlimited => Duration::ZERO,
            Limit::PerSecond(Rate(r)) if r > 0.0 => {
                Duration::try_from_secs_f64(tokens / r).unwrap_or(INF_DURATION)
            }
            Limit::PerSecond(_) => INF_DURATION,
        }
    }

    /// Tokens accumulated over `d`. Fractional; callers cap the result.
    pub fn duration_to_tokens(&self, d: Duration) -> f64 {
        match *self {
            Limit::Unlimited => f64::INFINITY,
            Limit::PerSecond(Rate(r)) => r * d.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_enough(a: f64, b: f64) -> bool {
        (a / b - 1.0).abs() < 1e-9
    }

    #[test]
    fn finite_limit_is_not_unlimited() {
        assert_ne!(Limit::per_second(10.0), Limit::Unlimited);
        assert!(!Limit::per_second(10.0).is_unlimited());
        assert!(Limit::per_second(f64::INFINITY).is_unlimited());
    }

    #[test]
    fn every_converts_interval_to_rate() {
        let cases = [
            (Duration::from_nanos(1), 1e9),
            (Duration::from_nanos(100), 1e7),
            (Duration::from_secs(1), 1.0),
            (Duration::from_millis(2500), 0.4),
            (Duration::from_nanos(i64::MAX as u64), 1e9 / i64::MAX as f64),
        ];
        for (interval, want) in cases {
            let got = Limit::every(interval).as_f64();
            assert!(close_enough(got, want), "every({interval:?}) = {got}, want {want}");
        }
    }

    #[test]
    fn non_positive_interval_is_unlimited() {
        assert_eq!(Limit::every(Duration::ZERO), Limit::Unlimited);
        assert_eq!(Limit::every_millis(0), Limit::Unlimited);
        assert_eq!(Limit::every_millis(-1), Limit::Unlimited);
        assert!(close_enough(Limit::every_millis(100).as_f64(), 10.0));
    }

    #[test]
    fn bad_rates_clamp_to_zero() {
        assert_eq!(Limit::per_second(-3.0), Limit::PerSecond(Rate(0.0)));
        assert_eq!(Limit::per_second(f64::NAN), Limit::PerSecond(Rate(0.0)));
        assert_eq!(Limit::per_second(f64::NEG_INFINITY).as_f64(), 0.0);
    }

    #[test]
    fn conversions() {
        let l = Limit::per_second(10.0);
        assert_eq!(l.tokens_to_duration(1.0), Duration::from_millis(100));
        assert_eq!(l.tokens_to_duration(0.0), Duration::ZERO);
        assert_eq!(l.tokens_to_duration(-2.0), Duration::ZERO);
        assert_eq!(l.duration_to_tokens(Duration::from_millis(500)), 5.0);

        assert_eq!(Limit::Unlimited.tokens_to_duration(1e12), Duration::ZERO);
        assert_eq!(Limit::per_second(0.0).tokens_to_duration(1.0), INF_DURATION);
        assert_eq!(Limit::per_second(1e-300).tokens_to_duration(1e300), INF_DURATION);
    }
}
