use std::time::Duration;

/// Strategy for computing the delay before the next attempt.
///
/// `delay_for` is a pure function of the number of attempts already made.
/// Both variants are strictly increasing in `attempts` until they reach
/// `max`, and never exceed it.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Exponential backoff: `base * multiplier^attempts`, optionally with
    /// deterministic jitter.
    Exponential {
        /// Delay after the first failed attempt when `multiplier` is 1.
        base: Duration,
        /// Upper bound on the computed delay.
        max: Duration,
        /// Growth factor per attempt. Must be greater than 1.
        multiplier: f64,
        /// When `true`, stretch the delay by a deterministic factor that
        /// grows with the attempt number (+0% to +40%), so a burst of
        /// failures does not retry in lockstep.
        jitter: bool,
    },
    /// Linear backoff: `delay * attempts`, clamped to `max`.
    Linear {
        /// Per-attempt increment.
        delay: Duration,
        /// Upper bound on the computed delay.
        max: Duration,
    },
}

impl RetryStrategy {
    /// Compute the delay after `attempts` attempts have been made.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use courier_executor::RetryStrategy;
    ///
    /// let strategy = RetryStrategy::Linear {
    ///     delay: Duration::from_secs(1),
    ///     max: Duration::from_secs(10),
    /// };
    /// assert_eq!(strategy.delay_for(3), Duration::from_secs(3));
    /// assert_eq!(strategy.delay_for(50), Duration::from_secs(10));
    /// ```
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match self {
            Self::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                // Attempt counts are bounded by `max_attempts`, far below
                // i32::MAX.
                #[allow(clippy::cast_possible_wrap)]
                let raw = base.as_secs_f64() * multiplier.powi(attempts.min(1024) as i32);

                let adjusted = if *jitter {
                    let jitter_factor = 1.0 + 0.1 * f64::from(attempts.min(4));
                    raw * jitter_factor
                } else {
                    raw
                };

                Duration::from_secs_f64(adjusted.min(max.as_secs_f64()))
            }
            Self::Linear { delay, max } => {
                let raw = delay.as_secs_f64() * f64::from(attempts.max(1));
                Duration::from_secs_f64(raw.min(max.as_secs_f64()))
            }
        }
    }

    /// Check the parameters that the monotonicity guarantee depends on.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Exponential {
                base,
                max,
                multiplier,
                ..
            } => {
                if base.is_zero() {
                    return Err("backoff base must be positive".into());
                }
                if !(multiplier.is_finite() && *multiplier > 1.0) {
                    return Err(format!(
                        "backoff multiplier must be greater than 1, got {multiplier}"
                    ));
                }
                if max < base {
                    return Err("backoff max must be at least base".into());
                }
            }
            Self::Linear { delay, max } => {
                if delay.is_zero() {
                    return Err("linear backoff delay must be positive".into());
                }
                if max < delay {
                    return Err("backoff max must be at least delay".into());
                }
            }
        }
        Ok(())
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(10),
            max: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_no_jitter_basic() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(strategy.delay_for(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn exponential_clamped() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            multiplier: 3.0,
            jitter: false,
        };
        assert_eq!(strategy.delay_for(1), Duration::from_secs(3));
        // 9s -> clamped to 5s
        assert_eq!(strategy.delay_for(2), Duration::from_secs(5));
        assert_eq!(strategy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn exponential_with_jitter() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        };
        // 200ms * 1.1
        assert_eq!(strategy.delay_for(1), Duration::from_millis(220));
        // 3200ms * 1.4, the factor stops growing at four attempts
        assert_eq!(strategy.delay_for(5), Duration::from_millis(4480));
    }

    #[test]
    fn strictly_increasing_below_cap() {
        let strategies = [
            RetryStrategy::default(),
            RetryStrategy::Exponential {
                base: Duration::from_millis(10),
                max: Duration::from_secs(3600),
                multiplier: 1.1,
                jitter: true,
            },
            RetryStrategy::Linear {
                delay: Duration::from_millis(500),
                max: Duration::from_secs(3600),
            },
        ];
        for strategy in strategies {
            let max = match &strategy {
                RetryStrategy::Exponential { max, .. } | RetryStrategy::Linear { max, .. } => *max,
            };
            for k in 1..20 {
                let current = strategy.delay_for(k);
                let next = strategy.delay_for(k + 1);
                if next < max {
                    assert!(next > current, "{strategy:?}: delay({}) <= delay({k})", k + 1);
                } else {
                    assert!(next >= current);
                }
            }
        }
    }

    #[test]
    fn linear_basic() {
        let strategy = RetryStrategy::Linear {
            delay: Duration::from_millis(500),
            max: Duration::from_secs(5),
        };
        assert_eq!(strategy.delay_for(1), Duration::from_millis(500));
        assert_eq!(strategy.delay_for(2), Duration::from_secs(1));
        // 6s -> clamped
        assert_eq!(strategy.delay_for(12), Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_flat_curves() {
        let flat = RetryStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
            multiplier: 1.0,
            jitter: false,
        };
        assert!(flat.validate().is_err());
        assert!(RetryStrategy::default().validate().is_ok());
        let zero = RetryStrategy::Linear {
            delay: Duration::ZERO,
            max: Duration::from_secs(1),
        };
        assert!(zero.validate().is_err());
    }
}
