use crate::error::AttemptError;
use anyhow::Result;
use sweep_core::{RunStats, TestConfig};
use tracing::{info, warn};

/// Latencies below this are treated as "never measured".
pub const DEGENERATE_EPSILON: f64 = 0.000_000_1;

fn is_zero(v: f64) -> bool {
    v.abs() < DEGENERATE_EPSILON
}

pub fn validate(stats: &RunStats) -> Result<(), AttemptError> {
    if is_zero(stats.min_time)
        || is_zero(stats.max_time)
        || is_zero(stats.avg_time)
        || !stats.rate.is_finite()
    {
        return Err(AttemptError::InvalidMeasurement {
            stats: stats.clone(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub stop_on_first_success: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            stop_on_first_success: true,
        }
    }
}

impl RetryPolicy {
    /// Runs up to `max_attempts` attempts for `cfg` and returns the valid
    /// measurements. `cleanup` runs after every attempt, whatever its outcome.
    pub fn run<A, C>(&self, cfg: &TestConfig, mut attempt: A, mut cleanup: C) -> Vec<RunStats>
    where
        A: FnMut(u32) -> Result<RunStats, AttemptError>,
        C: FnMut() -> Result<()>,
    {
        let mut runs = Vec::new();
        for n in 0..self.max_attempts {
            let outcome = attempt(n);
            if let Err(e) = cleanup() {
                warn!(attempt = n, error = %e, "cleanup after attempt failed");
            }
            match outcome {
                Ok(stats) => {
                    info!(attempt = n, rate = stats.rate, avg = stats.avg_time, "test complete");
                    runs.push(stats);
                    if self.stop_on_first_success {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        attempt = n,
                        kind = err.kind(),
                        config = %cfg,
                        error = %err,
                        "error for test"
                    );
                }
            }
        }
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::Duration;

    fn good(rate: f64) -> RunStats {
        RunStats {
            min_time: 0.5,
            max_time: 2.0,
            avg_time: 1.0,
            rate,
            ..RunStats::default()
        }
    }

    #[test]
    fn validate_accepts_normal_stats() {
        assert!(validate(&good(12.5)).is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_latencies_and_rates() {
        let mut zero_min = good(1.0);
        zero_min.min_time = 0.0;
        let mut tiny_max = good(1.0);
        tiny_max.max_time = 1e-9;
        let mut zero_avg = good(1.0);
        zero_avg.avg_time = -0.0;
        for stats in [
            zero_min,
            tiny_max,
            zero_avg,
            good(f64::NAN),
            good(f64::INFINITY),
            good(f64::NEG_INFINITY),
            RunStats::default(),
        ] {
            match validate(&stats) {
                Err(AttemptError::InvalidMeasurement { .. }) => {}
                other => panic!("expected invalid measurement for {:?}, got {:?}", stats, other),
            }
        }
    }

    #[test]
    fn stops_at_first_success_and_cleans_up_every_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            stop_on_first_success: true,
        };
        let mut calls = 0;
        let mut cleanups = 0;
        let runs = policy.run(
            &TestConfig::stamp(3, 1, 2, 30, 1),
            |n| {
                calls += 1;
                if n == 0 {
                    Err(AttemptError::Timeout {
                        deadline: Duration::from_secs(1),
                    })
                } else {
                    Ok(good(12.5))
                }
            },
            || {
                cleanups += 1;
                Ok(())
            },
        );
        assert_eq!(runs.len(), 1);
        assert_eq!(calls, 2);
        assert_eq!(cleanups, 2);
    }

    #[test]
    fn exhausts_budget_without_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            stop_on_first_success: true,
        };
        let mut cleanups = 0;
        let runs = policy.run(
            &TestConfig::stamp(3, 1, 2, 30, 1),
            |_| Err(AttemptError::Monitor("no data".to_string())),
            || {
                cleanups += 1;
                Err(anyhow!("kill mode failed"))
            },
        );
        assert!(runs.is_empty());
        assert_eq!(cleanups, 3);
    }

    #[test]
    fn keeps_going_when_not_stopping_on_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            stop_on_first_success: false,
        };
        let runs = policy.run(
            &TestConfig::stamp(3, 1, 2, 30, 1),
            |n| Ok(good(n as f64 + 1.0)),
            || Ok(()),
        );
        assert_eq!(runs.iter().map(|r| r.rate).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn default_policy_is_single_attempt() {
        assert_eq!(
            RetryPolicy::default(),
            RetryPolicy {
                max_attempts: 1,
                stop_on_first_success: true
            }
        );
    }
}
