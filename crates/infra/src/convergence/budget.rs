use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,

    #[error("poll interval {poll_interval:?} must be shorter than the timeout {timeout:?}")]
    IntervalNotBelowTimeout {
        timeout: Duration,
        poll_interval: Duration,
    },
}

/// Time budget for one convergence wait.
///
/// The interval is fixed (no backoff): worst-case latency is `timeout +
/// poll_interval`, which matters more here than read-store load. It must be
/// strictly shorter than the timeout so at least one more sample happens after
/// the first one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConvergenceBudget {
    timeout: Duration,
    poll_interval: Duration,
}

impl ConvergenceBudget {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Result<Self, BudgetError> {
        if poll_interval.is_zero() {
            return Err(BudgetError::ZeroInterval);
        }
        if poll_interval >= timeout {
            return Err(BudgetError::IntervalNotBelowTimeout {
                timeout,
                poll_interval,
            });
        }
        Ok(Self {
            timeout,
            poll_interval,
        })
    }

    /// Budget for constants. Evaluated in a `const` item, an invalid pair fails
    /// to compile.
    pub const fn fixed(timeout: Duration, poll_interval: Duration) -> Self {
        assert!(
            !poll_interval.is_zero() && poll_interval.as_nanos() < timeout.as_nanos(),
            "poll interval must be non-zero and shorter than the timeout"
        );
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Upper bound on how long a wait with this budget can take.
    pub fn worst_case(&self) -> Duration {
        self.timeout + self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_interval() {
        assert_eq!(
            ConvergenceBudget::new(Duration::from_secs(1), Duration::ZERO),
            Err(BudgetError::ZeroInterval)
        );
    }

    #[test]
    fn rejects_interval_not_below_timeout() {
        let err = ConvergenceBudget::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, BudgetError::IntervalNotBelowTimeout { .. }));
    }

    #[test]
    fn worst_case_is_timeout_plus_interval() {
        let b = ConvergenceBudget::new(Duration::from_secs(5), Duration::from_millis(500)).unwrap();
        assert_eq!(b.worst_case(), Duration::from_millis(5500));
    }

    #[test]
    fn fixed_matches_checked_constructor() {
        const B: ConvergenceBudget =
            ConvergenceBudget::fixed(Duration::from_secs(1), Duration::from_millis(300));

        assert_eq!(
            Ok(B),
            ConvergenceBudget::new(Duration::from_secs(1), Duration::from_millis(300))
        );
    }
}
