//! Circuit breaker state machine
//!
//! Three-state breaker guarding one pipeline component. Transitions only
//! along CLOSED -> OPEN -> HALF_OPEN -> {CLOSED | OPEN}; a breaker can never
//! reach HALF_OPEN without passing through OPEN.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{CallError, Component};

/// Minimum seconds between "still open" warnings
const REJECT_WARN_INTERVAL_SECS: i64 = 30;

/// Breaker and retry-backoff tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before allowing a trial call
    pub recovery_timeout_secs: u64,
    /// Base delay for the advisory retry backoff
    pub base_backoff_secs: f64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Backoff ceiling
    pub max_backoff_secs: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            base_backoff_secs: 1.0,
            backoff_multiplier: 2.0,
            max_backoff_secs: 300.0,
        }
    }
}

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time view of a breaker for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub component: Component,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    last_reject_warn: Option<DateTime<Utc>>,
}

/// Circuit breaker for one named component
pub struct CircuitBreaker {
    component: Component,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(component: Component, config: BreakerConfig) -> Self {
        Self {
            component,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                last_reject_warn: None,
            }),
        }
    }

    /// Run an operation under the breaker.
    ///
    /// Rejections while OPEN are not failures of the wrapped operation and
    /// never touch the error count.
    pub fn call<T, F>(&self, op: F) -> Result<T, CallError>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.call_at(Utc::now(), op)
    }

    pub(crate) fn call_at<T, F>(&self, now: DateTime<Utc>, op: F) -> Result<T, CallError>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        if let Err(retry_in_secs) = self.try_acquire(now) {
            return Err(CallError::Rejected {
                component: self.component,
                retry_in_secs,
            });
        }

        match op() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure(now);
                Err(CallError::Failed(err))
            }
        }
    }

    /// Decide whether a call may proceed. Returns the seconds until the next
    /// recovery attempt when rejecting.
    fn try_acquire(&self, now: DateTime<Utc>) -> Result<(), i64> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = (now - opened_at).num_seconds();
                if elapsed >= self.config.recovery_timeout_secs as i64 {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("circuit for {} half-open, allowing trial call", self.component);
                    Ok(())
                } else {
                    let retry_in = self.config.recovery_timeout_secs as i64 - elapsed;
                    let warn_due = inner
                        .last_reject_warn
                        .map_or(true, |t| (now - t).num_seconds() >= REJECT_WARN_INTERVAL_SECS);
                    if warn_due {
                        inner.last_reject_warn = Some(now);
                        warn!(
                            "circuit for {} open, rejecting calls (recovery attempt in {}s)",
                            self.component, retry_in
                        );
                    }
                    Err(retry_in)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    // Exactly one trial call is admitted
                    Err(0)
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("circuit for {} recovered, closing", self.component);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                warn!("circuit for {} reopened after failed trial call", self.component);
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        "circuit for {} opened after {} consecutive failures",
                        self.component, inner.consecutive_failures
                    );
                }
            }
            // Calls are rejected while open, so a failure cannot be recorded
            CircuitState::Open => {}
        }
    }

    /// Advisory retry delay after `errors` consecutive failures:
    /// min(base * multiplier^(errors-1), max). Orthogonal to the breaker's
    /// hard OPEN gate.
    pub fn backoff_delay(&self, errors: u32) -> std::time::Duration {
        if errors == 0 {
            return std::time::Duration::ZERO;
        }
        let secs = (self.config.base_backoff_secs
            * self.config.backoff_multiplier.powi(errors as i32 - 1))
        .min(self.config.max_backoff_secs);
        std::time::Duration::from_secs_f64(secs)
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            component: self.component,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Component::Scoring, BreakerConfig::default())
    }

    fn fail(b: &CircuitBreaker, now: DateTime<Utc>) {
        let result: Result<(), _> = b.call_at(now, || Err(anyhow!("induced failure")));
        assert!(result.is_err());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let b = breaker();
        for i in 0..4 {
            fail(&b, t0() + Duration::seconds(i));
            assert_eq!(b.state(), CircuitState::Closed);
        }
        fail(&b, t0() + Duration::seconds(4));
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.consecutive_failures(), 5);
    }

    #[test]
    fn test_open_rejects_without_invoking() {
        let b = breaker();
        for i in 0..5 {
            fail(&b, t0() + Duration::seconds(i));
        }

        let mut invoked = false;
        let result: Result<(), _> = b.call_at(t0() + Duration::seconds(30), || {
            invoked = true;
            Ok(())
        });
        assert!(matches!(result, Err(CallError::Rejected { .. })));
        assert!(!invoked);
        // Rejection does not count as an operation failure
        assert_eq!(b.consecutive_failures(), 5);
    }

    #[test]
    fn test_recovery_open_to_half_open_to_closed() {
        let b = breaker();
        for i in 0..5 {
            fail(&b, t0() + Duration::seconds(i));
        }
        assert_eq!(b.state(), CircuitState::Open);

        // 61s after opening (timeout 60) the next call is the trial and a
        // forced success closes the circuit with the error count reset.
        let result = b.call_at(t0() + Duration::seconds(4 + 61), || Ok(42));
        assert_eq!(result.unwrap(), 42);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let b = breaker();
        for i in 0..5 {
            fail(&b, t0() + Duration::seconds(i));
        }

        let reopen_at = t0() + Duration::seconds(4 + 61);
        fail(&b, reopen_at);
        assert_eq!(b.state(), CircuitState::Open);

        // The fresh open-time restarts the recovery clock
        let result: Result<(), _> = b.call_at(reopen_at + Duration::seconds(30), || Ok(()));
        assert!(matches!(result, Err(CallError::Rejected { .. })));
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let b = breaker();
        for i in 0..5 {
            fail(&b, t0() + Duration::seconds(i));
        }

        let recovery = t0() + Duration::seconds(4 + 61);
        assert!(b.try_acquire(recovery).is_ok());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Second acquisition while the trial is in flight is rejected
        assert!(b.try_acquire(recovery).is_err());

        b.on_success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_count_in_closed() {
        let b = breaker();
        for i in 0..3 {
            fail(&b, t0() + Duration::seconds(i));
        }
        assert_eq!(b.consecutive_failures(), 3);

        let result = b.call_at(t0() + Duration::seconds(3), || Ok(()));
        assert!(result.is_ok());
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_backoff_schedule() {
        let b = breaker();
        assert_eq!(b.backoff_delay(0), std::time::Duration::ZERO);
        assert_eq!(b.backoff_delay(1).as_secs_f64(), 1.0);
        assert_eq!(b.backoff_delay(2).as_secs_f64(), 2.0);
        assert_eq!(b.backoff_delay(4).as_secs_f64(), 8.0);
        // Capped at 300s
        assert_eq!(b.backoff_delay(20).as_secs_f64(), 300.0);
    }
}
