//! Circuit breaker and health bookkeeping for calls to the remote backend.
//!
//! A [`ResilienceMonitor`] is created once at startup and shared by `Arc` with
//! every call site. State lives behind a `std::sync::Mutex` that is only held
//! for the short synchronous updates before and after an awaited call.

pub mod alert;
pub mod backoff;
pub mod connectivity;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::models::{CircuitState, ResilienceSnapshot};
use backoff::exponential_backoff;

/// Thresholds for opening and re-testing the circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Wait before the first trial call after opening.
    pub cooldown: Duration,
    /// Upper bound for the cooldown after repeated failed trial calls.
    pub max_cooldown: Duration,
    /// Number of trailing outcomes the success rate is computed over.
    pub window: usize,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            window: 50,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_errors: u32,
    total_requests: u64,
    total_failures: u64,
    recent: VecDeque<bool>,
    opened_at: Option<Instant>,
    /// Failed trial calls since the circuit last closed.
    reopen_count: u32,
    trial_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_errors: 0,
            total_requests: 0,
            total_failures: 0,
            recent: VecDeque::new(),
            opened_at: None,
            reopen_count: 0,
            trial_in_flight: false,
        }
    }

    fn push_outcome(&mut self, ok: bool, window: usize) {
        self.total_requests += 1;
        self.recent.push_back(ok);
        while self.recent.len() > window.max(1) {
            self.recent.pop_front();
        }
    }

    fn success_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 100.0;
        }
        let ok = self.recent.iter().filter(|ok| **ok).count();
        ok as f64 * 100.0 / self.recent.len() as f64
    }
}

pub struct ResilienceMonitor {
    policy: BreakerPolicy,
    state: Mutex<BreakerState>,
}

impl ResilienceMonitor {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_cooldown(&self, reopen_count: u32) -> Duration {
        exponential_backoff(self.policy.cooldown, self.policy.max_cooldown, reopen_count)
    }

    /// Asks to make one outbound call.
    ///
    /// Rejects with [`CatalogError::CircuitOpen`] while the circuit is open, or
    /// while the half-open trial call is still outstanding. The returned
    /// [`Permit`] must be settled with [`Permit::record`]; dropping the trial
    /// call's permit unsettled counts as a failed trial.
    pub fn try_acquire(&self) -> Result<Permit<'_>, CatalogError> {
        let mut state = self.lock();
        let trial = match state.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooldown = self.current_cooldown(state.reopen_count);
                let ready = state
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= cooldown);
                if !ready {
                    return Err(CatalogError::CircuitOpen);
                }
                info!("Circuit half-open, admitting a trial call");
                state.state = CircuitState::HalfOpen;
                true
            }
            CircuitState::HalfOpen if state.trial_in_flight => {
                return Err(CatalogError::CircuitOpen);
            }
            CircuitState::HalfOpen => true,
        };
        state.trial_in_flight |= trial;

        Ok(Permit {
            monitor: self,
            trial,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.push_outcome(true, self.policy.window);
        state.consecutive_errors = 0;

        if state.state != CircuitState::Closed {
            info!("Trial call succeeded, circuit closed");
            state.state = CircuitState::Closed;
            state.opened_at = None;
            state.reopen_count = 0;
            state.trial_in_flight = false;
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        self.fail(&mut state);
    }

    fn fail(&self, state: &mut BreakerState) {
        state.push_outcome(false, self.policy.window);
        state.total_failures += 1;
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);

        match state.state {
            CircuitState::Closed if state.consecutive_errors >= self.policy.failure_threshold => {
                warn!(
                    "Circuit opened after {} consecutive errors",
                    state.consecutive_errors
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                state.reopen_count = state.reopen_count.saturating_add(1);
                warn!(
                    "Trial call failed, circuit re-opened for {:?}",
                    self.current_cooldown(state.reopen_count)
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.trial_in_flight = false;
            }
            _ => {}
        }
    }

    /// Records the outcome of a call admitted by [`Self::try_acquire`].
    ///
    /// A `NotFound` answer still proves the backend is reachable.
    pub fn record<T>(&self, outcome: &Result<T, CatalogError>) {
        match outcome {
            Ok(_) | Err(CatalogError::NotFound(_)) => self.record_success(),
            Err(CatalogError::CircuitOpen) => {}
            Err(_) => self.record_failure(),
        }
    }

    /// The trial call went away without an outcome, e.g. its future was
    /// dropped by a caller's timeout.
    fn abandon_trial(&self) {
        let mut state = self.lock();
        if state.state == CircuitState::HalfOpen && state.trial_in_flight {
            warn!("Trial call abandoned before completing");
            self.fail(&mut state);
        }
    }

    /// Forces the circuit closed and zeroes every counter.
    pub fn clear_errors(&self) {
        let mut state = self.lock();
        *state = BreakerState::new();
        info!("Resilience monitor cleared");
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        let state = self.lock();
        let success_rate = state.success_rate();
        let retry_after = match (state.state, state.opened_at) {
            (CircuitState::Open, Some(at)) => {
                Some(self.current_cooldown(state.reopen_count).saturating_sub(at.elapsed()))
            }
            _ => None,
        };

        ResilienceSnapshot {
            consecutive_errors: state.consecutive_errors,
            total_requests: state.total_requests,
            total_failures: state.total_failures,
            success_rate,
            healthy: state.state == CircuitState::Closed
                && state.consecutive_errors == 0
                && success_rate >= 50.0,
            state: state.state,
            retry_after,
        }
    }
}

/// Admission for one outbound call, handed out by
/// [`ResilienceMonitor::try_acquire`].
#[must_use = "settle the permit with `record`"]
pub struct Permit<'a> {
    monitor: &'a ResilienceMonitor,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record<T>(mut self, outcome: &Result<T, CatalogError>) {
        self.monitor.record(outcome);
        self.settled = !matches!(outcome, Err(CatalogError::CircuitOpen));
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.monitor.abandon_trial();
        }
    }
}

impl Default for ResilienceMonitor {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: 3,
            cooldown: Duration::from_secs(10),
            max_cooldown: Duration::from_secs(40),
            window: 4,
        }
    }

    fn fail_n(monitor: &ResilienceMonitor, n: u32) {
        for _ in 0..n {
            let permit = monitor.try_acquire().unwrap();
            permit.record::<()>(&Err(CatalogError::Timeout(1)));
        }
    }

    #[test]
    fn opens_after_threshold_and_rejects() {
        let monitor = ResilienceMonitor::new(policy());
        fail_n(&monitor, 2);
        assert_eq!(monitor.snapshot().state, CircuitState::Closed);

        fail_n(&monitor, 1);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_errors, 3);
        assert!(!snapshot.healthy);
        assert!(matches!(monitor.try_acquire(), Err(CatalogError::CircuitOpen)));
    }

    #[test]
    fn success_resets_consecutive_errors() {
        let monitor = ResilienceMonitor::new(policy());
        fail_n(&monitor, 2);
        monitor.record_success();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.consecutive_errors, 0);
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.total_failures, 2);
    }

    #[test]
    fn success_rate_uses_trailing_window() {
        let monitor = ResilienceMonitor::new(policy());
        assert_eq!(monitor.snapshot().success_rate, 100.0);

        monitor.record_failure();
        monitor.record_failure();
        for _ in 0..4 {
            monitor.record_success();
        }

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.success_rate, 100.0);
        assert_eq!(snapshot.total_requests, 6);
        assert!(snapshot.healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_closes_on_success() {
        let monitor = ResilienceMonitor::new(policy());
        fail_n(&monitor, 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        let trial = monitor.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(monitor.snapshot().state, CircuitState::HalfOpen);
        // One trial call at a time
        assert!(matches!(monitor.try_acquire(), Err(CatalogError::CircuitOpen)));

        trial.record(&Ok(()));
        assert_eq!(monitor.snapshot().state, CircuitState::Closed);
        assert!(!monitor.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_reopens_instead_of_wedging() {
        let monitor = ResilienceMonitor::new(policy());
        fail_n(&monitor, 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        drop(monitor.try_acquire().unwrap());

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.retry_after, Some(Duration::from_secs(20)));

        tokio::time::advance(Duration::from_secs(20)).await;
        let trial = monitor.try_acquire().unwrap();
        assert!(trial.is_trial());
        trial.record(&Ok(()));
        assert_eq!(monitor.snapshot().state, CircuitState::Closed);
    }

    #[test]
    fn dropped_closed_permit_changes_nothing() {
        let monitor = ResilienceMonitor::new(policy());
        drop(monitor.try_acquire().unwrap());

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_doubles_cooldown() {
        let monitor = ResilienceMonitor::new(policy());
        fail_n(&monitor, 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        fail_n(&monitor, 1);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.retry_after, Some(Duration::from_secs(20)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(monitor.try_acquire().is_err());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(monitor.try_acquire().is_ok());
    }

    #[test]
    fn clear_errors_resets_from_any_state() {
        let monitor = ResilienceMonitor::new(policy());
        fail_n(&monitor, 3);
        assert_eq!(monitor.snapshot().state, CircuitState::Open);

        monitor.clear_errors();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.consecutive_errors, 0);
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert!(monitor.try_acquire().is_ok());
    }

    #[test]
    fn not_found_counts_as_reachable() {
        let monitor = ResilienceMonitor::new(policy());
        monitor.record::<()>(&Err(CatalogError::Timeout(10)));
        monitor.record::<()>(&Err(CatalogError::NotFound("gone".into())));

        assert_eq!(monitor.snapshot().consecutive_errors, 0);
        assert_eq!(monitor.snapshot().total_failures, 1);
    }
}
