//! Circuit breaker pattern implementation.
//!
//! [`Breaker`] is the capability the client dispatches through when circuit
//! parameters are configured. [`CircuitBreaker`] is the default
//! implementation. [`CircuitGate`] decides per client whether calls go through
//! a breaker at all and invokes the fallback when one diverts a call.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Fallback;
use crate::{BreakerError, CircuitParameters, Dispatch, Request, Transport};

/// A dispatch handed to a breaker for protected execution.
pub type ProtectedCall<'a> = BoxFuture<'a, Dispatch>;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single trial request is allowed.
    HalfOpen,
}

/// Runs protected calls according to breaker state.
///
/// `invoke` runs `call` zero or one times. A completed call must be recorded
/// as a failure exactly when [`Dispatch::is_failure`] is true.
#[async_trait]
pub trait Breaker: Send + Sync {
    /// Run `call` if the breaker allows it.
    async fn invoke(&self, call: ProtectedCall<'_>) -> Result<Dispatch, BreakerError>;

    /// Get the current circuit state.
    fn state(&self) -> CircuitState;
}

/// Default breaker with a rolling failure window, call timeout, and bulkhead.
pub struct CircuitBreaker {
    timeout: Duration,
    reset_timeout: Duration,
    max_failures: u32,
    rolling_window: Duration,
    state: RwLock<CircuitState>,
    failures: Mutex<VecDeque<Instant>>,
    opened_at: RwLock<Option<Instant>>,
    trial_in_flight: AtomicBool,
    bulkhead: Option<Semaphore>,
}

impl CircuitBreaker {
    /// Create a breaker from circuit parameters.
    pub fn new(parameters: &CircuitParameters) -> Self {
        Self {
            timeout: parameters.timeout,
            reset_timeout: parameters.reset_timeout,
            max_failures: parameters.max_failures,
            rolling_window: parameters.rolling_window,
            state: RwLock::new(CircuitState::Closed),
            failures: Mutex::new(VecDeque::new()),
            opened_at: RwLock::new(None),
            trial_in_flight: AtomicBool::new(false),
            bulkhead: (parameters.bulkhead_size > 0)
                .then(|| Semaphore::new(parameters.bulkhead_size)),
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        *self.state.read()
    }

    /// Number of failures inside the rolling window.
    pub fn failure_count(&self) -> usize {
        let mut failures = self.failures.lock();
        self.prune(&mut failures, Instant::now());
        failures.len()
    }

    /// Check if a call is allowed, claiming the trial slot when half-open.
    pub fn is_allowed(&self) -> bool {
        self.admit().is_some()
    }

    fn admit(&self) -> Option<Admission> {
        self.maybe_transition_to_half_open();

        let state = *self.state.read();
        match state {
            CircuitState::Closed => Some(Admission::Regular),
            CircuitState::Open => None,
            CircuitState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
                .then_some(Admission::Trial),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let state = *self.state.read();
        match state {
            CircuitState::HalfOpen => self.close(),
            CircuitState::Closed => {}
            CircuitState::Open => {
                debug!("Success recorded while circuit open, ignoring");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let state = *self.state.read();
        match state {
            CircuitState::Closed => {
                let now = Instant::now();
                let count = {
                    let mut failures = self.failures.lock();
                    self.prune(&mut failures, now);
                    failures.push_back(now);
                    failures.len()
                };
                if count >= self.max_failures as usize {
                    self.open();
                }
            }
            // Any failure in half-open state reopens the circuit
            CircuitState::HalfOpen => self.open(),
            CircuitState::Open => {}
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.close();
    }

    fn prune(&self, failures: &mut VecDeque<Instant>, now: Instant) {
        while failures
            .front()
            .is_some_and(|at| now.duration_since(*at) > self.rolling_window)
        {
            failures.pop_front();
        }
    }

    fn open(&self) {
        let mut state = self.state.write();
        if *state != CircuitState::Open {
            warn!(max_failures = self.max_failures, "Circuit breaker opening");
            *state = CircuitState::Open;
            *self.opened_at.write() = Some(Instant::now());
            self.trial_in_flight.store(false, Ordering::SeqCst);
        }
    }

    fn close(&self) {
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            info!("Circuit breaker closing");
            *state = CircuitState::Closed;
            *self.opened_at.write() = None;
            self.failures.lock().clear();
            self.trial_in_flight.store(false, Ordering::SeqCst);
        }
    }

    fn release_trial(&self) {
        if *self.state.read() == CircuitState::HalfOpen {
            debug!("Half-open trial abandoned, releasing trial slot");
            self.trial_in_flight.store(false, Ordering::SeqCst);
        }
    }

    fn maybe_transition_to_half_open(&self) {
        if *self.state.read() != CircuitState::Open {
            return;
        }

        let opened_at = *self.opened_at.read();
        if let Some(opened) = opened_at
            && opened.elapsed() >= self.reset_timeout
        {
            let mut state = self.state.write();
            if *state == CircuitState::Open {
                debug!("Circuit breaker transitioning to half-open");
                *state = CircuitState::HalfOpen;
                self.trial_in_flight.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Regular,
    Trial,
}

/// Frees the half-open trial slot if the protected call is dropped before its
/// outcome is recorded.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl TrialSlot<'_> {
    fn settle(mut self) {
        self.held = false;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.breaker.release_trial();
        }
    }
}

#[async_trait]
impl Breaker for CircuitBreaker {
    async fn invoke(&self, call: ProtectedCall<'_>) -> Result<Dispatch, BreakerError> {
        // The timeout covers both the bulkhead wait and the call itself.
        let deadline = Instant::now() + self.timeout;

        let _permit = match &self.bulkhead {
            Some(bulkhead) => match tokio::time::timeout_at(deadline, bulkhead.acquire()).await {
                Ok(permit) => Some(permit.map_err(|_| BreakerError::Open)?),
                Err(_) => {
                    warn!(timeout = ?self.timeout, "Timed out waiting for bulkhead permit");
                    return Err(BreakerError::Timeout(self.timeout));
                }
            },
            None => None,
        };

        let Some(admission) = self.admit() else {
            debug!("Circuit breaker rejected call");
            return Err(BreakerError::Open);
        };
        let slot = TrialSlot {
            breaker: self,
            held: admission == Admission::Trial,
        };

        let outcome = tokio::time::timeout_at(deadline, call).await;
        slot.settle();

        match outcome {
            Ok(dispatch) => {
                if dispatch.is_failure() {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Ok(dispatch)
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Protected call timed out");
                self.record_failure();
                Err(BreakerError::Timeout(self.timeout))
            }
        }
    }

    fn state(&self) -> CircuitState {
        CircuitBreaker::state(self)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &*self.state.read())
            .field("timeout", &self.timeout)
            .field("reset_timeout", &self.reset_timeout)
            .field("max_failures", &self.max_failures)
            .field("rolling_window", &self.rolling_window)
            .finish_non_exhaustive()
    }
}

/// Routes each dispatch either straight to the transport or through a breaker.
pub(crate) struct CircuitGate {
    guard: Option<Guard>,
}

struct Guard {
    breaker: Arc<dyn Breaker>,
    fallback: Fallback,
}

impl CircuitGate {
    /// A gate that always dispatches directly.
    pub(crate) fn direct() -> Self {
        Self { guard: None }
    }

    /// A gate that dispatches through `breaker`, or a default breaker built
    /// from `parameters`.
    pub(crate) fn guarded(parameters: CircuitParameters, breaker: Option<Arc<dyn Breaker>>) -> Self {
        let breaker =
            breaker.unwrap_or_else(|| Arc::new(CircuitBreaker::new(&parameters)) as Arc<dyn Breaker>);
        Self {
            guard: Some(Guard {
                breaker,
                fallback: parameters.fallback,
            }),
        }
    }

    pub(crate) fn state(&self) -> Option<CircuitState> {
        self.guard.as_ref().map(|guard| guard.breaker.state())
    }

    /// Dispatch `request`, invoking the fallback if the breaker diverts it.
    pub(crate) async fn dispatch(
        &self,
        transport: &dyn Transport,
        request: &Request,
    ) -> Result<Dispatch, BreakerError> {
        let Some(guard) = &self.guard else {
            return Ok(transport.send(request).await);
        };

        match guard.breaker.invoke(transport.send(request)).await {
            Ok(dispatch) => Ok(dispatch),
            Err(error) => {
                warn!(url = %request.url(), error = %error, "Circuit breaker diverted request to fallback");
                (guard.fallback)(error, request);
                Err(error)
            }
        }
    }
}

impl fmt::Debug for CircuitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitGate")
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;

    fn breaker(max_failures: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            &CircuitParameters::new(|_, _| {})
                .with_max_failures(max_failures)
                .with_timeout(Duration::from_millis(100))
                .with_reset_timeout(Duration::from_secs(5))
                .with_rolling_window(Duration::from_secs(10)),
        )
    }

    fn ok_call() -> ProtectedCall<'static> {
        Box::pin(async { Dispatch::default() })
    }

    fn failing_call() -> ProtectedCall<'static> {
        Box::pin(async { Dispatch::failure(TransportError::new("connection refused")) })
    }

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = breaker(3);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_allowed());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_are_forgotten() {
        let cb = breaker(2);

        cb.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_trial() {
        let cb = breaker(1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_allowed());
        assert!(!cb.is_allowed());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.is_allowed());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_invoke_counts_only_transport_failures() {
        let cb = breaker(1);

        let dispatch = cb.invoke(ok_call()).await.unwrap();
        assert!(!dispatch.is_failure());
        assert_eq!(cb.state(), CircuitState::Closed);

        let dispatch = cb.invoke(failing_call()).await.unwrap();
        assert!(dispatch.is_failure());
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.invoke(ok_call()).await.unwrap_err();
        assert_eq!(err, BreakerError::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_timeout_counts_as_failure() {
        let cb = breaker(1);
        let slow: ProtectedCall<'static> = Box::pin(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Dispatch::default()
        });

        let err = cb.invoke(slow).await.unwrap_err();
        assert_eq!(err, BreakerError::Timeout(Duration::from_millis(100)));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_bulkhead_limits_concurrent_calls() {
        use std::sync::atomic::AtomicUsize;

        let cb = Arc::new(CircuitBreaker::new(
            &CircuitParameters::new(|_, _| {})
                .with_bulkhead_size(1)
                .with_timeout(Duration::from_secs(5)),
        ));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cb = Arc::clone(&cb);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let call: ProtectedCall<'static> = Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Dispatch::default()
                });
                cb.invoke(call).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_half_open_slot() {
        let cb = breaker(1);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let stalled: ProtectedCall<'static> = Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Dispatch::default()
        });
        let abandoned = tokio::time::timeout(Duration::from_millis(10), cb.invoke(stalled)).await;
        assert!(abandoned.is_err());

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.invoke(ok_call()).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulkhead_wait_is_bounded_by_timeout() {
        let cb = CircuitBreaker::new(
            &CircuitParameters::new(|_, _| {})
                .with_bulkhead_size(1)
                .with_timeout(Duration::from_millis(100)),
        );
        let _held = cb.bulkhead.as_ref().unwrap().acquire().await.unwrap();

        let err = cb.invoke(ok_call()).await.unwrap_err();

        assert_eq!(err, BreakerError::Timeout(Duration::from_millis(100)));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_reset_closes_circuit() {
        let cb = breaker(1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
