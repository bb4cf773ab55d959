//! Cost and wall-time ceiling for one workflow run.

use std::future::Future;
use std::time::Duration;

use braid_cache::CachedCompletion;
use braid_capability::{CapabilityError, Classification, Completion};
use braid_types::{ErrorKind, TokenUsage};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::WorkflowConfig;

/// Anything a capability call returns that carries spend.
pub trait Spend {
    /// Cost and tokens to charge for this value.
    fn spend(&self) -> (f64, TokenUsage);
}

impl Spend for Completion {
    fn spend(&self) -> (f64, TokenUsage) {
        (self.cost, self.tokens)
    }
}

impl Spend for Classification {
    fn spend(&self) -> (f64, TokenUsage) {
        (self.cost, self.tokens)
    }
}

impl Spend for CachedCompletion {
    // Hits and coalesced waits were paid for by someone else.
    fn spend(&self) -> (f64, TokenUsage) {
        if self.is_fresh() {
            self.completion.spend()
        } else {
            (0.0, TokenUsage::default())
        }
    }
}

/// A capability call that was started under a [`BudgetGuard`].
#[derive(Debug)]
pub struct Metered<T> {
    pub result: Result<T, CapabilityError>,
    /// Cost charged to the run for this call.
    pub cost: f64,
    pub tokens: TokenUsage,
    pub duration: Duration,
}

impl<T> Metered<T> {
    /// Map the successful value, keeping the charged spend.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Metered<U> {
        Metered {
            result: self.result.map(f),
            cost: self.cost,
            tokens: self.tokens,
            duration: self.duration,
        }
    }
}

/// Tracks elapsed time and cumulative cost for one run.
///
/// The guard owns the run's cancellation token. Aborting (budget exhausted,
/// deadline reached, or a fail-fast branch failure) records the first error
/// and cancels the token; every capability call made through the guard
/// receives a child of it.
#[derive(Debug)]
pub struct BudgetGuard {
    started: Instant,
    timeout: Option<Duration>,
    max_cost: Option<f64>,
    spent: Mutex<f64>,
    abort: Mutex<Option<ErrorKind>>,
    cancel: CancellationToken,
}

impl BudgetGuard {
    /// Start the clock for a run.
    pub fn new(timeout: Option<Duration>, max_cost: Option<f64>) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            max_cost,
            spent: Mutex::new(0.0),
            abort: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(config.timeout(), config.max_cost)
    }

    /// The run's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Cost charged so far.
    pub fn spent(&self) -> f64 {
        *self.spent.lock()
    }

    /// Add `cost` to the run's spend.
    pub fn charge(&self, cost: f64) {
        *self.spent.lock() += cost;
    }

    /// When the run's timeout elapses, if it has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| self.started + timeout)
    }

    /// The error the run was aborted with, if any.
    pub fn aborted(&self) -> Option<ErrorKind> {
        self.abort.lock().clone()
    }

    /// Abort the run and cancel everything in flight.
    ///
    /// The first abort wins; the returned error is the one the run will
    /// report.
    pub fn abort(&self, error: ErrorKind) -> ErrorKind {
        let winner = {
            let mut slot = self.abort.lock();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    match &error {
                        ErrorKind::BudgetExceeded { spent, limit } => {
                            warn!(spent = spent, limit = limit, "Budget exceeded, aborting run");
                        }
                        ErrorKind::TimeoutExceeded {
                            elapsed_ms,
                            limit_ms,
                        } => {
                            warn!(
                                elapsed_ms = elapsed_ms,
                                limit_ms = limit_ms,
                                "Timeout exceeded, aborting run"
                            );
                        }
                        _ => {}
                    }
                    *slot = Some(error.clone());
                    error
                }
            }
        };
        self.cancel.cancel();
        winner
    }

    /// Check the budget before starting an invocation.
    ///
    /// Returns the abort error if the run was already aborted or if this
    /// check exhausts the budget.
    pub fn check(&self) -> Result<(), ErrorKind> {
        if let Some(error) = self.aborted() {
            return Err(error);
        }
        if let Some(limit) = self.timeout {
            let elapsed = self.elapsed();
            if elapsed > limit {
                return Err(self.abort(timeout_error(elapsed, limit)));
            }
        }
        if let Some(limit) = self.max_cost {
            let spent = self.spent();
            if spent > limit {
                return Err(self.abort(ErrorKind::BudgetExceeded { spent, limit }));
            }
        }
        Ok(())
    }

    /// Run one capability call under this budget.
    ///
    /// Fails without polling `call` when the budget is already exhausted.
    /// If the run's deadline passes while the call is in flight, the run is
    /// aborted (cancelling the call's token) and the call is still awaited so
    /// that whatever it spent before stopping is charged.
    pub async fn run<T, F>(&self, call: F) -> Result<Metered<T>, ErrorKind>
    where
        T: Spend,
        F: Future<Output = Result<T, CapabilityError>>,
    {
        self.check()?;
        let started = Instant::now();

        let result = match (self.deadline(), self.timeout) {
            (Some(deadline), Some(limit)) => {
                tokio::pin!(call);
                tokio::select! {
                    result = &mut call => result,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.abort(timeout_error(self.elapsed(), limit));
                        call.await
                    }
                }
            }
            _ => call.await,
        };

        let (cost, tokens) = match &result {
            Ok(value) => value.spend(),
            Err(error) => (error.cost(), error.tokens()),
        };
        self.charge(cost);

        Ok(Metered {
            result,
            cost,
            tokens,
            duration: started.elapsed(),
        })
    }
}

fn timeout_error(elapsed: Duration, limit: Duration) -> ErrorKind {
    ErrorKind::TimeoutExceeded {
        elapsed_ms: elapsed.as_millis() as u64,
        limit_ms: limit.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_capability::{Capability, MockCapability};
    use serde_json::json;

    #[test]
    fn test_unbounded_never_aborts() {
        let guard = BudgetGuard::new(None, None);
        guard.charge(1_000.0);
        assert!(guard.check().is_ok());
        assert!(guard.deadline().is_none());
    }

    #[test]
    fn test_cost_overrun_aborts_on_next_check() {
        let guard = BudgetGuard::new(None, Some(1.0));
        guard.charge(0.6);
        assert!(guard.check().is_ok());
        guard.charge(0.5);

        let err = guard.check().unwrap_err();
        assert!(matches!(err, ErrorKind::BudgetExceeded { limit, .. } if limit == 1.0));
        assert!(guard.token().is_cancelled());
        assert_eq!(guard.aborted(), Some(err));
    }

    #[test]
    fn test_spending_exactly_the_limit_is_allowed() {
        let guard = BudgetGuard::new(None, Some(1.0));
        guard.charge(1.0);
        assert!(guard.check().is_ok());
    }

    #[test]
    fn test_first_abort_wins() {
        let guard = BudgetGuard::new(None, None);
        let first = guard.abort(ErrorKind::Cancelled);
        let second = guard.abort(ErrorKind::BudgetExceeded {
            spent: 2.0,
            limit: 1.0,
        });
        assert_eq!(first, ErrorKind::Cancelled);
        assert_eq!(second, ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_past_timeout_aborts() {
        let guard = BudgetGuard::new(Some(Duration::from_secs(1)), None);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            guard.check(),
            Err(ErrorKind::TimeoutExceeded { limit_ms: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn test_run_charges_failure_spend() {
        let guard = BudgetGuard::new(None, None);
        let cap = MockCapability::new("flaky").failing("boom").with_cost(0.3);
        let signal = guard.token().child_token();

        let metered = guard.run(cap.invoke(json!("x"), &signal)).await.unwrap();
        assert!(metered.result.is_err());
        assert_eq!(metered.cost, 0.3);
        assert_eq!(guard.spent(), 0.3);
    }

    #[tokio::test]
    async fn test_run_refuses_after_abort() {
        let guard = BudgetGuard::new(None, None);
        guard.abort(ErrorKind::Cancelled);
        let cap = MockCapability::new("never");
        let signal = guard.token().child_token();

        assert!(guard.run(cap.invoke(json!("x"), &signal)).await.is_err());
        assert_eq!(cap.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_in_flight_call() {
        let guard = BudgetGuard::new(Some(Duration::from_secs(5)), None);
        let cap = MockCapability::new("slow")
            .with_delay(Duration::from_secs(60))
            .with_cancel_cost(0.02);
        let signal = guard.token().child_token();

        let metered = guard.run(cap.invoke(json!("x"), &signal)).await.unwrap();

        assert!(metered.result.unwrap_err().is_cancelled());
        assert_eq!(metered.cost, 0.02);
        assert!(matches!(
            guard.aborted(),
            Some(ErrorKind::TimeoutExceeded { limit_ms: 5000, .. })
        ));
    }
}
