//! Budget-based admission control.
//!
//! A worker that pulls several expensive jobs back-to-back can exhaust disk,
//! network or CPU. When a budget ceiling is configured, every job must be
//! admitted against the remaining budget before it is attempted; a job that
//! does not fit is rejected without touching the counter and goes back to the
//! queue.
//!
//! Cost computation and refill are strategies: [`CostModel`] decides what a
//! job costs, and [`AdmissionController::spawn_periodic_reset`] is the only
//! refill this crate ships. Without it the ceiling holds for the process
//! lifetime.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::MetricsCollector;
use crate::queue::Job;

/// Shared remaining-cost counter.
#[derive(Debug)]
pub struct Budget {
    ceiling: i64,
    remaining: AtomicI64,
}

impl Budget {
    /// Creates a full budget with the given ceiling.
    pub fn new(ceiling: i64) -> Self {
        Self {
            ceiling,
            remaining: AtomicI64::new(ceiling),
        }
    }

    /// Atomically takes `cost` from the budget if it fits.
    ///
    /// Returns false and leaves the budget untouched when `cost` exceeds
    /// what remains. Negative costs are treated as zero.
    pub fn try_admit(&self, cost: i64) -> bool {
        let cost = cost.max(0);
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                (cost <= remaining).then_some(remaining - cost)
            })
            .is_ok()
    }

    /// Remaining budget.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Configured ceiling.
    pub fn ceiling(&self) -> i64 {
        self.ceiling
    }

    /// Returns `cost` to the budget, never exceeding the ceiling.
    pub fn release(&self, cost: i64) {
        let cost = cost.max(0);
        let ceiling = self.ceiling;
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                Some(remaining.saturating_add(cost).min(ceiling))
            });
    }

    /// Restores the budget to its ceiling.
    pub fn reset(&self) {
        self.remaining.store(self.ceiling, Ordering::Release);
    }
}

/// Computes the cost of admitting a job.
pub trait CostModel: Send + Sync {
    /// Cost charged against the budget for `job`.
    fn cost(&self, job: &Job) -> i64;
}

/// Every job costs the same.
#[derive(Debug, Clone, Copy)]
pub struct FixedCost(pub i64);

impl Default for FixedCost {
    fn default() -> Self {
        Self(1)
    }
}

impl CostModel for FixedCost {
    fn cost(&self, _job: &Job) -> i64 {
        self.0
    }
}

/// Uses the job's cost hint, falling back to `default`.
#[derive(Debug, Clone, Copy)]
pub struct HintedCost {
    pub default: i64,
}

impl CostModel for HintedCost {
    fn cost(&self, job: &Job) -> i64 {
        job.cost_hint.unwrap_or(self.default)
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The job may run; `cost` has been charged.
    Admitted { cost: i64 },
    /// The job does not fit into what remains.
    Rejected { cost: i64, remaining: i64 },
}

/// Gate consulted by the handler before any work starts.
#[derive(Clone)]
pub struct AdmissionController {
    budget: Option<Arc<Budget>>,
    cost_model: Arc<dyn CostModel>,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// A controller that admits every job.
    pub fn unlimited() -> Self {
        Self {
            budget: None,
            cost_model: Arc::new(FixedCost::default()),
            metrics: MetricsCollector::new(),
        }
    }

    /// A controller with the given ceiling. A ceiling of zero or less
    /// disables budgeting.
    pub fn with_budget(ceiling: i64, cost_model: Arc<dyn CostModel>) -> Self {
        let budget = (ceiling > 0).then(|| Arc::new(Budget::new(ceiling)));
        let metrics = MetricsCollector::new();
        if let Some(budget) = &budget {
            metrics.set_budget_remaining(budget.remaining());
        }
        Self {
            budget,
            cost_model,
            metrics,
        }
    }

    /// Checks `job` against the budget, charging it on success.
    pub fn admit(&self, job: &Job) -> Admission {
        let Some(budget) = &self.budget else {
            return Admission::Admitted { cost: 0 };
        };

        let cost = self.cost_model.cost(job);
        let admitted = budget.try_admit(cost);
        let remaining = budget.remaining();
        self.metrics.set_budget_remaining(remaining);

        if admitted {
            debug!(job_id = job.id, cost, remaining, "Job admitted");
            Admission::Admitted { cost }
        } else {
            info!(job_id = job.id, cost, remaining, "Job rejected by budget");
            Admission::Rejected { cost, remaining }
        }
    }

    /// The shared budget, if one is configured.
    pub fn budget(&self) -> Option<&Arc<Budget>> {
        self.budget.as_ref()
    }

    /// Resets the budget to its ceiling every `interval` until `cancel` fires.
    ///
    /// Returns `None` when no budget is configured.
    pub fn spawn_periodic_reset(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let budget = Arc::clone(self.budget.as_ref()?);
        let metrics = self.metrics.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        budget.reset();
                        metrics.set_budget_remaining(budget.remaining());
                        debug!(ceiling = budget.ceiling(), "Budget reset");
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: i64) -> Job {
        Job::new(id, "acme/widgets", "abcd1234")
    }

    #[test]
    fn test_budget_admits_prefix_and_rejects_without_mutation() {
        let budget = Budget::new(100);
        let costs = [30, 50, 30, 20];

        let admitted: Vec<bool> = costs.iter().map(|c| budget.try_admit(*c)).collect();

        assert_eq!(admitted, vec![true, true, false, true]);
        assert_eq!(budget.remaining(), 0);
        assert!(!budget.try_admit(1));
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_budget_exact_fit_and_negative_cost() {
        let budget = Budget::new(10);
        assert!(budget.try_admit(10));
        assert!(budget.try_admit(-5));
        assert_eq!(budget.remaining(), 0);

        budget.reset();
        assert_eq!(budget.remaining(), 10);
        assert_eq!(budget.ceiling(), 10);
    }

    #[test]
    fn test_budget_release_is_capped_at_ceiling() {
        let budget = Budget::new(50);
        assert!(budget.try_admit(40));
        budget.release(15);
        assert_eq!(budget.remaining(), 25);
        budget.release(100);
        assert_eq!(budget.remaining(), 50);
    }

    #[test]
    fn test_budget_concurrent_admissions_never_overspend() {
        let budget = Arc::new(Budget::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || (0..100).filter(|_| budget.try_admit(3)).count())
            })
            .collect();

        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .sum();

        assert_eq!(admitted, 333);
        assert_eq!(budget.remaining(), 1);
    }

    #[test]
    fn test_unlimited_controller_admits_everything() {
        let controller = AdmissionController::unlimited();
        for id in 0..10 {
            assert_eq!(controller.admit(&job(id)), Admission::Admitted { cost: 0 });
        }
        assert!(controller.budget().is_none());
    }

    #[test]
    fn test_zero_ceiling_disables_budget() {
        let controller = AdmissionController::with_budget(0, Arc::new(FixedCost(60)));
        assert!(controller.budget().is_none());
        assert_eq!(controller.admit(&job(1)), Admission::Admitted { cost: 0 });
    }

    #[test]
    fn test_ceiling_100_with_two_60_cost_jobs() {
        let controller = AdmissionController::with_budget(100, Arc::new(FixedCost(60)));

        assert_eq!(controller.admit(&job(1)), Admission::Admitted { cost: 60 });
        assert_eq!(
            controller.admit(&job(2)),
            Admission::Rejected {
                cost: 60,
                remaining: 40
            }
        );
        assert_eq!(controller.budget().map(|b| b.remaining()), Some(40));
    }

    #[test]
    fn test_hinted_cost_model() {
        let model = HintedCost { default: 5 };
        assert_eq!(model.cost(&job(1)), 5);
        assert_eq!(model.cost(&job(1).with_cost_hint(70)), 70);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_reset_refills_budget() {
        let controller = AdmissionController::with_budget(10, Arc::new(FixedCost(10)));
        let cancel = CancellationToken::new();
        let handle = controller
            .spawn_periodic_reset(Duration::from_secs(60), cancel.clone())
            .expect("budget is configured");

        assert!(matches!(controller.admit(&job(1)), Admission::Admitted { .. }));
        assert!(matches!(controller.admit(&job(2)), Admission::Rejected { .. }));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(matches!(controller.admit(&job(3)), Admission::Admitted { .. }));

        cancel.cancel();
        handle.await.expect("reset task should exit cleanly");
    }

    #[test]
    fn test_periodic_reset_without_budget() {
        let controller = AdmissionController::unlimited();
        assert!(controller
            .spawn_periodic_reset(Duration::from_secs(1), CancellationToken::new())
            .is_none());
    }
}
