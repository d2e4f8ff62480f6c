//! Stack cost comparison
//!
//! Diffs two snapshots, then resolves the cost of every resource on both
//! sides on a bounded pool of tokio tasks. Resolution failures stay local to
//! their resource; only a structural problem with a snapshot (duplicate
//! logical ids) fails the comparison.
//!
//! ## Cancellation
//!
//! A `CancelToken` is triggered either by its `CancelHandle` or by an
//! optional deadline. Once triggered no more resolutions are started,
//! in-flight ones are aborted, and every resource without a result is
//! reported as `PricingModel::Error` with `CANCELLED_MESSAGE`. Results that
//! finished before the cancellation are kept.

use crate::diff::{self, DiffSummary};
use crate::error::Result;
use crate::model::{PricingModel, Resource, ResourceCost, ResourceDiff};
use crate::resolver::CostResolver;
use crate::tiers::round_currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const CANCELLED_MESSAGE: &str = "cost resolution cancelled";
const TASK_FAILED_MESSAGE: &str = "cost resolution task failed";

/// Triggers cancellation of the comparisons holding the paired token
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with every receiver gone
        self.tx.send_replace(true);
    }
}

/// Observed by a running comparison
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Token that only a deadline (if one is added) can trigger
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx, deadline: None }
    }

    /// Also trigger once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.deadline.map_or(false, |at| Instant::now() >= at)
    }

    /// Resolves once the token is triggered; never resolves otherwise
    pub async fn cancelled(&mut self) {
        let deadline = self.deadline;
        let rx = &mut self.rx;
        let signalled = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling
                    std::future::pending::<()>().await;
                }
            }
        };

        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = signalled => {}
                    _ = tokio::time::sleep_until(at) => {}
                }
            }
            None => signalled.await,
        }
    }
}

/// Token paired with a handle that can trigger it
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx, deadline: None })
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

/// Which snapshot a cost belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Old,
    New,
}

/// Result of comparing two snapshots
#[derive(Debug, Clone, Serialize)]
pub struct StackComparison {
    pub diffs: Vec<ResourceDiff>,
    /// In declaration order of the old snapshot
    pub old_costs: Vec<ResourceCost>,
    /// In declaration order of the new snapshot
    pub new_costs: Vec<ResourceCost>,
    /// Sum of `Fixed` monthly costs, rounded to cents
    pub old_total: Decimal,
    pub new_total: Decimal,
    pub generated_at: DateTime<Utc>,
    pub region: String,
    pub cancelled: bool,
}

impl StackComparison {
    /// Monthly change of the fixed totals
    pub fn delta(&self) -> Decimal {
        self.new_total - self.old_total
    }

    pub fn costs(&self, side: Side) -> &[ResourceCost] {
        match side {
            Side::Old => &self.old_costs,
            Side::New => &self.new_costs,
        }
    }

    /// Resources priced on an estimated usage volume; not part of the totals
    pub fn usage_based(&self, side: Side) -> Vec<&ResourceCost> {
        self.costs(side)
            .iter()
            .filter(|c| c.pricing_model == PricingModel::UsageBased)
            .collect()
    }

    /// Resources that could not be priced
    pub fn errors(&self, side: Side) -> Vec<&ResourceCost> {
        self.costs(side).iter().filter(|c| c.is_error()).collect()
    }

    /// Old and new cost of one logical id; a side without it is `None`
    pub fn cost_pair(&self, logical_id: &str) -> (Option<&ResourceCost>, Option<&ResourceCost>) {
        let find = |costs: &[ResourceCost]| costs.iter().position(|c| c.logical_id == logical_id);
        (
            find(&self.old_costs).map(|i| &self.old_costs[i]),
            find(&self.new_costs).map(|i| &self.new_costs[i]),
        )
    }

    pub fn summary(&self) -> DiffSummary {
        diff::summary_for(self.old_costs.len(), &self.diffs)
    }
}

/// Sum the fixed monthly costs of one side
pub fn fixed_total(costs: &[ResourceCost]) -> Decimal {
    let total: Decimal = costs
        .iter()
        .filter(|c| c.pricing_model == PricingModel::Fixed)
        .filter_map(|c| c.monthly_cost)
        .sum();
    round_currency(total)
}

pub struct StackComparator {
    resolver: Arc<CostResolver>,
    max_concurrency: usize,
}

impl StackComparator {
    pub fn new(resolver: CostResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Upper bound on concurrent resolutions; at least one
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn compare(&self, old: &[Resource], new: &[Resource]) -> Result<StackComparison> {
        self.compare_with_cancel(old, new, CancelToken::never()).await
    }

    pub async fn compare_with_cancel(
        &self,
        old: &[Resource],
        new: &[Resource],
        mut cancel: CancelToken,
    ) -> Result<StackComparison> {
        let diffs = diff::diff(old, new)?;
        info!(
            old = old.len(),
            new = new.len(),
            changes = diffs.len(),
            concurrency = self.max_concurrency,
            "resolving stack costs"
        );

        let mut old_slots: Vec<Option<ResourceCost>> = vec![None; old.len()];
        let mut new_slots: Vec<Option<ResourceCost>> = vec![None; new.len()];

        let mut jobs = old
            .iter()
            .enumerate()
            .map(|(i, r)| (Side::Old, i, r))
            .chain(new.iter().enumerate().map(|(i, r)| (Side::New, i, r)));
        let mut next = jobs.next();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<(Side, usize, ResourceCost)> = JoinSet::new();
        let mut cancelled = cancel.is_cancelled();

        // This loop is the only writer of the result slots
        while !cancelled && (next.is_some() || !join_set.is_empty()) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                }
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    match joined {
                        Ok((side, index, cost)) => {
                            store(&mut old_slots, &mut new_slots, side, index, cost)
                        }
                        Err(e) => warn!("cost resolution task failed: {}", e),
                    }
                }
                permit = Arc::clone(&semaphore).acquire_owned(), if next.is_some() => {
                    let Ok(permit) = permit else { break };
                    if let Some((side, index, resource)) = next.take() {
                        let resolver = Arc::clone(&self.resolver);
                        let resource = resource.clone();
                        join_set.spawn(async move {
                            let _permit = permit;
                            (side, index, resolver.resolve(&resource).await)
                        });
                    }
                    next = jobs.next();
                }
            }
        }

        if cancelled {
            warn!("stack cost resolution cancelled");
            join_set.abort_all();
            // Keep whatever finished before the abort landed
            while let Some(joined) = join_set.join_next().await {
                if let Ok((side, index, cost)) = joined {
                    store(&mut old_slots, &mut new_slots, side, index, cost);
                }
            }
        }

        let unfinished = if cancelled {
            CANCELLED_MESSAGE
        } else {
            TASK_FAILED_MESSAGE
        };
        let old_costs = fill(old, old_slots, unfinished);
        let new_costs = fill(new, new_slots, unfinished);

        let comparison = StackComparison {
            diffs,
            old_total: fixed_total(&old_costs),
            new_total: fixed_total(&new_costs),
            old_costs,
            new_costs,
            generated_at: Utc::now(),
            region: self.resolver.region().to_string(),
            cancelled,
        };
        info!(
            old_total = %comparison.old_total,
            new_total = %comparison.new_total,
            "stack cost comparison complete"
        );
        Ok(comparison)
    }
}

fn store(
    old_slots: &mut [Option<ResourceCost>],
    new_slots: &mut [Option<ResourceCost>],
    side: Side,
    index: usize,
    cost: ResourceCost,
) {
    let slots = match side {
        Side::Old => old_slots,
        Side::New => new_slots,
    };
    if let Some(slot) = slots.get_mut(index) {
        *slot = Some(cost);
    }
}

fn fill(resources: &[Resource], slots: Vec<Option<ResourceCost>>, message: &str) -> Vec<ResourceCost> {
    resources
        .iter()
        .zip(slots)
        .map(|(resource, slot)| slot.unwrap_or_else(|| ResourceCost::failed(resource, message)))
        .collect()
}
