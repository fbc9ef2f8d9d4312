//! 0/1 knapsack by branch-and-bound.
//!
//! Each job decides whether to take one item and spawns both branches. The best
//! value found anywhere is broadcast as the `max-bound` tuple; a branch whose
//! fractional upper bound cannot beat it is pruned.

use super::{AppError, args, bytes, child, finish};
use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use spawnweave_cluster::{JobContext, JobHandler, JobOutcome, MAX_BOUND, TupleValue};
use spawnweave_core::SearchOutcome;
use std::cmp::Ordering;

/// One item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Weight
    pub weight: u64,
    /// Value
    pub value: u64,
}

/// Decision state: items before `index` are decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Next item to decide
    pub index: usize,
    /// Weight taken so far
    pub weight: u64,
    /// Value taken so far
    pub value: u64,
}

impl Branch {
    /// Nothing decided yet
    #[must_use]
    pub fn root() -> Self {
        Self {
            index: 0,
            weight: 0,
            value: 0,
        }
    }
}

/// A knapsack instance and its search handler
#[derive(Debug, Clone)]
pub struct Knapsack {
    /// Items sorted by value density, best first
    items: Vec<Item>,
    capacity: u64,
    sequential_items: usize,
}

impl Knapsack {
    /// Create an instance; the last `sequential_items` decisions run inside one job
    #[must_use]
    pub fn new(mut items: Vec<Item>, capacity: u64, sequential_items: usize) -> Self {
        items.sort_by(|a, b| density_order(b, a));
        Self {
            items,
            capacity,
            sequential_items,
        }
    }

    /// Seeded random instance
    #[must_use]
    pub fn random(seed: u64, count: usize, capacity: u64, sequential_items: usize) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let items = (0..count)
            .map(|_| Item {
                weight: rng.gen_range(1..=capacity.max(2) / 2),
                value: rng.gen_range(1..=100),
            })
            .collect();
        Self::new(items, capacity, sequential_items)
    }

    /// Exact optimum by dynamic programming over capacity
    #[must_use]
    pub fn optimum(&self) -> u64 {
        let total_weight = self
            .items
            .iter()
            .fold(0u64, |sum, item| sum.saturating_add(item.weight));
        if self.capacity >= total_weight {
            return self.items.iter().map(|item| item.value).sum();
        }
        // Too wide for a table; fall back to the exact search.
        let Some(slots) = usize::try_from(self.capacity)
            .ok()
            .and_then(|capacity| capacity.checked_add(1))
        else {
            return self.solve(Branch::root(), 0).unwrap_or(0);
        };
        let capacity = slots - 1;
        let mut best = vec![0u64; slots];
        for item in &self.items {
            let Ok(weight) = usize::try_from(item.weight) else {
                continue;
            };
            for cap in (weight..=capacity).rev() {
                best[cap] = best[cap].max(best[cap - weight] + item.value);
            }
        }
        best[capacity]
    }

    /// Fractional-relaxation upper bound for `branch`
    #[must_use]
    pub fn upper_bound(&self, branch: &Branch) -> u64 {
        let mut room = self.capacity.saturating_sub(branch.weight);
        let mut bound = branch.value;
        for item in &self.items[branch.index.min(self.items.len())..] {
            if item.weight <= room {
                room -= item.weight;
                bound += item.value;
            } else {
                bound += item.value * room / item.weight;
                break;
            }
        }
        bound
    }

    fn children(&self, branch: &Branch) -> Vec<Branch> {
        let Some(item) = self.items.get(branch.index) else {
            return Vec::new();
        };
        let skip = Branch {
            index: branch.index + 1,
            ..*branch
        };
        if branch.weight + item.weight <= self.capacity {
            let take = Branch {
                index: branch.index + 1,
                weight: branch.weight + item.weight,
                value: branch.value + item.value,
            };
            vec![take, skip]
        } else {
            vec![skip]
        }
    }

    /// Sequential branch-and-bound below `branch`. Returns the best value
    /// that beats `incumbent`, if any.
    fn solve(&self, branch: Branch, incumbent: u64) -> Option<u64> {
        let mut best = incumbent;
        let mut found = None;
        let mut stack = vec![branch];
        while let Some(current) = stack.pop() {
            if current.value > best {
                best = current.value;
                found = Some(best);
            }
            if self.upper_bound(&current) > best {
                stack.extend(self.children(&current).into_iter().rev());
            }
        }
        found
    }

    async fn global_bound(&self, ctx: &JobContext) -> u64 {
        ctx.tuple(MAX_BOUND)
            .await
            .and_then(|v| v.as_int())
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0)
    }

    async fn publish(&self, ctx: &JobContext, value: u64) {
        if let Ok(value) = i64::try_from(value) {
            ctx.add_active_tuple(MAX_BOUND, MAX_BOUND, TupleValue::Int(value))
                .await;
        }
    }

    async fn search(&self, ctx: &JobContext, branch: Branch) -> Result<SearchOutcome<u64>, AppError> {
        let incumbent = self.global_bound(ctx).await;
        if self.upper_bound(&branch) <= incumbent {
            return Ok(SearchOutcome::CutoffExceeded);
        }

        let remaining = self.items.len().saturating_sub(branch.index);
        if remaining <= self.sequential_items {
            return Ok(match self.solve(branch, incumbent) {
                Some(value) => {
                    self.publish(ctx, value).await;
                    SearchOutcome::SolutionFound(value)
                }
                None => SearchOutcome::CutoffExceeded,
            });
        }

        if branch.value > incumbent {
            self.publish(ctx, branch.value).await;
        }
        let mut stamps = Vec::new();
        for next in self.children(&branch) {
            stamps.push(ctx.spawn(bytes(&next)?).await);
        }
        let outcomes = ctx
            .sync(&stamps)
            .await
            .map_err(|e| AppError::Child(e.to_string()))?;

        let mut result = if branch.value > incumbent {
            SearchOutcome::SolutionFound(branch.value)
        } else {
            SearchOutcome::CutoffExceeded
        };
        for outcome in &outcomes {
            let found: SearchOutcome<u64> = child(outcome)?.unwrap_or(SearchOutcome::CutoffExceeded);
            result = best_of(result, found);
        }
        Ok(result)
    }
}

fn density_order(a: &Item, b: &Item) -> Ordering {
    (u128::from(a.value) * u128::from(b.weight)).cmp(&(u128::from(b.value) * u128::from(a.weight)))
}

/// Keep the larger solution; a cutoff loses to any solution
fn best_of(a: SearchOutcome<u64>, b: SearchOutcome<u64>) -> SearchOutcome<u64> {
    match (a, b) {
        (SearchOutcome::SolutionFound(x), SearchOutcome::SolutionFound(y)) => {
            SearchOutcome::SolutionFound(x.max(y))
        }
        (a, b) => a.or(b),
    }
}

#[async_trait]
impl JobHandler for Knapsack {
    async fn run(&self, ctx: &JobContext, job_args: Vec<u8>) -> JobOutcome {
        let result = match args::<Branch>(&job_args) {
            Ok(branch) => self.search(ctx, branch).await,
            Err(err) => Err(err),
        };
        finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spawnweave_core::{decode, encode};
    use spawnweave_sim::{FailureSchedule, SimCluster, SimConfig, SimNodeSpec};
    use std::sync::Arc;

    fn small() -> Knapsack {
        Knapsack::new(
            vec![
                Item { weight: 10, value: 60 },
                Item { weight: 20, value: 100 },
                Item { weight: 30, value: 120 },
            ],
            50,
            0,
        )
    }

    #[test]
    fn test_optimum_by_dp() {
        assert_eq!(small().optimum(), 220);
    }

    #[test]
    fn test_optimum_with_unbounded_capacity() {
        let knapsack = Knapsack::new(small().items, u64::MAX, 0);
        assert_eq!(knapsack.optimum(), 280);
        let tight = Knapsack::new(small().items, 59, 0);
        assert_eq!(tight.optimum(), 220);
    }

    #[test]
    fn test_upper_bound_is_fractional_relaxation() {
        let knapsack = small();
        assert_eq!(knapsack.upper_bound(&Branch::root()), 60 + 100 + 80);
        let full = Branch {
            index: 3,
            weight: 50,
            value: 220,
        };
        assert_eq!(knapsack.upper_bound(&full), 220);
    }

    #[test]
    fn test_sequential_solve_matches_dp() {
        let knapsack = Knapsack::random(11, 18, 60, 0);
        assert_eq!(knapsack.solve(Branch::root(), 0), Some(knapsack.optimum()));
        assert_eq!(knapsack.solve(Branch::root(), knapsack.optimum()), None);
    }

    proptest! {
        #[test]
        fn prop_upper_bound_never_below_optimum(seed in any::<u64>(), count in 1usize..12) {
            let knapsack = Knapsack::random(seed, count, 40, 0);
            prop_assert!(knapsack.upper_bound(&Branch::root()) >= knapsack.optimum());
            prop_assert_eq!(knapsack.solve(Branch::root(), 0).unwrap_or(0), knapsack.optimum());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_branch_and_bound_on_cluster() {
        let knapsack = Knapsack::random(5, 24, 80, 6);
        let expected = knapsack.optimum();
        let cluster = SimCluster::new(
            SimConfig::default(),
            &SimNodeSpec::uniform(4, 2),
            Arc::new(knapsack),
        )
        .await
        .unwrap();
        let run = cluster
            .run(encode(&Branch::root()).unwrap(), &FailureSchedule::new())
            .await
            .unwrap();
        let outcome: SearchOutcome<u64> = decode(run.outcome.value().unwrap()).unwrap();
        assert_eq!(outcome, SearchOutcome::SolutionFound(expected));
        assert_eq!(
            cluster.master().tuple(MAX_BOUND).await,
            Some(TupleValue::Int(i64::try_from(expected).unwrap()))
        );
    }
}
