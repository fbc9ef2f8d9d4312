//! Fibonacci: the classic spawn-two, sync-both benchmark.

use super::{AppError, args, bytes, child, finish};
use async_trait::async_trait;
use spawnweave_cluster::{JobContext, JobHandler, JobOutcome};

/// Computes `fib(n)`; below `threshold` the job recurses sequentially
#[derive(Debug, Clone, Copy)]
pub struct Fib {
    threshold: u64,
}

impl Fib {
    /// Create with a sequential threshold
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(2),
        }
    }

    /// Sequential reference
    #[must_use]
    pub fn sequential(n: u64) -> u64 {
        let (mut a, mut b) = (0u64, 1u64);
        for _ in 0..n {
            (a, b) = (b, a.wrapping_add(b));
        }
        a
    }

    async fn compute(&self, ctx: &JobContext, n: u64) -> Result<u64, AppError> {
        if n < self.threshold {
            return Ok(Self::sequential(n));
        }
        let left = ctx.spawn(bytes(&(n - 1))?).await;
        let right = ctx.spawn(bytes(&(n - 2))?).await;
        let outcomes = ctx
            .sync(&[left, right])
            .await
            .map_err(|e| AppError::Child(e.to_string()))?;
        let mut sum = 0u64;
        for outcome in &outcomes {
            let value: Option<u64> = child(outcome)?;
            sum = sum.wrapping_add(value.ok_or_else(|| AppError::Child("aborted".into()))?);
        }
        Ok(sum)
    }
}

impl Default for Fib {
    fn default() -> Self {
        Self::new(12)
    }
}

#[async_trait]
impl JobHandler for Fib {
    async fn run(&self, ctx: &JobContext, job_args: Vec<u8>) -> JobOutcome {
        let result = match args::<u64>(&job_args) {
            Ok(n) => self.compute(ctx, n).await,
            Err(err) => Err(err),
        };
        finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spawnweave_core::{decode, encode};
    use spawnweave_sim::{FailureSchedule, SimCluster, SimConfig, SimNodeSpec};
    use std::sync::Arc;

    #[test]
    fn test_sequential_fib() {
        assert_eq!(Fib::sequential(0), 0);
        assert_eq!(Fib::sequential(1), 1);
        assert_eq!(Fib::sequential(10), 55);
        assert_eq!(Fib::sequential(30), 832_040);
    }

    #[test]
    fn test_threshold_floor() {
        assert_eq!(Fib::new(0).threshold, 2);
        assert_eq!(Fib::default().threshold, 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fib_on_cluster() {
        let cluster = SimCluster::new(
            SimConfig::default(),
            &SimNodeSpec::uniform(3, 2),
            Arc::new(Fib::new(8)),
        )
        .await
        .unwrap();
        let run = cluster
            .run(encode(&24u64).unwrap(), &FailureSchedule::new())
            .await
            .unwrap();
        assert_eq!(decode::<u64>(run.outcome.value().unwrap()).unwrap(), 46_368);
    }

    #[tokio::test]
    async fn test_bad_args_fail() {
        let cluster = SimCluster::new(
            SimConfig::default(),
            &SimNodeSpec::uniform(1, 1),
            Arc::new(Fib::default()),
        )
        .await
        .unwrap();
        let run = cluster.run(vec![0xff; 12], &FailureSchedule::new()).await.unwrap();
        assert!(matches!(run.outcome, JobOutcome::Failed(msg) if msg.starts_with("Bad job arguments")));
    }
}
