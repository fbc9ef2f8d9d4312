//! N-Queens first-solution search.
//!
//! Every safe placement in the next row becomes a child job. The first child
//! to report a solution wins; its siblings are aborted speculatively, which
//! kills their sub-trees wherever they were stolen to.

use super::{AppError, args, bytes, child, finish};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spawnweave_cluster::{JobContext, JobHandler, JobOutcome};
use spawnweave_core::SearchOutcome;
use tracing::debug;

/// Partial board: `cols[row]` is the column of the queen in `row`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Board size
    pub n: u8,
    /// Queens placed so far, one per row from the top
    pub cols: Vec<u8>,
}

impl Board {
    /// Empty board
    #[must_use]
    pub fn new(n: u8) -> Self {
        Self {
            n,
            cols: Vec::with_capacity(n as usize),
        }
    }

    /// True once every row has a queen
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.cols.len() == self.n as usize
    }

    /// Rows still empty
    #[must_use]
    pub fn remaining(&self) -> usize {
        (self.n as usize).saturating_sub(self.cols.len())
    }

    /// True if a queen in the next row at `col` is not attacked
    #[must_use]
    pub fn is_safe(&self, col: u8) -> bool {
        let row = self.cols.len();
        self.cols.iter().enumerate().all(|(r, &c)| {
            c != col && (row - r) != usize::from(c.abs_diff(col))
        })
    }

    /// Columns where the next queen can go
    pub fn safe_columns(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.n).filter(|&col| self.is_safe(col))
    }

    /// Board with one more queen
    #[must_use]
    pub fn place(&self, col: u8) -> Self {
        let mut next = self.clone();
        next.cols.push(col);
        next
    }

    /// True if the board is complete and no two queens attack each other
    #[must_use]
    pub fn is_valid_solution(&self) -> bool {
        self.is_complete()
            && (0..self.cols.len()).all(|row| {
                let prefix = Board {
                    n: self.n,
                    cols: self.cols[..row].to_vec(),
                };
                prefix.is_safe(self.cols[row])
            })
    }

    /// Depth-first search for the first solution below this board
    #[must_use]
    pub fn solve(&self) -> Option<Board> {
        if self.is_complete() {
            return Some(self.clone());
        }
        self.safe_columns().find_map(|col| self.place(col).solve())
    }
}

/// First-solution N-Queens; boards with at most `sequential_rows` empty rows
/// are solved inside one job
#[derive(Debug, Clone, Copy)]
pub struct Queens {
    sequential_rows: usize,
}

impl Queens {
    /// Create with a sequential cutoff
    #[must_use]
    pub fn new(sequential_rows: usize) -> Self {
        Self { sequential_rows }
    }

    async fn search(&self, ctx: &JobContext, board: Board) -> Result<SearchOutcome<Board>, AppError> {
        if board.remaining() <= self.sequential_rows {
            return Ok(board
                .solve()
                .map_or(SearchOutcome::Continue, SearchOutcome::SolutionFound));
        }

        let mut pending = Vec::new();
        for col in board.safe_columns() {
            pending.push(ctx.spawn(bytes(&board.place(col))?).await);
        }

        while !pending.is_empty() {
            let (_, outcome) = ctx
                .sync_next(&mut pending)
                .await
                .map_err(|e| AppError::Child(e.to_string()))?;
            let found: SearchOutcome<Board> = child(&outcome)?.unwrap_or_default();
            if found.is_solution() {
                for sibling in &pending {
                    ctx.abort(sibling).await;
                }
                debug!(target: "spawnweave::abort", stamp = %ctx.stamp(), siblings = pending.len(), "solution found, siblings aborted");
                return Ok(found);
            }
            if ctx.is_aborted().await {
                return Ok(SearchOutcome::CutoffExceeded);
            }
        }
        Ok(SearchOutcome::Continue)
    }
}

impl Default for Queens {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl JobHandler for Queens {
    async fn run(&self, ctx: &JobContext, job_args: Vec<u8>) -> JobOutcome {
        let result = match args::<Board>(&job_args) {
            Ok(board) => self.search(ctx, board).await,
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
    fn test_board_safety() {
        let board = Board::new(4).place(1);
        assert!(!board.is_safe(0));
        assert!(!board.is_safe(1));
        assert!(!board.is_safe(2));
        assert!(board.is_safe(3));
        assert_eq!(board.safe_columns().collect::<Vec<_>>(), vec![3]);
        assert_eq!(board.remaining(), 3);
    }

    #[test]
    fn test_sequential_solve() {
        let solution = Board::new(8).solve().unwrap();
        assert!(solution.is_valid_solution());
        assert!(Board::new(3).solve().is_none());
        assert!(!Board::new(4).place(0).place(1).is_valid_solution());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_first_solution_on_cluster() {
        let cluster = SimCluster::new(
            SimConfig::default(),
            &SimNodeSpec::uniform(4, 2),
            Arc::new(Queens::new(4)),
        )
        .await
        .unwrap();
        let run = cluster
            .run(encode(&Board::new(9)).unwrap(), &FailureSchedule::new())
            .await
            .unwrap();
        let outcome: SearchOutcome<Board> = decode(run.outcome.value().unwrap()).unwrap();
        let board = outcome.solution().unwrap();
        assert_eq!(board.n, 9);
        assert!(board.is_valid_solution());
    }

    #[tokio::test]
    async fn test_no_solution() {
        let cluster = SimCluster::new(
            SimConfig::default(),
            &SimNodeSpec::uniform(2, 1),
            Arc::new(Queens::new(0)),
        )
        .await
        .unwrap();
        let run = cluster
            .run(encode(&Board::new(3)).unwrap(), &FailureSchedule::new())
            .await
            .unwrap();
        let outcome: SearchOutcome<Board> = decode(run.outcome.value().unwrap()).unwrap();
        assert_eq!(outcome, SearchOutcome::Continue);
    }
}
