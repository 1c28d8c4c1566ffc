use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};

/// Inner ids are dense and zero-based, the value `n` stands for "unknown".
pub type InnerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: InnerId,
    pub sim: f32,
}

/// Descending similarity, ascending id on ties.
#[inline]
pub(crate) fn cmp_by_sim_desc(a_id: InnerId, a_sim: f32, b_id: InnerId, b_sim: f32) -> Ordering {
    b_sim.total_cmp(&a_sim).then_with(|| a_id.cmp(&b_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Rating,
    Ranking,
}

impl FromStr for Task {
    type Err = RecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rating" => Ok(Task::Rating),
            "ranking" => Ok(Task::Ranking),
            _ => Err(RecError::UnsupportedStrategy(format!(
                "task must be one of (`rating`, `ranking`), got `{s}`"
            ))),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Rating => write!(f, "rating"),
            Task::Ranking => write!(f, "ranking"),
        }
    }
}

/// Counter used to cap repeated diagnostics on sparse datasets.
#[derive(Debug, Default)]
pub(crate) struct LogCounter(AtomicUsize);

impl LogCounter {
    /// Bumps the counter and returns the new count.
    pub(crate) fn tick(&self) -> usize {
        self.0.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    /// Bumps the counter, true while the new count is below `limit`.
    pub(crate) fn tick_below(&self, limit: usize) -> bool {
        self.tick() < limit
    }
}

pub(crate) fn create_thread_pool(num_threads: usize) -> Result<ThreadPool> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| RecError::InvalidArgument(format!("Failed to create thread pool: {}", e)))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;

    #[test]
    fn test_create_thread_pool() -> Result<()> {
        let pool = create_thread_pool(3)?;
        assert_eq!(pool.current_num_threads(), 3);
        let blocks: Vec<usize> = pool.install(|| (0..8).into_par_iter().map(|b| b * 2).collect());
        assert_eq!(blocks, (0..8).map(|b| b * 2).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_parse_task() {
        assert_eq!("rating".parse::<Task>().unwrap(), Task::Rating);
        assert_eq!("ranking".parse::<Task>().unwrap(), Task::Ranking);
        assert!(matches!(
            "regression".parse::<Task>(),
            Err(RecError::UnsupportedStrategy(_))
        ));
    }

    #[test]
    fn test_sim_ordering() {
        let mut nbs = vec![
            Neighbor { id: 3, sim: 0.5 },
            Neighbor { id: 1, sim: 0.9 },
            Neighbor { id: 0, sim: 0.5 },
        ];
        nbs.sort_by(|a, b| cmp_by_sim_desc(a.id, a.sim, b.id, b.sim));
        let ids: Vec<u32> = nbs.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 0, 3]);
    }

    #[test]
    fn test_log_counter() {
        let counter = LogCounter::default();
        assert_eq!(counter.tick(), 1);
        assert_eq!(counter.tick(), 2);
        assert_eq!(counter.tick(), 3);
    }

    #[test]
    fn test_log_counter_limit() {
        let counter = LogCounter::default();
        let logged: Vec<bool> = (0..9).map(|_| counter.tick_below(7)).collect();
        assert_eq!(logged.iter().filter(|&&b| b).count(), 6);
        assert!(logged[..6].iter().all(|&b| b));
        assert!(logged[6..].iter().all(|&b| !b));
        assert_eq!(counter.tick(), 10);
    }
}
