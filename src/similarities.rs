use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RecError, Result};
use crate::sparse::CsrMatrix;
use crate::utils::{cmp_by_sim_desc, create_thread_pool, InnerId, Neighbor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimType {
    Cosine,
    Pearson,
    Jaccard,
}

impl FromStr for SimType {
    type Err = RecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(SimType::Cosine),
            "pearson" => Ok(SimType::Pearson),
            "jaccard" => Ok(SimType::Jaccard),
            _ => Err(RecError::UnsupportedStrategy(format!(
                "sim_type must be one of (`cosine`, `pearson`, `jaccard`), got `{s}`"
            ))),
        }
    }
}

impl fmt::Display for SimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimType::Cosine => write!(f, "cosine"),
            SimType::Pearson => write!(f, "pearson"),
            SimType::Jaccard => write!(f, "jaccard"),
        }
    }
}

/// How pair statistics are gathered.
///
/// * `Forward` merges every pair of primary rows directly, cheaper when
///   primary rows are few.
/// * `Invert` walks the transpose matrix from each primary row, so only
///   pairs with a common column are visited.
///
/// Both produce identical matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimMode {
    Forward,
    Invert,
}

impl FromStr for SimMode {
    type Err = RecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(SimMode::Forward),
            "invert" => Ok(SimMode::Invert),
            _ => Err(RecError::UnsupportedStrategy(format!(
                "mode must be one of (`forward`, `invert`), got `{s}`"
            ))),
        }
    }
}

impl fmt::Display for SimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimMode::Forward => write!(f, "forward"),
            SimMode::Invert => write!(f, "invert"),
        }
    }
}

/// Statistics over the columns two rows have in common.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PairStats {
    prod: f32,
    count: u32,
    sum_a: f32,
    sum_b: f32,
    sq_a: f32,
    sq_b: f32,
}

impl PairStats {
    #[inline]
    fn update(&mut self, a: f32, b: f32) {
        self.prod += a * b;
        self.count += 1;
        self.sum_a += a;
        self.sum_b += b;
        self.sq_a += a * a;
        self.sq_b += b * b;
    }
}

pub(crate) fn compute_sum_squares(interactions: &CsrMatrix<u32, f32>, num: usize) -> Vec<f32> {
    (0..num)
        .map(|i| {
            let (_, data) = interactions.row(i);
            data.iter().fold(0.0, |ss, d| ss + d * d)
        })
        .collect()
}

pub(crate) fn compute_cosine(prod: f32, sum_squ1: f32, sum_squ2: f32) -> f32 {
    if prod == 0.0 || sum_squ1 == 0.0 || sum_squ2 == 0.0 {
        0.0
    } else {
        let norm = sum_squ1.sqrt() * sum_squ2.sqrt();
        prod / norm
    }
}

/// Correlation over the jointly observed entries of a pair.
pub(crate) fn compute_pearson(stats: &PairStats) -> f32 {
    if stats.count == 0 {
        return 0.0;
    }
    let n = stats.count as f32;
    let num = stats.prod - stats.sum_a * stats.sum_b / n;
    let var_a = stats.sq_a - stats.sum_a * stats.sum_a / n;
    let var_b = stats.sq_b - stats.sum_b * stats.sum_b / n;
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    (num / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

pub(crate) fn compute_jaccard(count: u32, nnz_a: usize, nnz_b: usize) -> f32 {
    let union = nnz_a + nnz_b - count as usize;
    if union == 0 {
        0.0
    } else {
        count as f32 / union as f32
    }
}

fn default_block_size(n_primary: usize, num_threads: usize) -> usize {
    n_primary.div_ceil(num_threads * 4).max(1)
}

fn check_shape(
    matrix: &CsrMatrix<u32, f32>,
    name: &str,
    n_rows: usize,
    n_cols: usize,
) -> Result<()> {
    if matrix.n_rows() != n_rows {
        return Err(RecError::InvalidArgument(format!(
            "{name} matrix has {} rows, expected {n_rows}",
            matrix.n_rows()
        )));
    }
    if let Some(&col) = matrix.indices.iter().find(|&&c| c as usize >= n_cols) {
        return Err(RecError::InvalidArgument(format!(
            "{name} matrix has column {col}, expected fewer than {n_cols}"
        )));
    }
    if !matrix.has_sorted_indices() {
        return Err(RecError::InvalidArgument(format!(
            "{name} matrix must have sorted column indices"
        )));
    }
    Ok(())
}

struct SimContext<'a> {
    primary: &'a CsrMatrix<u32, f32>,
    transpose: &'a CsrMatrix<u32, f32>,
    n_primary: usize,
    sim_type: SimType,
    min_common: u32,
    sum_squares: Vec<f32>,
}

impl SimContext<'_> {
    /// Final similarity of a pair, `None` when it is dropped from the matrix.
    fn finalize(&self, x1: usize, x2: usize, stats: &PairStats) -> Option<f32> {
        if stats.count == 0 || stats.count < self.min_common {
            return None;
        }
        let sim = match self.sim_type {
            SimType::Cosine => {
                compute_cosine(stats.prod, self.sum_squares[x1], self.sum_squares[x2])
            }
            SimType::Pearson => compute_pearson(stats),
            SimType::Jaccard => compute_jaccard(
                stats.count,
                self.primary.row_nnz(x1),
                self.primary.row_nnz(x2),
            ),
        };
        (sim != 0.0 && sim.is_finite()).then_some(sim)
    }

    fn forward_row(&self, x1: usize) -> Vec<(InnerId, f32)> {
        let (indices1, data1) = self.primary.row(x1);
        let mut row = Vec::new();
        if indices1.is_empty() {
            return row;
        }
        for x2 in (0..self.n_primary).filter(|&x2| x2 != x1) {
            let (indices2, data2) = self.primary.row(x2);
            let mut stats = PairStats::default();
            let mut i = 0;
            let mut j = 0;
            while i < indices1.len() && j < indices2.len() {
                match indices1[i].cmp(&indices2[j]) {
                    Ordering::Less => i += 1,
                    Ordering::Greater => j += 1,
                    Ordering::Equal => {
                        stats.update(data1[i], data2[j]);
                        i += 1;
                        j += 1;
                    }
                }
            }
            if let Some(sim) = self.finalize(x1, x2, &stats) {
                row.push((x2 as InnerId, sim));
            }
        }
        row
    }

    /// `acc` is a dense per-peer accumulator reused across the rows of a
    /// block, `touched` lists the peers written for the current row.
    fn invert_row(
        &self,
        x1: usize,
        acc: &mut [PairStats],
        touched: &mut Vec<InnerId>,
    ) -> Vec<(InnerId, f32)> {
        let (indices, data) = self.primary.row(x1);
        for (&y, &a) in indices.iter().zip(data) {
            let (peers, peer_data) = self.transpose.row(y as usize);
            for (&x2, &b) in peers.iter().zip(peer_data) {
                if x2 as usize == x1 {
                    continue;
                }
                let stats = &mut acc[x2 as usize];
                if stats.count == 0 {
                    touched.push(x2);
                }
                stats.update(a, b);
            }
        }

        touched.sort_unstable();
        let row = touched
            .iter()
            .filter_map(|&x2| {
                let stats = std::mem::take(&mut acc[x2 as usize]);
                self.finalize(x1, x2 as usize, &stats).map(|sim| (x2, sim))
            })
            .collect();
        touched.clear();
        row
    }

    fn compute_block(&self, start: usize, end: usize, mode: SimMode) -> Vec<Vec<(InnerId, f32)>> {
        match mode {
            SimMode::Forward => (start..end).map(|x| self.forward_row(x)).collect(),
            SimMode::Invert => {
                let mut acc = vec![PairStats::default(); self.n_primary];
                let mut touched = Vec::new();
                (start..end)
                    .map(|x| self.invert_row(x, &mut acc, &mut touched))
                    .collect()
            }
        }
    }
}

/// Similarity matrix between the rows of `primary`.
///
/// `transpose` is `primary` transposed, with `n_secondary` rows. Pairs sharing
/// fewer than `min_common` columns and pairs of similarity exactly zero are
/// left out, the diagonal is never stored. Rows are split into blocks of
/// `block_size` and computed on `num_threads` workers; every block owns its
/// output rows, so the result doesn't depend on the thread count.
#[allow(clippy::too_many_arguments)]
pub fn compute_similarity(
    primary: &CsrMatrix<u32, f32>,
    transpose: &CsrMatrix<u32, f32>,
    n_primary: usize,
    n_secondary: usize,
    sim_type: SimType,
    mode: SimMode,
    block_size: Option<usize>,
    num_threads: usize,
    min_common: u32,
) -> Result<CsrMatrix<u32, f32>> {
    let start = Instant::now();
    if num_threads == 0 {
        return Err(RecError::InvalidArgument(
            "num_threads must be positive".to_string(),
        ));
    }
    check_shape(primary, "primary", n_primary, n_secondary)?;
    check_shape(transpose, "transpose", n_secondary, n_primary)?;
    let block_size = match block_size {
        Some(0) => {
            return Err(RecError::InvalidArgument(
                "block_size must be positive".to_string(),
            ))
        }
        Some(size) => size,
        None => default_block_size(n_primary, num_threads),
    };

    let ctx = SimContext {
        primary,
        transpose,
        n_primary,
        sim_type,
        min_common,
        sum_squares: compute_sum_squares(primary, n_primary),
    };
    let blocks: Vec<(usize, usize)> = (0..n_primary)
        .step_by(block_size)
        .map(|s| (s, (s + block_size).min(n_primary)))
        .collect();

    let pool = create_thread_pool(num_threads)?;
    let block_rows: Vec<Vec<Vec<(InnerId, f32)>>> = pool.install(|| {
        blocks
            .par_iter()
            .map(|&(s, e)| ctx.compute_block(s, e, mode))
            .collect()
    });
    let sim_matrix = CsrMatrix::from_sorted_rows(block_rows.into_iter().flatten().collect());

    let duration = start.elapsed();
    info!(
        "{mode} {sim_type} sim: {} elements, {} blocks, elapsed: {:.4?}",
        sim_matrix.nnz(),
        blocks.len(),
        duration
    );
    Ok(sim_matrix)
}

/// Positive neighbors of a similarity row, most similar first, at most `k`.
pub(crate) fn top_k_neighbors(indices: &[InnerId], sims: &[f32], k: usize) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = indices
        .iter()
        .zip(sims)
        .filter(|(_, &sim)| sim > 0.0)
        .map(|(&id, &sim)| Neighbor { id, sim })
        .collect();
    let cmp = |a: &Neighbor, b: &Neighbor| cmp_by_sim_desc(a.id, a.sim, b.id, b.sim);
    if k == 0 {
        neighbors.clear();
    } else if neighbors.len() > k {
        // O(n) to select top k
        neighbors.select_nth_unstable_by(k - 1, cmp);
        neighbors.truncate(k);
    }
    neighbors.sort_unstable_by(cmp);
    neighbors
}

/// Top-`k_sim` cache for every row of `sim_matrix`.
pub fn compute_top_k(
    sim_matrix: &CsrMatrix<u32, f32>,
    k_sim: usize,
    num_threads: usize,
) -> Result<Vec<Vec<Neighbor>>> {
    let start = Instant::now();
    let pool = create_thread_pool(num_threads.max(1))?;
    let top_k: Vec<Vec<Neighbor>> = pool.install(|| {
        (0..sim_matrix.n_rows())
            .into_par_iter()
            .map(|i| {
                let (indices, sims) = sim_matrix.row(i);
                top_k_neighbors(indices, sims, k_sim)
            })
            .collect()
    });

    let duration = start.elapsed();
    info!("top k sim elapsed: {duration:.4?}");
    Ok(top_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    // primary (3 rows, 4 cols):
    // [
    //     [1, 2, 0, 1],
    //     [2, 1, 0, 0],
    //     [0, 0, 3, 0],
    // ]
    fn small_matrices() -> Result<(CsrMatrix<u32, f32>, CsrMatrix<u32, f32>)> {
        let primary = CsrMatrix::new(
            vec![0, 1, 3, 0, 1, 2],
            vec![0, 3, 5, 6],
            vec![1.0, 2.0, 1.0, 2.0, 1.0, 3.0],
        )?;
        let transpose = primary.transpose(4)?;
        Ok((primary, transpose))
    }

    // deterministic pattern, 30 rows and 20 columns
    fn larger_matrices() -> Result<(CsrMatrix<u32, f32>, CsrMatrix<u32, f32>)> {
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut data = Vec::new();
        for i in 0..30u32 {
            for j in 0..20u32 {
                if (i * 7 + j * 3) % 5 < 2 {
                    rows.push(i);
                    cols.push(j);
                    data.push(((i + j) % 4 + 1) as f32);
                }
            }
        }
        let primary = CsrMatrix::from_triplets(&rows, &cols, &data, 30)?;
        let transpose = primary.transpose(20)?;
        Ok((primary, transpose))
    }

    fn compute(
        sim_type: SimType,
        mode: SimMode,
        min_common: u32,
    ) -> Result<CsrMatrix<u32, f32>> {
        let (primary, transpose) = small_matrices()?;
        compute_similarity(&primary, &transpose, 3, 4, sim_type, mode, None, 1, min_common)
    }

    #[test]
    fn test_cosine() -> TestResult {
        let sim = compute(SimType::Cosine, SimMode::Invert, 1)?;
        let expected = 4.0 / (6.0f32.sqrt() * 5.0f32.sqrt());
        assert!((sim.get(0, 1).unwrap() - expected).abs() < 1e-6);
        assert!((sim.get(1, 0).unwrap() - expected).abs() < 1e-6);
        assert_eq!(sim.get(0, 2), None);
        assert_eq!(sim.get(0, 0), None);
        assert_eq!(sim.row_nnz(2), 0);
        assert_eq!(sim.nnz(), 2);
        Ok(())
    }

    #[test]
    fn test_pearson_and_jaccard() -> TestResult {
        // joint entries of rows 0 and 1: [1, 2] and [2, 1]
        let sim = compute(SimType::Pearson, SimMode::Invert, 1)?;
        assert!((sim.get(0, 1).unwrap() + 1.0).abs() < 1e-6);

        // 2 common columns out of 3
        let sim = compute(SimType::Jaccard, SimMode::Forward, 1)?;
        assert!((sim.get(1, 0).unwrap() - 2.0 / 3.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_min_common() -> TestResult {
        let sim = compute(SimType::Cosine, SimMode::Forward, 3)?;
        assert_eq!(sim.nnz(), 0);
        assert_eq!(sim.n_rows(), 3);
        Ok(())
    }

    #[test]
    fn test_rows_sorted_for_all_metrics() -> TestResult {
        let (primary, transpose) = larger_matrices()?;
        for sim_type in [SimType::Cosine, SimType::Pearson, SimType::Jaccard] {
            for mode in [SimMode::Forward, SimMode::Invert] {
                let sim = compute_similarity(
                    &primary, &transpose, 30, 20, sim_type, mode, None, 2, 1,
                )?;
                assert_eq!(sim.n_rows(), 30);
                assert!(sim.has_sorted_indices());
            }
        }
        Ok(())
    }

    #[test]
    fn test_output_independent_of_threads_and_mode() -> TestResult {
        let (primary, transpose) = larger_matrices()?;
        for sim_type in [SimType::Cosine, SimType::Pearson, SimType::Jaccard] {
            let base = compute_similarity(
                &primary, &transpose, 30, 20, sim_type, SimMode::Invert, None, 1, 1,
            )?;
            for (mode, block_size, num_threads) in [
                (SimMode::Invert, Some(3), 4),
                (SimMode::Invert, Some(100), 3),
                (SimMode::Forward, Some(7), 2),
                (SimMode::Forward, None, 1),
            ] {
                let sim = compute_similarity(
                    &primary, &transpose, 30, 20, sim_type, mode, block_size, num_threads, 1,
                )?;
                assert_eq!(sim, base);
            }
        }
        Ok(())
    }

    #[test]
    fn test_invalid_arguments() -> TestResult {
        let (primary, transpose) = small_matrices()?;
        let res = compute_similarity(
            &primary, &transpose, 3, 4, SimType::Cosine, SimMode::Invert, Some(0), 1, 1,
        );
        assert!(matches!(res, Err(RecError::InvalidArgument(_))));
        let res = compute_similarity(
            &primary, &transpose, 3, 2, SimType::Cosine, SimMode::Invert, None, 1, 1,
        );
        assert!(res.is_err());
        assert!(matches!(
            "euclidean".parse::<SimType>(),
            Err(RecError::UnsupportedStrategy(_))
        ));
        assert_eq!("forward".parse::<SimMode>()?, SimMode::Forward);
        Ok(())
    }

    #[test]
    fn test_top_k() -> TestResult {
        let (primary, transpose) = larger_matrices()?;
        let sim = compute_similarity(
            &primary, &transpose, 30, 20, SimType::Pearson, SimMode::Invert, None, 1, 1,
        )?;
        let top_k = compute_top_k(&sim, 5, 2)?;
        assert_eq!(top_k.len(), 30);
        for neighbors in &top_k {
            assert!(neighbors.len() <= 5);
            assert!(neighbors.iter().all(|n| n.sim > 0.0));
            assert!(neighbors.windows(2).all(|w| w[0].sim >= w[1].sim));
        }
        // rows are independent, the pool size only changes the schedule
        for num_threads in [1, 4] {
            assert_eq!(compute_top_k(&sim, 5, num_threads)?, top_k);
        }
        Ok(())
    }

    #[test]
    fn test_top_k_ties() {
        let neighbors = top_k_neighbors(&[0, 2, 5, 7], &[0.5, 0.9, 0.5, -0.3], 2);
        let ids: Vec<u32> = neighbors.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 0]);
        assert!(top_k_neighbors(&[1], &[0.4], 0).is_empty());
    }
}
