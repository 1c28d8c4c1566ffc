use std::cmp::Ordering;

use fxhash::FxHashMap;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;

use crate::utils::{cmp_by_sim_desc, InnerId, Task};

/// Neighbor of the anchor entity that also interacted with the counterpart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CommonNeighbor {
    pub id: InnerId,
    pub sim: f32,
    pub label: f32,
}

/// Intersects a similarity row with an interaction row, both sorted by id.
/// Only positive similarities are kept.
pub(crate) fn common_neighbors(
    sim_row: (&[InnerId], &[f32]),
    interaction_row: (&[InnerId], &[f32]),
) -> Vec<CommonNeighbor> {
    let (sim_ids, sims) = sim_row;
    let (inter_ids, labels) = interaction_row;
    let mut common = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < sim_ids.len() && j < inter_ids.len() {
        match sim_ids[i].cmp(&inter_ids[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                if sims[i] > 0.0 {
                    common.push(CommonNeighbor {
                        id: sim_ids[i],
                        sim: sims[i],
                        label: labels[j],
                    });
                }
                i += 1;
                j += 1;
            }
        }
    }
    common
}

/// Predict a score from the common neighbors of a user-item pair.
///
/// The `k` most similar neighbors are used:
/// * `rating` task: similarity-weighted average of labels, clipped to `bounds`
/// * `ranking` task: mean similarity
///
/// Returns `None` if there is no neighbor.
pub(crate) fn predict_single(
    mut common: Vec<CommonNeighbor>,
    k: usize,
    task: Task,
    bounds: (f32, f32),
) -> Option<f32> {
    common.sort_unstable_by(|a, b| cmp_by_sim_desc(a.id, a.sim, b.id, b.sim));
    common.truncate(k);
    if common.is_empty() {
        return None;
    }

    let sum_sims: f32 = common.iter().map(|n| n.sim).sum();
    match task {
        Task::Rating => {
            let weighted_sum: f32 = common.iter().map(|n| n.sim * n.label).sum();
            let (lower, upper) = bounds;
            Some((weighted_sum / sum_sims).clamp(lower, upper))
        }
        Task::Ranking => Some(sum_sims / common.len() as f32),
    }
}

/// Select top-n recommended items from candidate scores.
///
/// - **Random mode** (`random_rec=true`): sample `n_rec` candidates uniformly
///   with `rng`, single pass via `IteratorRandom::choose_multiple`.
/// - **Score mode**: highest scores first, `select_nth_unstable_by` to find the
///   top `n_rec` in O(n), then sorts only those. Ties go to the smaller id.
pub(crate) fn get_rec_items(
    item_scores: FxHashMap<InnerId, f32>,
    n_rec: usize,
    random_rec: bool,
    rng: &mut StdRng,
) -> Vec<InnerId> {
    if random_rec && item_scores.len() > n_rec {
        // hash map order is arbitrary, sort so the seed alone decides the sample
        let mut candidates: Vec<InnerId> = item_scores.into_keys().collect();
        candidates.sort_unstable();
        candidates.into_iter().choose_multiple(rng, n_rec)
    } else {
        let mut items: Vec<(InnerId, f32)> = item_scores.into_iter().collect();
        let cmp = |a: &(InnerId, f32), b: &(InnerId, f32)| cmp_by_sim_desc(a.0, a.1, b.0, b.1);
        if n_rec == 0 {
            return Vec::new();
        }
        if items.len() > n_rec {
            items.select_nth_unstable_by(n_rec - 1, cmp);
            items.truncate(n_rec);
        }
        items.sort_unstable_by(cmp);
        items.into_iter().map(|(i, _)| i).collect()
    }
}

pub(crate) fn seeded_rng(seed: u64, user: InnerId) -> StdRng {
    StdRng::seed_from_u64(seed ^ (u64::from(user) << 32))
}
