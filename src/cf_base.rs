//! Shared machinery of the neighborhood collaborative-filtering models.
//!
//! [`CfBase`] owns the [`DataInfo`] of the training data, the user/item
//! interaction matrices and a [`SimilarityEngine`] over either users
//! ([`CfType::UserCf`]) or items ([`CfType::ItemCf`]). The concrete models
//! only decide how candidate items are scored, see [`CfModel::recommend_one`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consumed::get_consumed_set;
use crate::data_info::DataInfo;
use crate::error::{RecError, Result};
use crate::id_index::ExternalId;
use crate::inference::{common_neighbors, get_rec_items, predict_single, seeded_rng};
use crate::serialization::{check_exists, ensure_dir, load_json, load_model, save_json, save_model};
use crate::similarities::{compute_similarity, compute_top_k, top_k_neighbors, SimMode, SimType};
use crate::sparse::CsrMatrix;
use crate::utils::{InnerId, LogCounter, Neighbor, Task};

const PARAMS_SUFFIX: &str = "hyper_parameters";
const SIM_MATRIX_SUFFIX: &str = "sim_matrix";
const USER_INTER_SUFFIX: &str = "user_inter";
const ITEM_INTER_SUFFIX: &str = "item_inter";

// warnings are printed while the shared counter stays below these
const NO_NEIGHBOR_LOG_LIMIT: usize = 7;
const NO_CANDIDATE_LOG_LIMIT: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CfType {
    UserCf,
    ItemCf,
}

impl CfType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CfType::UserCf => "user_cf",
            CfType::ItemCf => "item_cf",
        }
    }
}

/// Strategy for users or items absent from the trained index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdStart {
    Popular,
}

impl FromStr for ColdStart {
    type Err = RecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "popular" => Ok(ColdStart::Popular),
            _ => Err(RecError::UnsupportedStrategy(format!(
                "cf models only support `popular` cold start strategy, got `{s}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfConfig {
    pub sim_type: SimType,
    pub k_sim: usize,
    pub store_top_k: bool,
    /// Rows per parallel block, derived from the row count when `None`.
    pub block_size: Option<usize>,
    pub num_threads: usize,
    pub min_common: u32,
    pub mode: SimMode,
    /// Seeds the sampling of `random_rec`.
    pub seed: u64,
    /// Clipping range of rating predictions, the label range when `None`.
    pub lower_upper_bound: Option<(f32, f32)>,
}

impl Default for CfConfig {
    fn default() -> Self {
        Self {
            sim_type: SimType::Cosine,
            k_sim: 20,
            store_top_k: true,
            block_size: None,
            num_threads: 1,
            min_common: 1,
            mode: SimMode::Invert,
            seed: 42,
            lower_upper_bound: None,
        }
    }
}

impl CfConfig {
    pub fn with_sim_type(mut self, sim_type: SimType) -> Self {
        self.sim_type = sim_type;
        self
    }

    pub fn with_k_sim(mut self, k_sim: usize) -> Self {
        self.k_sim = k_sim;
        self
    }

    pub fn with_store_top_k(mut self, store_top_k: bool) -> Self {
        self.store_top_k = store_top_k;
        self
    }

    pub fn with_block_size(mut self, block_size: Option<usize>) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_min_common(mut self, min_common: u32) -> Self {
        self.min_common = min_common;
        self
    }

    pub fn with_mode(mut self, mode: SimMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_lower_upper_bound(mut self, bound: Option<(f32, f32)>) -> Self {
        self.lower_upper_bound = bound;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(RecError::InvalidArgument(
                "num_threads must be positive".to_string(),
            ));
        }
        if self.block_size == Some(0) {
            return Err(RecError::InvalidArgument(
                "block_size must be positive".to_string(),
            ));
        }
        if let Some((lower, upper)) = self.lower_upper_bound {
            if lower > upper {
                return Err(RecError::InvalidArgument(format!(
                    "lower bound {lower} is greater than upper bound {upper}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HyperParameters {
    task: Task,
    cf_type: CfType,
    config: CfConfig,
}

#[derive(Debug, Clone, Default)]
pub enum SimilarityState {
    #[default]
    Uninitialized,
    Computed(CsrMatrix<u32, f32>),
    TopKCached {
        sim_matrix: CsrMatrix<u32, f32>,
        top_k: Vec<Vec<Neighbor>>,
    },
}

/// Similarity matrix over the rows of an interaction matrix, with an
/// optional top-K neighbor cache.
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    config: CfConfig,
    state: SimilarityState,
}

impl SimilarityEngine {
    pub fn new(config: CfConfig) -> Self {
        Self {
            config,
            state: SimilarityState::Uninitialized,
        }
    }

    /// Replaces any previous matrix and cache.
    pub fn compute(
        &mut self,
        primary: &CsrMatrix<u32, f32>,
        transpose: &CsrMatrix<u32, f32>,
        n_primary: usize,
        n_secondary: usize,
    ) -> Result<()> {
        let sim_matrix = compute_similarity(
            primary,
            transpose,
            n_primary,
            n_secondary,
            self.config.sim_type,
            self.config.mode,
            self.config.block_size,
            self.config.num_threads,
            self.config.min_common,
        )?;
        self.state = SimilarityState::Computed(sim_matrix);
        Ok(())
    }

    pub fn compute_top_k(&mut self) -> Result<()> {
        let sim_matrix = match std::mem::take(&mut self.state) {
            SimilarityState::Uninitialized => {
                return Err(RecError::UnsupportedOperation(
                    "similarity matrix must be computed before top k".to_string(),
                ))
            }
            SimilarityState::Computed(sim_matrix)
            | SimilarityState::TopKCached { sim_matrix, .. } => sim_matrix,
        };
        match compute_top_k(&sim_matrix, self.config.k_sim, self.config.num_threads) {
            Ok(top_k) => {
                self.state = SimilarityState::TopKCached { sim_matrix, top_k };
                Ok(())
            }
            Err(e) => {
                self.state = SimilarityState::Computed(sim_matrix);
                Err(e)
            }
        }
    }

    /// Installs a previously computed matrix.
    pub fn restore(&mut self, sim_matrix: CsrMatrix<u32, f32>) {
        self.state = SimilarityState::Computed(sim_matrix);
    }

    pub fn state(&self) -> &SimilarityState {
        &self.state
    }

    pub fn sim_matrix(&self) -> Option<&CsrMatrix<u32, f32>> {
        match &self.state {
            SimilarityState::Uninitialized => None,
            SimilarityState::Computed(sim_matrix)
            | SimilarityState::TopKCached { sim_matrix, .. } => Some(sim_matrix),
        }
    }

    pub fn top_k(&self) -> Option<&[Vec<Neighbor>]> {
        match &self.state {
            SimilarityState::TopKCached { top_k, .. } => Some(top_k),
            _ => None,
        }
    }

    /// The `k_sim` most similar peers of `x`, from the cache when present.
    pub fn neighbors(&self, x: InnerId) -> Cow<'_, [Neighbor]> {
        match &self.state {
            SimilarityState::TopKCached { top_k, .. } => top_k
                .get(x as usize)
                .map_or(Cow::Borrowed(&[][..]), |nbs| Cow::Borrowed(nbs.as_slice())),
            SimilarityState::Computed(sim_matrix) => {
                let (indices, sims) = sim_matrix.row(x as usize);
                Cow::Owned(top_k_neighbors(indices, sims, self.config.k_sim))
            }
            SimilarityState::Uninitialized => Cow::Borrowed(&[][..]),
        }
    }

    pub fn num_sim_elements(&self) -> usize {
        self.sim_matrix().map_or(0, CsrMatrix::nnz)
    }
}

pub struct CfBase {
    task: Task,
    cf_type: CfType,
    config: CfConfig,
    data_info: DataInfo,
    engine: SimilarityEngine,
    // user as row and item as column
    user_interaction: CsrMatrix<u32, f32>,
    // item as row and user as column
    item_interaction: CsrMatrix<u32, f32>,
    default_pred: f32,
    lower_bound: f32,
    upper_bound: f32,
    print_count: LogCounter,
}

impl CfBase {
    pub fn new(task: Task, cf_type: CfType, data_info: DataInfo, config: CfConfig) -> Result<Self> {
        config.validate()?;
        let (lower_bound, upper_bound) = config
            .lower_upper_bound
            .unwrap_or_else(|| data_info.min_max_rating());
        let default_pred = match task {
            Task::Rating => data_info.global_mean(),
            Task::Ranking => 0.0,
        };
        if let Some(caution) = sim_type_caution(task, config.sim_type) {
            warn!("{caution}");
        }
        Ok(Self {
            task,
            cf_type,
            engine: SimilarityEngine::new(config.clone()),
            config,
            user_interaction: CsrMatrix::empty(data_info.n_users()),
            item_interaction: CsrMatrix::empty(data_info.n_items()),
            data_info,
            default_pred,
            lower_bound,
            upper_bound,
            print_count: LogCounter::default(),
        })
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn cf_type(&self) -> CfType {
        self.cf_type
    }

    pub fn config(&self) -> &CfConfig {
        &self.config
    }

    pub fn data_info(&self) -> &DataInfo {
        &self.data_info
    }

    pub fn engine(&self) -> &SimilarityEngine {
        &self.engine
    }

    pub fn user_interaction(&self) -> &CsrMatrix<u32, f32> {
        &self.user_interaction
    }

    pub fn item_interaction(&self) -> &CsrMatrix<u32, f32> {
        &self.item_interaction
    }

    pub fn default_pred(&self) -> f32 {
        self.default_pred
    }

    fn n_primary(&self) -> usize {
        match self.cf_type {
            CfType::UserCf => self.data_info.n_users(),
            CfType::ItemCf => self.data_info.n_items(),
        }
    }

    /// Builds the interaction matrices from the training data, then the
    /// similarity matrix and, if configured, the top-K cache.
    pub fn fit(&mut self) -> Result<()> {
        let n_users = self.data_info.n_users();
        let n_items = self.data_info.n_items();
        self.user_interaction = self.data_info.sparse_interaction()?;
        self.item_interaction = self.user_interaction.transpose(n_items)?;

        match self.cf_type {
            CfType::UserCf => self.engine.compute(
                &self.user_interaction,
                &self.item_interaction,
                n_users,
                n_items,
            )?,
            CfType::ItemCf => self.engine.compute(
                &self.item_interaction,
                &self.user_interaction,
                n_items,
                n_users,
            )?,
        }

        let n_primary = self.n_primary();
        let n_elements = self.engine.num_sim_elements();
        let density_ratio = 100.0 * n_elements as f64 / (n_primary * n_primary).max(1) as f64;
        info!(
            "sim_matrix, shape: ({n_primary}, {n_primary}), num_elements: {n_elements}, \
             density: {density_ratio:5.4} %"
        );

        if self.config.store_top_k {
            self.engine.compute_top_k()?;
        }
        Ok(())
    }

    fn fitted_sim_matrix(&self) -> Result<&CsrMatrix<u32, f32>> {
        self.engine.sim_matrix().ok_or_else(|| {
            RecError::UnsupportedOperation("model must be fitted before inference".to_string())
        })
    }

    /// KNN prediction for a known user-item pair. The anchor is the item for
    /// item-CF and the user for user-CF.
    pub fn predict_pair(&self, user: InnerId, item: InnerId) -> Result<f32> {
        let sim_matrix = self.fitted_sim_matrix()?;
        let (anchor, interaction_row) = match self.cf_type {
            CfType::ItemCf => (item, self.user_interaction.row(user as usize)),
            CfType::UserCf => (user, self.item_interaction.row(item as usize)),
        };
        let common = common_neighbors(sim_matrix.row(anchor as usize), interaction_row);
        let pred = predict_single(
            common,
            self.config.k_sim,
            self.task,
            (self.lower_bound, self.upper_bound),
        );
        Ok(pred.unwrap_or_else(|| {
            if self.print_count.tick_below(NO_NEIGHBOR_LOG_LIMIT) {
                warn!(
                    "No common interaction or similar neighbor for user {user} and item {item}, \
                     proceed with default prediction"
                );
            }
            self.default_pred
        }))
    }

    /// Predictions for external id pairs, pairs with an unknown user or item
    /// receive the default prediction.
    pub fn predict(
        &self,
        users: &[ExternalId],
        items: &[ExternalId],
        cold_start: &str,
    ) -> Result<Vec<f32>> {
        let ColdStart::Popular = cold_start.parse()?;
        if users.len() != items.len() {
            return Err(RecError::InvalidArgument(format!(
                "{} users but {} items",
                users.len(),
                items.len()
            )));
        }
        let user2id = self.data_info.user2id();
        let item2id = self.data_info.item2id();
        users
            .iter()
            .zip(items)
            .map(|(u, i)| match (user2id.get(u), item2id.get(i)) {
                (Some(&u), Some(&i)) => self.predict_pair(u, i),
                _ => Ok(self.default_pred),
            })
            .collect()
    }

    /// Filters and ranks candidate scores of `user`.
    ///
    /// Without any candidate the popular items are returned, minus the
    /// consumed ones when `filter_consumed` is set.
    pub fn rank_recommendations(
        &self,
        user: InnerId,
        scores: FxHashMap<InnerId, f32>,
        n_rec: usize,
        filter_consumed: bool,
        random_rec: bool,
    ) -> Vec<InnerId> {
        let consumed = get_consumed_set(self.data_info.consumption(), user, filter_consumed);
        let is_consumed = |i: &InnerId| consumed.as_ref().is_some_and(|c| c.contains(i));
        let candidates: FxHashMap<InnerId, f32> = scores
            .into_iter()
            .filter(|(i, _)| !is_consumed(i))
            .collect();

        if candidates.is_empty() {
            if self.print_count.tick_below(NO_CANDIDATE_LOG_LIMIT) {
                warn!("no suitable recommendation for user {user}, return default recommendation");
            }
            return self
                .data_info
                .popular_items()
                .iter()
                .copied()
                .filter(|i| !is_consumed(i))
                .take(n_rec)
                .collect();
        }
        let mut rng = seeded_rng(self.config.seed, user);
        get_rec_items(candidates, n_rec, random_rec, &mut rng)
    }

    pub fn save(&self, path: impl AsRef<Path>, model_name: &str) -> Result<()> {
        let path = path.as_ref();
        let sim_matrix = self.fitted_sim_matrix()?;
        ensure_dir(path)?;
        let params = HyperParameters {
            task: self.task,
            cf_type: self.cf_type,
            config: self.config.clone(),
        };
        save_json(&params, path, model_name, PARAMS_SUFFIX)?;
        save_model(sim_matrix, path, model_name, SIM_MATRIX_SUFFIX)?;
        save_model(&self.user_interaction, path, model_name, USER_INTER_SUFFIX)?;
        save_model(&self.item_interaction, path, model_name, ITEM_INTER_SUFFIX)?;
        Ok(())
    }

    /// Restores a model saved by [`CfBase::save`]; `data_info` must be the
    /// one the model was trained with.
    pub fn load(
        path: impl AsRef<Path>,
        model_name: &str,
        data_info: DataInfo,
        cf_type: CfType,
    ) -> Result<Self> {
        let path = path.as_ref();
        check_exists(path)?;
        let params: HyperParameters =
            load_json(path, model_name, PARAMS_SUFFIX)?.ok_or_else(|| {
                RecError::StorageNotFound(format!(
                    "{}",
                    path.join(format!("{model_name}_{PARAMS_SUFFIX}.json")).display()
                ))
            })?;
        if params.cf_type != cf_type {
            return Err(RecError::InvalidArgument(format!(
                "saved model is {}, not {}",
                params.cf_type.as_str(),
                cf_type.as_str()
            )));
        }

        let mut base = CfBase::new(params.task, params.cf_type, data_info, params.config)?;
        let sim_matrix: CsrMatrix<u32, f32> = load_model(path, model_name, SIM_MATRIX_SUFFIX)?;
        base.user_interaction = load_model(path, model_name, USER_INTER_SUFFIX)?;
        base.item_interaction = load_model(path, model_name, ITEM_INTER_SUFFIX)?;
        let primary_name = if cf_type == CfType::UserCf { "user" } else { "item" };
        let n_users = base.data_info.n_users();
        let n_items = base.data_info.n_items();
        for (name, n_rows, expected, entity) in [
            ("similarity", sim_matrix.n_rows(), base.n_primary(), primary_name),
            ("user interaction", base.user_interaction.n_rows(), n_users, "user"),
            ("item interaction", base.item_interaction.n_rows(), n_items, "item"),
        ] {
            if n_rows != expected {
                return Err(RecError::Schema(format!(
                    "{name} matrix has {n_rows} rows, but data info has {expected} {entity}s"
                )));
            }
        }
        base.engine.restore(sim_matrix);
        if base.config.store_top_k {
            base.engine.compute_top_k()?;
        }
        Ok(base)
    }
}

fn sim_type_caution(task: Task, sim_type: SimType) -> Option<&'static str> {
    match (task, sim_type) {
        (Task::Ranking, SimType::Pearson) => Some("pearson is not suitable for implicit data"),
        (Task::Rating, SimType::Jaccard) => Some("jaccard is not suitable for explicit data"),
        _ => None,
    }
}

/// Common fit/predict/recommend/save surface of the CF models.
pub trait CfModel {
    fn base(&self) -> &CfBase;

    fn base_mut(&mut self) -> &mut CfBase;

    /// Ranked recommendations for a known user, all ids are inner ids.
    fn recommend_one(
        &self,
        user: InnerId,
        n_rec: usize,
        filter_consumed: bool,
        random_rec: bool,
    ) -> Vec<InnerId>;

    fn fit(&mut self) -> Result<()> {
        self.base_mut().fit()
    }

    fn predict(
        &self,
        users: &[ExternalId],
        items: &[ExternalId],
        cold_start: &str,
    ) -> Result<Vec<f32>> {
        self.base().predict(users, items, cold_start)
    }

    /// Recommendations keyed by user, unknown users receive the popular
    /// items.
    fn recommend_user(
        &self,
        users: &[ExternalId],
        n_rec: usize,
        cold_start: &str,
        filter_consumed: bool,
        random_rec: bool,
    ) -> Result<BTreeMap<ExternalId, Vec<ExternalId>>> {
        let ColdStart::Popular = cold_start.parse()?;
        let base = self.base();
        base.fitted_sim_matrix()?;
        let data_info = base.data_info();

        let mut result = BTreeMap::new();
        for user in users {
            let inner_items = match data_info.user2id().get(user) {
                Some(&u) => self.recommend_one(u, n_rec, filter_consumed, random_rec),
                None => data_info.popular_recommendations(n_rec),
            };
            let items = inner_items
                .into_iter()
                .filter_map(|i| data_info.id2item(i).cloned())
                .collect();
            result.insert(user.clone(), items);
        }
        Ok(result)
    }

    fn save(&self, path: &Path, model_name: &str) -> Result<()> {
        self.base().save(path, model_name)
    }

    fn num_sim_elements(&self) -> usize {
        self.base().engine().num_sim_elements()
    }
}

/// Five users (1..=5) and five items (10..=50), inner ids follow that order.
///
/// ```text
/// [
///     [1, 1, 0, 0, 0],
///     [1, 1, 1, 0, 0],
///     [0, 1, 1, 1, 0],
///     [0, 0, 1, 1, 1],
///     [0, 0, 0, 1, 1],
/// ]
/// ```
///
/// Labels are 1 for implicit data, `1 + (u + i) % 5` otherwise.
#[cfg(test)]
pub(crate) fn sample_data_info(rating: bool) -> Result<DataInfo> {
    use crate::data::InteractionData;

    let pairs: [(i64, i64); 13] = [
        (0, 0), (0, 1),
        (1, 0), (1, 1), (1, 2),
        (2, 1), (2, 2), (2, 3),
        (3, 2), (3, 3), (3, 4),
        (4, 3), (4, 4),
    ];
    let users: Vec<i64> = pairs.iter().map(|&(u, _)| u + 1).collect();
    let items: Vec<i64> = pairs.iter().map(|&(_, i)| (i + 1) * 10).collect();
    let labels: Vec<f32> = pairs
        .iter()
        .map(|&(u, i)| if rating { 1.0 + ((u + i) % 5) as f32 } else { 1.0 })
        .collect();
    let data = InteractionData::new(users, items, labels)?;
    DataInfo::from_train(&data, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_cold_start_parse() {
        assert_eq!("popular".parse::<ColdStart>().unwrap(), ColdStart::Popular);
        assert!(matches!(
            "average".parse::<ColdStart>(),
            Err(RecError::UnsupportedStrategy(_))
        ));
    }

    #[test]
    fn test_config_builder_and_json() -> TestResult {
        let config = CfConfig::default()
            .with_sim_type(SimType::Jaccard)
            .with_k_sim(5)
            .with_block_size(Some(64))
            .with_lower_upper_bound(Some((1.0, 5.0)));
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.mode, SimMode::Invert);

        let json = serde_json::to_string(&config)?;
        assert!(json.contains("\"jaccard\""));
        let restored: CfConfig = serde_json::from_str(&json)?;
        assert_eq!(restored, config);

        let partial: CfConfig = serde_json::from_str(r#"{"k_sim": 3}"#)?;
        assert_eq!(partial, CfConfig::default().with_k_sim(3));

        assert!(CfConfig::default().with_num_threads(0).validate().is_err());
        assert!(CfConfig::default()
            .with_lower_upper_bound(Some((5.0, 1.0)))
            .validate()
            .is_err());
        Ok(())
    }

    // interaction matrix (3 rows, 3 cols):
    // [
    //     [1, 1, 0],
    //     [1, 1, 1],
    //     [0, 0, 1],
    // ]
    fn interaction() -> Result<(CsrMatrix<u32, f32>, CsrMatrix<u32, f32>)> {
        let primary = CsrMatrix::from_triplets(
            &[0, 0, 1, 1, 1, 2],
            &[0, 1, 0, 1, 2, 2],
            &[1.0; 6],
            3,
        )?;
        let transpose = primary.transpose(3)?;
        Ok((primary, transpose))
    }

    #[test]
    fn test_no_neighbor_default_keeps_counting() -> Result<()> {
        let config = CfConfig::default().with_k_sim(2);
        let data_info = sample_data_info(false)?;
        let mut base = CfBase::new(Task::Ranking, CfType::ItemCf, data_info, config)?;
        base.fit()?;
        // item 4 shares no user with items 0 and 1 consumed by user 0
        for _ in 0..NO_NEIGHBOR_LOG_LIMIT + 2 {
            assert_eq!(base.predict_pair(0, 4)?, base.default_pred());
        }
        assert_eq!(base.print_count.tick(), NO_NEIGHBOR_LOG_LIMIT + 3);
        assert!(!base.print_count.tick_below(NO_NEIGHBOR_LOG_LIMIT));
        Ok(())
    }

    #[test]
    fn test_sim_type_caution() {
        assert!(sim_type_caution(Task::Ranking, SimType::Pearson).is_some());
        assert!(sim_type_caution(Task::Rating, SimType::Jaccard).is_some());
        assert!(sim_type_caution(Task::Rating, SimType::Pearson).is_none());
        assert!(sim_type_caution(Task::Ranking, SimType::Jaccard).is_none());
        assert!(sim_type_caution(Task::Ranking, SimType::Cosine).is_none());
        assert!(sim_type_caution(Task::Rating, SimType::Cosine).is_none());
    }

    #[test]
    fn test_load_with_mismatched_data_info() -> TestResult {
        let dir = crate::serialization::test_dir("cf_base_mismatch");
        let data_info = sample_data_info(false)?;
        let mut base = CfBase::new(Task::Ranking, CfType::ItemCf, data_info, CfConfig::default())?;
        base.fit()?;
        base.save(&dir, "model")?;

        // same items, one more user
        let mut data_info = sample_data_info(false)?;
        let new_data = crate::data::InteractionData::new([6], [10], vec![1.0])?;
        data_info.merge_train(&new_data, true)?;
        assert_eq!((data_info.n_users(), data_info.n_items()), (6, 5));
        let res = CfBase::load(&dir, "model", data_info, CfType::ItemCf);
        assert!(matches!(res, Err(RecError::Schema(_))));

        let loaded = CfBase::load(&dir, "model", sample_data_info(false)?, CfType::ItemCf)?;
        assert_eq!(loaded.user_interaction(), base.user_interaction());
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_engine_state_machine() -> Result<()> {
        let mut engine = SimilarityEngine::new(CfConfig::default().with_k_sim(1));
        assert!(matches!(engine.state(), SimilarityState::Uninitialized));
        assert!(engine.neighbors(0).is_empty());
        assert!(matches!(
            engine.compute_top_k(),
            Err(RecError::UnsupportedOperation(_))
        ));

        let (primary, transpose) = interaction()?;
        engine.compute(&primary, &transpose, 3, 3)?;
        assert!(matches!(engine.state(), SimilarityState::Computed(_)));
        assert!(engine.top_k().is_none());
        // row 0 is closer to row 1 than row 2 is
        let on_the_fly: Vec<u32> = engine.neighbors(0).iter().map(|n| n.id).collect();
        assert_eq!(on_the_fly, vec![1]);

        engine.compute_top_k()?;
        assert!(matches!(engine.state(), SimilarityState::TopKCached { .. }));
        let cached: Vec<u32> = engine.neighbors(0).iter().map(|n| n.id).collect();
        assert_eq!(cached, on_the_fly);
        assert_eq!(engine.top_k().map(|t| t.len()), Some(3));
        assert!(engine.neighbors(10).is_empty());
        assert_eq!(engine.num_sim_elements(), 4);

        engine.compute(&primary, &transpose, 3, 3)?;
        assert!(engine.top_k().is_none());
        Ok(())
    }
}
