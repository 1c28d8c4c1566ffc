//! Indices and feature information shared by every model.
//!
//! `DataInfo` owns the external→inner id mapping, the feature schema, one
//! feature row per user and item (plus a trailing oov row), the consumption
//! index and the popular items. It also absorbs new training data: unseen
//! users, items and categories are appended so that previously trained
//! embeddings keep their positions, and the layout before the change is kept
//! in [`OldInfo`] for the model layer to resize its weights.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consumed::ConsumptionIndex;
use crate::data::{EntityFeatures, FeatureColumns, InteractionData};
use crate::error::{RecError, Result};
use crate::features::{FeatureMatrix, FeatureRow};
use crate::id_index::{EntityKind, ExternalId, IdentifierIndex};
use crate::schema::{
    ColumnFamily, ColumnMapping, Feature, FeatureSchema, MultiSparseInfo, OldSchema,
};
use crate::serialization::{check_exists, ensure_dir, load_json, load_model, save_json, save_model};
use crate::sparse::CsrMatrix;
use crate::utils::InnerId;

pub(crate) const DEFAULT_POPULAR_NUM: usize = 100;

const NAME_MAPPING_SUFFIX: &str = "data_info_name_mapping";
const ARCHIVE_SUFFIX: &str = "data_info";
const UNIQUE_PREFIX: &str = "unique_";
const MULTI_UNIQUE_PREFIX: &str = "munique_";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub global_mean: f32,
    pub min: f32,
    pub max: f32,
    pub data_size: usize,
}

impl LabelStats {
    fn compute(labels: &[f32]) -> Self {
        let sum: f64 = labels.iter().map(|&l| f64::from(l)).sum();
        let global_mean = if labels.is_empty() {
            0.0
        } else {
            (sum / labels.len() as f64) as f32
        };
        let min = labels.iter().copied().fold(f32::INFINITY, f32::min);
        let max = labels.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Self {
            global_mean,
            min,
            max,
            data_size: labels.len(),
        }
    }
}

/// Entity counts and sparse layout before the last incremental update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OldInfo {
    pub n_users: usize,
    pub n_items: usize,
    pub schema: Option<OldSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RawInteractions {
    user: Vec<ExternalId>,
    item: Vec<ExternalId>,
    label: Vec<f32>,
}

impl RawInteractions {
    fn from_data(data: &InteractionData) -> Self {
        Self {
            user: data.user.clone(),
            item: data.item.clone(),
            label: data.label.clone(),
        }
    }

    fn extend(&mut self, data: &InteractionData) {
        self.user.extend_from_slice(&data.user);
        self.item.extend_from_slice(&data.item);
        self.label.extend_from_slice(&data.label);
    }
}

#[derive(Serialize, Deserialize)]
struct DataInfoArchive {
    interaction_data: Option<RawInteractions>,
    user_unique_vals: Vec<ExternalId>,
    item_unique_vals: Vec<ExternalId>,
    user_sparse_unique: Option<FeatureMatrix<usize>>,
    user_dense_unique: Option<FeatureMatrix<f32>>,
    item_sparse_unique: Option<FeatureMatrix<usize>>,
    item_dense_unique: Option<FeatureMatrix<f32>>,
    sparse_offset: Vec<usize>,
    sparse_oov: Vec<usize>,
    // `unique_<col>` for sparse columns, `munique_<field>` for multi-sparse fields
    unique_vals: BTreeMap<String, Vec<ExternalId>>,
    multi_sparse_combine_info: Option<MultiSparseInfo>,
    consumption: ConsumptionIndex,
    popular_items: Vec<InnerId>,
    label_stats: LabelStats,
    old_info: Option<OldInfo>,
}

#[derive(Debug, Clone)]
pub struct DataInfo {
    schema: Option<FeatureSchema>,
    // `None` once reduced to an inference-only state
    interactions: Option<RawInteractions>,
    id_index: IdentifierIndex,
    user_sparse_unique: Option<FeatureMatrix<usize>>,
    user_dense_unique: Option<FeatureMatrix<f32>>,
    item_sparse_unique: Option<FeatureMatrix<usize>>,
    item_dense_unique: Option<FeatureMatrix<f32>>,
    consumption: ConsumptionIndex,
    popular_items: Vec<InnerId>,
    label_stats: LabelStats,
    old_info: Option<OldInfo>,
}

fn sparse_family(kind: EntityKind) -> ColumnFamily {
    match kind {
        EntityKind::User => ColumnFamily::UserSparse,
        EntityKind::Item => ColumnFamily::ItemSparse,
    }
}

fn dense_family(kind: EntityKind) -> ColumnFamily {
    match kind {
        EntityKind::User => ColumnFamily::UserDense,
        EntityKind::Item => ColumnFamily::ItemDense,
    }
}

fn oov_values(schema: &FeatureSchema, cols: &Feature) -> Result<Vec<usize>> {
    cols.index.iter().map(|&pos| schema.oov(pos)).collect()
}

/// Category dictionaries observed in a training frame. Every column of the
/// mapping must be present.
fn build_schema(mapping: ColumnMapping, features: &FeatureColumns) -> Result<FeatureSchema> {
    mapping.validate()?;
    let mut sparse_vals: BTreeMap<String, Vec<ExternalId>> = BTreeMap::new();
    let mut multi_vals: BTreeMap<String, Vec<ExternalId>> = BTreeMap::new();
    for name in mapping.family(ColumnFamily::Sparse).name {
        let values = features
            .sparse
            .get(&name)
            .ok_or_else(|| RecError::Schema(format!("sparse column `{name}` missing from data")))?;
        match mapping.multi_sparse_field(&name) {
            // duplicates are dropped when the vocabulary is built
            Some(field) => multi_vals
                .entry(field.to_string())
                .or_default()
                .extend(values.iter().cloned()),
            None => {
                sparse_vals.insert(name.clone(), values.clone());
            }
        }
    }
    for name in mapping.family(ColumnFamily::Dense).name {
        if !features.dense.contains_key(&name) {
            return Err(RecError::Schema(format!(
                "dense column `{name}` missing from data"
            )));
        }
    }
    FeatureSchema::new(mapping, sparse_vals, multi_vals)
}

/// Writes the sparse columns of `cols` found in `features` into `matrix`.
/// Rows past the entity count are skipped.
fn assign_sparse(
    schema: &FeatureSchema,
    matrix: &mut FeatureMatrix<usize>,
    cols: &Feature,
    rows: &[InnerId],
    features: &FeatureColumns,
) -> Result<()> {
    for (j, (name, &pos)) in cols.name.iter().zip(&cols.index).enumerate() {
        if features.dense.contains_key(name) {
            return Err(RecError::Schema(format!(
                "column `{name}` is sparse, but numeric values were given"
            )));
        }
        let Some(values) = features.sparse.get(name) else {
            continue;
        };
        for (&r, v) in rows.iter().zip(values) {
            if (r as usize) < matrix.n_entities() {
                matrix.set(r as usize, j, schema.sparse_index(pos, v)?)?;
            }
        }
    }
    Ok(())
}

fn assign_dense(
    matrix: &mut FeatureMatrix<f32>,
    cols: &Feature,
    rows: &[InnerId],
    features: &FeatureColumns,
) -> Result<()> {
    for (j, name) in cols.name.iter().enumerate() {
        if features.sparse.contains_key(name) {
            return Err(RecError::Schema(format!(
                "column `{name}` is dense, but categorical values were given"
            )));
        }
        let Some(values) = features.dense.get(name) else {
            continue;
        };
        for (&r, &v) in rows.iter().zip(values) {
            if (r as usize) < matrix.n_entities() {
                matrix.set(r as usize, j, v)?;
            }
        }
    }
    Ok(())
}

impl DataInfo {
    /// Builds ids, category dictionaries, offsets, unique feature matrices,
    /// consumption index and popular items from a training frame. Inner ids
    /// follow the order in which users and items first appear.
    pub fn from_train(data: &InteractionData, mapping: Option<ColumnMapping>) -> Result<Self> {
        if data.is_empty() {
            return Err(RecError::InvalidArgument("empty training data".to_string()));
        }
        let mut id_index = IdentifierIndex::default();
        let user_ids = id_index.assign(&data.user, EntityKind::User);
        let item_ids = id_index.assign(&data.item, EntityKind::Item);
        let schema = mapping
            .map(|m| build_schema(m, &data.features))
            .transpose()?;

        let mut data_info = DataInfo {
            schema,
            interactions: Some(RawInteractions::from_data(data)),
            id_index,
            user_sparse_unique: None,
            user_dense_unique: None,
            item_sparse_unique: None,
            item_dense_unique: None,
            consumption: ConsumptionIndex::build(&user_ids, &item_ids)?,
            popular_items: Vec::new(),
            label_stats: LabelStats::compute(&data.label),
            old_info: None,
        };
        data_info.init_unique_matrices()?;
        data_info.assign_rows(EntityKind::User, &user_ids, &data.features)?;
        data_info.assign_rows(EntityKind::Item, &item_ids, &data.features)?;
        data_info.refresh_oov_rows()?;
        data_info.set_popular_items(DEFAULT_POPULAR_NUM);
        info!("{data_info}");
        Ok(data_info)
    }

    fn init_unique_matrices(&mut self) -> Result<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        let n_users = self.id_index.n_users();
        let n_items = self.id_index.n_items();
        let build_sparse = |cols: Feature, n: usize| -> Result<Option<FeatureMatrix<usize>>> {
            if cols.is_empty() {
                return Ok(None);
            }
            let oov = oov_values(schema, &cols)?;
            FeatureMatrix::new(n, &oov, &oov).map(Some)
        };
        let build_dense = |cols: Feature, n: usize| -> Result<Option<FeatureMatrix<f32>>> {
            if cols.is_empty() {
                return Ok(None);
            }
            let zeros = vec![0.0; cols.len()];
            FeatureMatrix::new(n, &zeros, &zeros).map(Some)
        };
        let mapping = schema.mapping();
        self.user_sparse_unique = build_sparse(mapping.family(ColumnFamily::UserSparse), n_users)?;
        self.item_sparse_unique = build_sparse(mapping.family(ColumnFamily::ItemSparse), n_items)?;
        self.user_dense_unique = build_dense(mapping.family(ColumnFamily::UserDense), n_users)?;
        self.item_dense_unique = build_dense(mapping.family(ColumnFamily::ItemDense), n_items)?;
        Ok(())
    }

    fn assign_rows(
        &mut self,
        kind: EntityKind,
        rows: &[InnerId],
        features: &FeatureColumns,
    ) -> Result<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        let (sparse_matrix, dense_matrix) = match kind {
            EntityKind::User => (&mut self.user_sparse_unique, &mut self.user_dense_unique),
            EntityKind::Item => (&mut self.item_sparse_unique, &mut self.item_dense_unique),
        };
        if let Some(matrix) = sparse_matrix.as_mut() {
            let cols = schema.mapping().family(sparse_family(kind));
            assign_sparse(schema, matrix, &cols, rows, features)?;
        }
        if let Some(matrix) = dense_matrix.as_mut() {
            let cols = schema.mapping().family(dense_family(kind));
            assign_dense(matrix, &cols, rows, features)?;
        }
        Ok(())
    }

    /// Sparse oov rows take the current oov indices, dense oov rows the
    /// column means of known entities.
    fn refresh_oov_rows(&mut self) -> Result<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        for (kind, matrix) in [
            (EntityKind::User, self.user_sparse_unique.as_mut()),
            (EntityKind::Item, self.item_sparse_unique.as_mut()),
        ] {
            if let Some(matrix) = matrix {
                let cols = schema.mapping().family(sparse_family(kind));
                matrix.set_oov_row(&oov_values(schema, &cols)?)?;
            }
        }
        for matrix in [
            self.user_dense_unique.as_mut(),
            self.item_dense_unique.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            matrix.refresh_oov_mean()?;
        }
        Ok(())
    }

    fn assign_entity_features(&mut self, kind: EntityKind, data: &EntityFeatures) -> Result<()> {
        if data.features.is_empty() {
            return Ok(());
        }
        if self.schema.is_none() {
            return Err(RecError::Schema(
                "no feature columns were fitted, can't assign features".to_string(),
            ));
        }
        let index = self.id_index.entity(kind);
        let mut unknown = 0usize;
        let rows: Vec<InnerId> = data
            .ids
            .iter()
            .map(|id| {
                index.get(id).unwrap_or_else(|| {
                    unknown += 1;
                    index.oov()
                })
            })
            .collect();
        if unknown > 0 {
            warn!(
                "{unknown} unknown {} ids skipped when assigning features",
                kind.as_str()
            );
        }
        self.assign_rows(kind, &rows, &data.features)?;
        self.refresh_oov_rows()
    }

    /// Overwrites the feature rows of known users with the columns present
    /// in `data`. Absent columns and unknown users are left untouched.
    pub fn assign_user_features(&mut self, data: &EntityFeatures) -> Result<()> {
        self.assign_entity_features(EntityKind::User, data)
    }

    pub fn assign_item_features(&mut self, data: &EntityFeatures) -> Result<()> {
        self.assign_entity_features(EntityKind::Item, data)
    }

    /// Keeps entity counts and sparse layout before they change.
    pub fn store_old_info(&mut self) {
        self.old_info = Some(OldInfo {
            n_users: self.n_users(),
            n_items: self.n_items(),
            schema: self.schema.as_ref().map(FeatureSchema::snapshot),
        });
    }

    fn extend_unique_matrix(&mut self, kind: EntityKind, diff_num: usize) -> Result<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        let (sparse_matrix, dense_matrix) = match kind {
            EntityKind::User => (&mut self.user_sparse_unique, &mut self.user_dense_unique),
            EntityKind::Item => (&mut self.item_sparse_unique, &mut self.item_dense_unique),
        };
        if let Some(matrix) = sparse_matrix.as_mut() {
            let cols = schema.mapping().family(sparse_family(kind));
            matrix.extend_entities(diff_num, &oov_values(schema, &cols)?)?;
        }
        if let Some(matrix) = dense_matrix.as_mut() {
            let zeros = vec![0.0; matrix.n_cols()];
            matrix.extend_entities(diff_num, &zeros)?;
        }
        Ok(())
    }

    /// Learns the users, items and categories of `data`: ids first, then
    /// new matrix rows before the oov rows, then category dictionaries.
    /// Returns the number of new users and items.
    pub fn expand_and_reconcile(&mut self, data: &InteractionData) -> Result<(usize, usize)> {
        let (new_users, new_items) = self.id_index.expand(&data.user, &data.item);
        if new_users > 0 {
            self.extend_unique_matrix(EntityKind::User, new_users)?;
        }
        if new_items > 0 {
            self.extend_unique_matrix(EntityKind::Item, new_items)?;
        }

        if let Some(schema) = self.schema.as_mut() {
            let sparse_names = schema.mapping().family(ColumnFamily::Sparse).name;
            for name in sparse_names {
                if let Some(values) = data.features.sparse.get(&name) {
                    let added = schema.expand_categories(&name, values)?;
                    if added > 0 {
                        debug!("sparse column `{name}` gained {added} categories");
                    }
                }
            }
        }
        Ok((new_users, new_items))
    }

    /// Re-bases stored sparse indices after offsets moved.
    fn modify_sparse_indices(&mut self) -> Result<()> {
        let (Some(schema), Some(OldInfo { schema: Some(old), .. })) = (&self.schema, &self.old_info)
        else {
            return Ok(());
        };
        for (kind, matrix) in [
            (EntityKind::User, self.user_sparse_unique.as_mut()),
            (EntityKind::Item, self.item_sparse_unique.as_mut()),
        ] {
            if let Some(matrix) = matrix {
                let cols = schema.mapping().family(sparse_family(kind));
                matrix.try_map_in_place(|j, v| old.rebase(schema, cols.index[j], v))?;
            }
        }
        Ok(())
    }

    fn indexed_ids(&self, raw: &RawInteractions) -> (Vec<InnerId>, Vec<InnerId>) {
        let users = self.id_index.users();
        let items = self.id_index.items();
        (
            raw.user.iter().map(|u| users.get_or_oov(u)).collect(),
            raw.item.iter().map(|i| items.get_or_oov(i)).collect(),
        )
    }

    /// Absorbs new training data into the fitted index space.
    ///
    /// With `merge`, the consumption index and interaction rows cover old and
    /// new data, otherwise only the new data. On error `self` is left as it
    /// was, including the previous [`OldInfo`].
    pub fn merge_train(&mut self, data: &InteractionData, merge: bool) -> Result<()> {
        if self.interactions.is_none() {
            return Err(RecError::UnsupportedOperation(
                "DataInfo was loaded for inference only, retraining needs the full training state"
                    .to_string(),
            ));
        }
        if data.is_empty() {
            return Err(RecError::InvalidArgument("empty training data".to_string()));
        }
        // ids, offsets and matrices change before the frame is fully checked
        let mut updated = self.clone();
        updated
            .try_merge_train(data, merge)
            .inspect_err(|e| warn!("incremental update failed: {e}"))?;
        *self = updated;
        Ok(())
    }

    fn try_merge_train(&mut self, data: &InteractionData, merge: bool) -> Result<()> {
        self.store_old_info();
        let (new_users, new_items) = self.expand_and_reconcile(data)?;
        if let Some(schema) = self.schema.as_mut() {
            schema.recompute_offsets();
        }
        self.modify_sparse_indices()?;

        let users = self.id_index.users();
        let items = self.id_index.items();
        let user_ids: Vec<InnerId> = data.user.iter().map(|u| users.get_or_oov(u)).collect();
        let item_ids: Vec<InnerId> = data.item.iter().map(|i| items.get_or_oov(i)).collect();
        self.assign_rows(EntityKind::User, &user_ids, &data.features)?;
        self.assign_rows(EntityKind::Item, &item_ids, &data.features)?;
        self.refresh_oov_rows()?;

        let (old_users, old_items) = match &self.interactions {
            Some(raw) if merge => self.indexed_ids(raw),
            _ => (Vec::new(), Vec::new()),
        };
        self.consumption =
            ConsumptionIndex::merge_and_rebuild(&old_users, &old_items, &user_ids, &item_ids)?;
        if merge {
            if let Some(raw) = self.interactions.as_mut() {
                raw.extend(data);
            }
        } else {
            self.interactions = Some(RawInteractions::from_data(data));
        }
        let labels = self
            .interactions
            .as_ref()
            .map(|raw| raw.label.as_slice())
            .unwrap_or_default();
        self.label_stats = LabelStats::compute(labels);
        self.set_popular_items(DEFAULT_POPULAR_NUM);
        info!(
            "merged {} interactions, {new_users} new users, {new_items} new items, {self}",
            data.len()
        );
        Ok(())
    }

    /// Top `num` items by number of distinct users, padded with the previous
    /// popular items when there aren't enough candidates.
    pub fn set_popular_items(&mut self, num: usize) {
        let mut counts: Vec<(InnerId, usize)> = self
            .consumption
            .item_consumed()
            .iter()
            .map(|(&i, users)| (i, users.iter().collect::<FxHashSet<_>>().len()))
            .collect();
        counts.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let mut selected: Vec<InnerId> = counts.into_iter().take(num).map(|(i, _)| i).collect();
        if selected.len() < num {
            let mut chosen: FxHashSet<InnerId> = selected.iter().copied().collect();
            for &i in &self.popular_items {
                if selected.len() >= num {
                    break;
                }
                if chosen.insert(i) {
                    selected.push(i);
                }
            }
        }
        self.popular_items = selected;
    }

    /// Drops the raw interactions and the old-layout snapshot, keeping what
    /// prediction and recommendation need.
    pub fn into_inference(mut self) -> Self {
        self.interactions = None;
        self.old_info = None;
        self
    }

    pub fn is_retrainable(&self) -> bool {
        self.interactions.is_some()
    }

    /// Inner (user, item, label) triplets of the stored interactions.
    pub fn indexed_interactions(&self) -> Result<(Vec<InnerId>, Vec<InnerId>, Vec<f32>)> {
        let raw = self.interactions.as_ref().ok_or_else(|| {
            RecError::UnsupportedOperation(
                "interaction data isn't available in an inference-only DataInfo".to_string(),
            )
        })?;
        let (users, items) = self.indexed_ids(raw);
        Ok((users, items, raw.label.clone()))
    }

    /// User × item interaction matrix, duplicated pairs summed.
    pub fn sparse_interaction(&self) -> Result<CsrMatrix<InnerId, f32>> {
        let (users, items, labels) = self.indexed_interactions()?;
        CsrMatrix::from_triplets(&users, &items, &labels, self.n_users())
    }

    pub fn n_users(&self) -> usize {
        self.id_index.n_users()
    }

    pub fn n_items(&self) -> usize {
        self.id_index.n_items()
    }

    pub fn id_index(&self) -> &IdentifierIndex {
        &self.id_index
    }

    pub fn user2id(&self) -> &FxHashMap<ExternalId, InnerId> {
        self.id_index.users().mapping()
    }

    pub fn item2id(&self) -> &FxHashMap<ExternalId, InnerId> {
        self.id_index.items().mapping()
    }

    pub fn id2user(&self, inner: InnerId) -> Option<&ExternalId> {
        self.id_index.external_id(inner, EntityKind::User)
    }

    pub fn id2item(&self, inner: InnerId) -> Option<&ExternalId> {
        self.id_index.external_id(inner, EntityKind::Item)
    }

    pub fn user_unique_vals(&self) -> &[ExternalId] {
        self.id_index.users().unique_vals()
    }

    pub fn item_unique_vals(&self) -> &[ExternalId] {
        self.id_index.items().unique_vals()
    }

    pub fn user_inner_id_strict(&self, user: &ExternalId) -> Result<InnerId> {
        self.id_index.inner_id_strict(user, EntityKind::User)
    }

    pub fn item_inner_id_strict(&self, item: &ExternalId) -> Result<InnerId> {
        self.id_index.inner_id_strict(item, EntityKind::Item)
    }

    pub fn user_row(&self, user: &ExternalId) -> FeatureRow {
        self.id_index
            .users()
            .get(user)
            .map_or(FeatureRow::OutOfVocabulary, FeatureRow::Known)
    }

    pub fn item_row(&self, item: &ExternalId) -> FeatureRow {
        self.id_index
            .items()
            .get(item)
            .map_or(FeatureRow::OutOfVocabulary, FeatureRow::Known)
    }

    pub fn user_sparse_unique(&self) -> Option<&FeatureMatrix<usize>> {
        self.user_sparse_unique.as_ref()
    }

    pub fn user_dense_unique(&self) -> Option<&FeatureMatrix<f32>> {
        self.user_dense_unique.as_ref()
    }

    pub fn item_sparse_unique(&self) -> Option<&FeatureMatrix<usize>> {
        self.item_sparse_unique.as_ref()
    }

    pub fn item_dense_unique(&self) -> Option<&FeatureMatrix<f32>> {
        self.item_dense_unique.as_ref()
    }

    pub fn consumption(&self) -> &ConsumptionIndex {
        &self.consumption
    }

    pub fn user_consumed(&self) -> &FxHashMap<InnerId, Vec<InnerId>> {
        self.consumption.user_consumed()
    }

    pub fn item_consumed(&self) -> &FxHashMap<InnerId, Vec<InnerId>> {
        self.consumption.item_consumed()
    }

    pub fn popular_items(&self) -> &[InnerId] {
        &self.popular_items
    }

    /// First `n_rec` popular items, the cold-start recommendation.
    pub fn popular_recommendations(&self, n_rec: usize) -> Vec<InnerId> {
        self.popular_items.iter().take(n_rec).copied().collect()
    }

    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.schema.as_ref()
    }

    pub fn col_name_mapping(&self) -> Option<&ColumnMapping> {
        self.schema.as_ref().map(FeatureSchema::mapping)
    }

    pub fn old_info(&self) -> Option<&OldInfo> {
        self.old_info.as_ref()
    }

    /// Columns of one family, empty without a schema.
    pub fn columns(&self, family: ColumnFamily) -> Feature {
        self.col_name_mapping()
            .map(|m| m.family(family))
            .unwrap_or_default()
    }

    pub fn sparse_col(&self) -> Feature {
        self.columns(ColumnFamily::Sparse)
    }

    pub fn dense_col(&self) -> Feature {
        self.columns(ColumnFamily::Dense)
    }

    pub fn user_sparse_col(&self) -> Feature {
        self.columns(ColumnFamily::UserSparse)
    }

    pub fn user_dense_col(&self) -> Feature {
        self.columns(ColumnFamily::UserDense)
    }

    pub fn item_sparse_col(&self) -> Feature {
        self.columns(ColumnFamily::ItemSparse)
    }

    pub fn item_dense_col(&self) -> Feature {
        self.columns(ColumnFamily::ItemDense)
    }

    /// All user column names, sorted.
    pub fn user_col(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .user_sparse_col()
            .name
            .into_iter()
            .chain(self.user_dense_col().name)
            .collect();
        names.into_iter().collect()
    }

    /// All item column names, sorted.
    pub fn item_col(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .item_sparse_col()
            .name
            .into_iter()
            .chain(self.item_dense_col().name)
            .collect();
        names.into_iter().collect()
    }

    pub fn global_mean(&self) -> f32 {
        self.label_stats.global_mean
    }

    pub fn min_max_rating(&self) -> (f32, f32) {
        (self.label_stats.min, self.label_stats.max)
    }

    pub fn data_size(&self) -> usize {
        self.label_stats.data_size
    }

    pub fn save(&self, path: impl AsRef<Path>, model_name: &str) -> Result<()> {
        let path = path.as_ref();
        ensure_dir(path)?;
        if let Some(mapping) = self.col_name_mapping() {
            save_json(mapping, path, model_name, NAME_MAPPING_SUFFIX)?;
        }

        let mut unique_vals = BTreeMap::new();
        if let Some(schema) = &self.schema {
            for (col, vocab) in schema.sparse_unique_vals() {
                unique_vals.insert(format!("{UNIQUE_PREFIX}{col}"), vocab.unique_vals().to_vec());
            }
            for (col, vocab) in schema.multi_sparse_unique_vals() {
                unique_vals.insert(
                    format!("{MULTI_UNIQUE_PREFIX}{col}"),
                    vocab.unique_vals().to_vec(),
                );
            }
        }
        let archive = DataInfoArchive {
            interaction_data: self.interactions.clone(),
            user_unique_vals: self.user_unique_vals().to_vec(),
            item_unique_vals: self.item_unique_vals().to_vec(),
            user_sparse_unique: self.user_sparse_unique.clone(),
            user_dense_unique: self.user_dense_unique.clone(),
            item_sparse_unique: self.item_sparse_unique.clone(),
            item_dense_unique: self.item_dense_unique.clone(),
            sparse_offset: self
                .schema
                .as_ref()
                .map(|s| s.sparse_offset().to_vec())
                .unwrap_or_default(),
            sparse_oov: self
                .schema
                .as_ref()
                .map(|s| s.sparse_oov().to_vec())
                .unwrap_or_default(),
            unique_vals,
            multi_sparse_combine_info: self
                .schema
                .as_ref()
                .and_then(|s| s.multi_sparse_combine_info().cloned()),
            consumption: self.consumption.clone(),
            popular_items: self.popular_items.clone(),
            label_stats: self.label_stats,
            old_info: self.old_info.clone(),
        };
        save_model(&archive, path, model_name, ARCHIVE_SUFFIX)
    }

    pub fn load(path: impl AsRef<Path>, model_name: &str) -> Result<Self> {
        let path = path.as_ref();
        check_exists(path)?;
        let mapping: Option<ColumnMapping> = load_json(path, model_name, NAME_MAPPING_SUFFIX)?;
        let archive: DataInfoArchive = load_model(path, model_name, ARCHIVE_SUFFIX)?;

        let schema = match mapping {
            Some(mapping) => {
                let mut sparse_vals = BTreeMap::new();
                let mut multi_vals = BTreeMap::new();
                for (key, vals) in archive.unique_vals {
                    if let Some(col) = key.strip_prefix(MULTI_UNIQUE_PREFIX) {
                        multi_vals.insert(col.to_string(), vals);
                    } else if let Some(col) = key.strip_prefix(UNIQUE_PREFIX) {
                        sparse_vals.insert(col.to_string(), vals);
                    } else {
                        return Err(RecError::Schema(format!("unexpected archive key `{key}`")));
                    }
                }
                let schema = FeatureSchema::new(mapping, sparse_vals, multi_vals)?;
                if schema.sparse_offset() != archive.sparse_offset.as_slice()
                    || schema.sparse_oov() != archive.sparse_oov.as_slice()
                    || schema.multi_sparse_combine_info()
                        != archive.multi_sparse_combine_info.as_ref()
                {
                    return Err(RecError::Schema(
                        "saved sparse offsets don't match the saved category values".to_string(),
                    ));
                }
                Some(schema)
            }
            None if !archive.unique_vals.is_empty() => {
                return Err(RecError::Schema(
                    "category values saved without a column name mapping".to_string(),
                ));
            }
            None => None,
        };

        let id_index = IdentifierIndex::new(archive.user_unique_vals, archive.item_unique_vals);
        let n_users = id_index.n_users();
        let n_items = id_index.n_items();
        let check_rows = |name: &str, n_rows: Option<usize>, n: usize| -> Result<()> {
            match n_rows {
                Some(rows) if rows != n + 1 => Err(RecError::Schema(format!(
                    "`{name}` has {rows} rows, expected {}",
                    n + 1
                ))),
                _ => Ok(()),
            }
        };
        let user_sparse_rows = archive.user_sparse_unique.as_ref().map(FeatureMatrix::n_rows);
        let user_dense_rows = archive.user_dense_unique.as_ref().map(FeatureMatrix::n_rows);
        let item_sparse_rows = archive.item_sparse_unique.as_ref().map(FeatureMatrix::n_rows);
        let item_dense_rows = archive.item_dense_unique.as_ref().map(FeatureMatrix::n_rows);
        for (name, n_rows, n) in [
            ("user_sparse_unique", user_sparse_rows, n_users),
            ("user_dense_unique", user_dense_rows, n_users),
            ("item_sparse_unique", item_sparse_rows, n_items),
            ("item_dense_unique", item_dense_rows, n_items),
        ] {
            check_rows(name, n_rows, n)?;
        }

        Ok(DataInfo {
            schema,
            interactions: archive.interaction_data,
            id_index,
            user_sparse_unique: archive.user_sparse_unique,
            user_dense_unique: archive.user_dense_unique,
            item_sparse_unique: archive.item_sparse_unique,
            item_dense_unique: archive.item_dense_unique,
            consumption: archive.consumption,
            popular_items: archive.popular_items,
            label_stats: archive.label_stats,
            old_info: archive.old_info,
        })
    }

    /// Loads the state needed for prediction and recommendation only.
    pub fn load_inference(path: impl AsRef<Path>, model_name: &str) -> Result<Self> {
        Self::load(path, model_name).map(Self::into_inference)
    }
}

impl fmt::Display for DataInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n_users = self.n_users();
        let n_items = self.n_items();
        let cells = (n_users * n_items).max(1);
        write!(
            f,
            "n_users: {}, n_items: {}, data density: {:.4} %",
            n_users,
            n_items,
            100.0 * self.data_size() as f64 / cells as f64
        )
    }
}
