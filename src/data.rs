//! Column-oriented frames handed over by callers: interactions with optional
//! feature columns, and per-entity feature updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::id_index::ExternalId;

/// Sparse (categorical) and dense (numeric) feature columns by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureColumns {
    pub sparse: BTreeMap<String, Vec<ExternalId>>,
    pub dense: BTreeMap<String, Vec<f32>>,
}

impl FeatureColumns {
    fn insert_sparse<V: Into<ExternalId>>(
        &mut self,
        n_rows: usize,
        col: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<()> {
        let values: Vec<ExternalId> = values.into_iter().map(Into::into).collect();
        check_len(col, values.len(), n_rows)?;
        self.sparse.insert(col.to_string(), values);
        Ok(())
    }

    fn insert_dense(&mut self, n_rows: usize, col: &str, values: Vec<f32>) -> Result<()> {
        check_len(col, values.len(), n_rows)?;
        self.dense.insert(col.to_string(), values);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.sparse.is_empty() && self.dense.is_empty()
    }
}

fn check_len(col: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(RecError::Schema(format!(
            "column `{col}` has {len} rows, expected {expected}"
        )));
    }
    Ok(())
}

/// `{user, item, label}` rows plus any feature columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionData {
    pub user: Vec<ExternalId>,
    pub item: Vec<ExternalId>,
    pub label: Vec<f32>,
    pub features: FeatureColumns,
}

impl InteractionData {
    pub fn new<U, I>(
        user: impl IntoIterator<Item = U>,
        item: impl IntoIterator<Item = I>,
        label: Vec<f32>,
    ) -> Result<Self>
    where
        U: Into<ExternalId>,
        I: Into<ExternalId>,
    {
        let user: Vec<ExternalId> = user.into_iter().map(Into::into).collect();
        let item: Vec<ExternalId> = item.into_iter().map(Into::into).collect();
        check_len("item", item.len(), user.len())?;
        check_len("label", label.len(), user.len())?;
        Ok(Self {
            user,
            item,
            label,
            features: FeatureColumns::default(),
        })
    }

    pub fn with_sparse<V: Into<ExternalId>>(
        mut self,
        col: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let n = self.len();
        self.features.insert_sparse(n, col, values)?;
        Ok(self)
    }

    pub fn with_dense(mut self, col: &str, values: Vec<f32>) -> Result<Self> {
        let n = self.len();
        self.features.insert_dense(n, col, values)?;
        Ok(self)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.user.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.user.is_empty()
    }
}

/// Feature rows of users or items, keyed by external id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFeatures {
    pub ids: Vec<ExternalId>,
    pub features: FeatureColumns,
}

impl EntityFeatures {
    pub fn new<V: Into<ExternalId>>(ids: impl IntoIterator<Item = V>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            features: FeatureColumns::default(),
        }
    }

    pub fn with_sparse<V: Into<ExternalId>>(
        mut self,
        col: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let n = self.ids.len();
        self.features.insert_sparse(n, col, values)?;
        Ok(self)
    }

    pub fn with_dense(mut self, col: &str, values: Vec<f32>) -> Result<Self> {
        let n = self.ids.len();
        self.features.insert_dense(n, col, values)?;
        Ok(self)
    }
}
