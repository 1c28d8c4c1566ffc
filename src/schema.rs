//! Column layout of sparse, dense and multi-sparse features, and the
//! placement of every sparse column in one flat embedding-index space.
//!
//! Each plain sparse column owns a contiguous block of `n_categories + 1`
//! indices, the last one being its out-of-vocabulary slot. The columns of a
//! multi-sparse field ("genre1", "genre2", "genre3") share the block and oov
//! of the field's main column, since they hold values of one attribute.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::id_index::{EntityIndex, ExternalId};

/// Category dictionary of a sparse column, position == category index.
pub type Vocabulary = EntityIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnFamily {
    Sparse,
    Dense,
    UserSparse,
    UserDense,
    ItemSparse,
    ItemDense,
}

/// Column names of one family with their positions, ordered by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feature {
    pub name: Vec<String>,
    pub index: Vec<usize>,
}

impl Feature {
    fn from_map(map: &BTreeMap<String, usize>) -> Self {
        let mut cols: Vec<(&String, usize)> = map.iter().map(|(k, &v)| (k, v)).collect();
        cols.sort_unstable_by_key(|&(_, v)| v);
        let (name, index) = cols.into_iter().map(|(k, v)| (k.clone(), v)).unzip();
        Feature { name, index }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }
}

/// Column-family → column-name → index mapping.
///
/// `sparse_col`/`dense_col` index every sparse/dense column; the user and
/// item families reuse those indices. `multi_sparse` maps every non-main
/// column of a multi-sparse field to the field's main column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub sparse_col: BTreeMap<String, usize>,
    #[serde(default)]
    pub dense_col: BTreeMap<String, usize>,
    #[serde(default)]
    pub user_sparse_col: BTreeMap<String, usize>,
    #[serde(default)]
    pub user_dense_col: BTreeMap<String, usize>,
    #[serde(default)]
    pub item_sparse_col: BTreeMap<String, usize>,
    #[serde(default)]
    pub item_dense_col: BTreeMap<String, usize>,
    #[serde(default)]
    pub multi_sparse: BTreeMap<String, String>,
}

fn check_positions(family: &str, map: &BTreeMap<String, usize>) -> Result<()> {
    let mut positions: Vec<usize> = map.values().copied().collect();
    positions.sort_unstable();
    if positions.iter().enumerate().any(|(i, &p)| i != p) {
        return Err(RecError::Schema(format!(
            "`{family}` indices must be a permutation of 0..{}, got {positions:?}",
            map.len()
        )));
    }
    Ok(())
}

fn check_subset(
    family: &str,
    parent_family: &str,
    map: &BTreeMap<String, usize>,
    parent: &BTreeMap<String, usize>,
) -> Result<()> {
    for (name, idx) in map {
        match parent.get(name) {
            Some(p) if p == idx => {}
            Some(p) => {
                return Err(RecError::Schema(format!(
                    "`{family}` column `{name}` has index {idx}, but {p} in `{parent_family}`"
                )))
            }
            None => {
                return Err(RecError::Schema(format!(
                    "`{family}` column `{name}` missing from `{parent_family}`"
                )))
            }
        }
    }
    Ok(())
}

impl ColumnMapping {
    /// Builds the user/item families from column lists, assigning positions
    /// user columns first.
    pub fn from_columns(
        user_sparse: &[&str],
        item_sparse: &[&str],
        user_dense: &[&str],
        item_dense: &[&str],
        multi_sparse: &[&[&str]],
    ) -> Result<Self> {
        let mut mapping = ColumnMapping::default();
        for (pos, &col) in user_sparse.iter().chain(item_sparse).enumerate() {
            mapping.sparse_col.insert(col.to_string(), pos);
            if pos < user_sparse.len() {
                mapping.user_sparse_col.insert(col.to_string(), pos);
            } else {
                mapping.item_sparse_col.insert(col.to_string(), pos);
            }
        }
        for (pos, &col) in user_dense.iter().chain(item_dense).enumerate() {
            mapping.dense_col.insert(col.to_string(), pos);
            if pos < user_dense.len() {
                mapping.user_dense_col.insert(col.to_string(), pos);
            } else {
                mapping.item_dense_col.insert(col.to_string(), pos);
            }
        }
        for field in multi_sparse {
            if let Some((main, rest)) = field.split_first() {
                for &col in rest {
                    mapping.multi_sparse.insert(col.to_string(), main.to_string());
                }
            }
        }
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn validate(&self) -> Result<()> {
        check_positions("sparse_col", &self.sparse_col)?;
        check_positions("dense_col", &self.dense_col)?;
        check_subset("user_sparse_col", "sparse_col", &self.user_sparse_col, &self.sparse_col)?;
        check_subset("item_sparse_col", "sparse_col", &self.item_sparse_col, &self.sparse_col)?;
        check_subset("user_dense_col", "dense_col", &self.user_dense_col, &self.dense_col)?;
        check_subset("item_dense_col", "dense_col", &self.item_dense_col, &self.dense_col)?;

        for col in self.user_sparse_col.keys() {
            if self.item_sparse_col.contains_key(col) {
                return Err(RecError::Schema(format!(
                    "column `{col}` belongs to both user and item sparse features"
                )));
            }
        }
        for col in self.user_dense_col.keys() {
            if self.item_dense_col.contains_key(col) {
                return Err(RecError::Schema(format!(
                    "column `{col}` belongs to both user and item dense features"
                )));
            }
        }

        for (col, main) in &self.multi_sparse {
            if !self.sparse_col.contains_key(col) || !self.sparse_col.contains_key(main) {
                return Err(RecError::Schema(format!(
                    "multi-sparse column `{col}` or its field `{main}` missing from `sparse_col`"
                )));
            }
            if self.multi_sparse.contains_key(main) {
                return Err(RecError::Schema(format!(
                    "multi-sparse field `{main}` can't itself be a constituent column"
                )));
            }
            let same_owner = (self.user_sparse_col.contains_key(col)
                && self.user_sparse_col.contains_key(main))
                || (self.item_sparse_col.contains_key(col)
                    && self.item_sparse_col.contains_key(main))
                || (!self.user_sparse_col.contains_key(col)
                    && !self.item_sparse_col.contains_key(col)
                    && !self.user_sparse_col.contains_key(main)
                    && !self.item_sparse_col.contains_key(main));
            if !same_owner {
                return Err(RecError::Schema(format!(
                    "multi-sparse column `{col}` and field `{main}` belong to different entities"
                )));
            }
        }
        // columns of a field must be contiguous, main column first
        for (main, cols) in self.multi_sparse_fields() {
            let start = self.sparse_col[&main];
            for (offset, col) in cols.iter().enumerate() {
                if self.sparse_col[col] != start + offset {
                    return Err(RecError::Schema(format!(
                        "multi-sparse field `{main}` columns must be contiguous, `{col}` is not"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn family(&self, family: ColumnFamily) -> Feature {
        let map = match family {
            ColumnFamily::Sparse => &self.sparse_col,
            ColumnFamily::Dense => &self.dense_col,
            ColumnFamily::UserSparse => &self.user_sparse_col,
            ColumnFamily::UserDense => &self.user_dense_col,
            ColumnFamily::ItemSparse => &self.item_sparse_col,
            ColumnFamily::ItemDense => &self.item_dense_col,
        };
        Feature::from_map(map)
    }

    pub fn is_multi_sparse_main(&self, col: &str) -> bool {
        self.multi_sparse.values().any(|main| main == col)
    }

    /// Field name of a multi-sparse column, the column itself for a main column.
    pub fn multi_sparse_field<'a>(&'a self, col: &'a str) -> Option<&'a str> {
        if let Some(main) = self.multi_sparse.get(col) {
            Some(main.as_str())
        } else if self.is_multi_sparse_main(col) {
            Some(col)
        } else {
            None
        }
    }

    /// Multi-sparse fields ordered by position: `(main, all columns)`.
    pub fn multi_sparse_fields(&self) -> Vec<(String, Vec<String>)> {
        let mut fields: BTreeMap<usize, (String, Vec<(usize, String)>)> = BTreeMap::new();
        for (col, main) in &self.multi_sparse {
            let (Some(&main_pos), Some(&col_pos)) =
                (self.sparse_col.get(main), self.sparse_col.get(col))
            else {
                continue;
            };
            fields
                .entry(main_pos)
                .or_insert_with(|| (main.clone(), vec![(main_pos, main.clone())]))
                .1
                .push((col_pos, col.clone()));
        }
        fields
            .into_values()
            .map(|(main, mut cols)| {
                cols.sort_unstable();
                (main, cols.into_iter().map(|(_, c)| c).collect())
            })
            .collect()
    }

    pub fn has_sparse(&self) -> bool {
        !self.sparse_col.is_empty()
    }
}

/// Layout of multi-sparse fields among all sparse columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSparseInfo {
    /// Position of each field's first column.
    pub field_offset: Vec<usize>,
    /// Number of columns in each field.
    pub field_len: Vec<usize>,
    /// Shared oov index of each field.
    pub feat_oov: Vec<usize>,
}

/// `(length, oov, offset)` of every sparse column before a schema change.
/// `sparse_len` is `None` for non-main multi-sparse columns, whose embedding
/// rows are owned by the main column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldSchema {
    pub sparse_len: Vec<Option<usize>>,
    pub sparse_oov: Vec<usize>,
    pub sparse_offset: Vec<usize>,
}

impl OldSchema {
    /// Per-column shift of offsets between this snapshot and `schema`.
    pub fn diff_offsets(&self, schema: &FeatureSchema) -> Result<Vec<i64>> {
        let new_offset = schema.sparse_offset();
        if new_offset.len() != self.sparse_offset.len() {
            return Err(RecError::Schema(format!(
                "sparse column count changed from {} to {}",
                self.sparse_offset.len(),
                new_offset.len()
            )));
        }
        Ok(new_offset
            .iter()
            .zip(&self.sparse_offset)
            .map(|(&new, &old)| new as i64 - old as i64)
            .collect())
    }

    /// Maps an embedding index stored under this snapshot for column `pos`
    /// to its index under `schema`.
    pub fn rebase(&self, schema: &FeatureSchema, pos: usize, value: usize) -> Result<usize> {
        let old_oov = self.sparse_oov.get(pos).copied();
        let old_offset = self.sparse_offset.get(pos).copied();
        let (Some(old_oov), Some(old_offset)) = (old_oov, old_offset) else {
            return Err(RecError::Schema(format!(
                "sparse column {pos} missing from the old schema"
            )));
        };
        if value == old_oov {
            return schema.oov(pos);
        }
        if value < old_offset || value > old_oov {
            return Err(RecError::Schema(format!(
                "sparse index {value} out of the old range [{old_offset}, {old_oov}] \
                 of column {pos}"
            )));
        }
        Ok(schema.offset(pos)? + (value - old_offset))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureSchema {
    mapping: ColumnMapping,
    sparse_names: Vec<String>,
    sparse_unique_vals: BTreeMap<String, Vocabulary>,
    multi_sparse_unique_vals: BTreeMap<String, Vocabulary>,
    sparse_offset: Vec<usize>,
    sparse_oov: Vec<usize>,
    multi_sparse_combine_info: Option<MultiSparseInfo>,
}

impl FeatureSchema {
    /// `sparse_unique_vals` holds the categories of plain sparse columns,
    /// `multi_sparse_unique_vals` those of multi-sparse fields keyed by the
    /// main column.
    pub fn new(
        mapping: ColumnMapping,
        sparse_unique_vals: BTreeMap<String, Vec<ExternalId>>,
        multi_sparse_unique_vals: BTreeMap<String, Vec<ExternalId>>,
    ) -> Result<Self> {
        mapping.validate()?;
        let sparse_names = mapping.family(ColumnFamily::Sparse).name;
        for col in &sparse_names {
            let known = match mapping.multi_sparse_field(col) {
                Some(field) => multi_sparse_unique_vals.contains_key(field),
                None => sparse_unique_vals.contains_key(col),
            };
            if !known {
                return Err(RecError::Schema(format!(
                    "no category values for sparse column `{col}`"
                )));
            }
        }
        for col in sparse_unique_vals.keys() {
            if !mapping.sparse_col.contains_key(col) || mapping.multi_sparse_field(col).is_some() {
                return Err(RecError::Schema(format!(
                    "category values given for `{col}`, which is not a plain sparse column"
                )));
            }
        }
        for col in multi_sparse_unique_vals.keys() {
            if !mapping.is_multi_sparse_main(col) {
                return Err(RecError::Schema(format!(
                    "category values given for `{col}`, which is not a multi-sparse field"
                )));
            }
        }

        let to_vocab = |vals: BTreeMap<String, Vec<ExternalId>>| -> BTreeMap<String, Vocabulary> {
            vals.into_iter().map(|(k, v)| (k, Vocabulary::from(v))).collect()
        };
        let mut schema = FeatureSchema {
            mapping,
            sparse_names,
            sparse_unique_vals: to_vocab(sparse_unique_vals),
            multi_sparse_unique_vals: to_vocab(multi_sparse_unique_vals),
            ..Default::default()
        };
        schema.recompute_offsets();
        Ok(schema)
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn sparse_offset(&self) -> &[usize] {
        &self.sparse_offset
    }

    pub fn sparse_oov(&self) -> &[usize] {
        &self.sparse_oov
    }

    pub fn multi_sparse_combine_info(&self) -> Option<&MultiSparseInfo> {
        self.multi_sparse_combine_info.as_ref()
    }

    pub fn sparse_unique_vals(&self) -> &BTreeMap<String, Vocabulary> {
        &self.sparse_unique_vals
    }

    pub fn multi_sparse_unique_vals(&self) -> &BTreeMap<String, Vocabulary> {
        &self.multi_sparse_unique_vals
    }

    /// Number of rows an embedding table over every sparse column needs.
    pub fn n_sparse_indices(&self) -> usize {
        self.sparse_oov
            .iter()
            .max()
            .map_or(0, |&oov| oov + 1)
    }

    pub fn offset(&self, pos: usize) -> Result<usize> {
        self.sparse_offset
            .get(pos)
            .copied()
            .ok_or_else(|| RecError::Schema(format!("no sparse column at position {pos}")))
    }

    pub fn oov(&self, pos: usize) -> Result<usize> {
        self.sparse_oov
            .get(pos)
            .copied()
            .ok_or_else(|| RecError::Schema(format!("no sparse column at position {pos}")))
    }

    /// Category dictionary used by the column at `pos`.
    pub fn vocabulary(&self, pos: usize) -> Result<&Vocabulary> {
        let col = self
            .sparse_names
            .get(pos)
            .ok_or_else(|| RecError::Schema(format!("no sparse column at position {pos}")))?;
        let vocab = match self.mapping.multi_sparse_field(col) {
            Some(field) => self.multi_sparse_unique_vals.get(field),
            None => self.sparse_unique_vals.get(col),
        };
        vocab.ok_or_else(|| RecError::Schema(format!("no category values for `{col}`")))
    }

    /// Embedding index of `value` in the column at `pos`, oov when unseen.
    pub fn sparse_index(&self, pos: usize, value: &ExternalId) -> Result<usize> {
        match self.vocabulary(pos)?.get(value) {
            Some(idx) => Ok(self.offset(pos)? + idx as usize),
            None => self.oov(pos),
        }
    }

    /// Learns unseen categories of column `col`, returns how many were added.
    /// Constituent columns of a multi-sparse field extend the field's dictionary.
    pub fn expand_categories(&mut self, col: &str, values: &[ExternalId]) -> Result<usize> {
        let vocab = match self.mapping.multi_sparse_field(col) {
            Some(field) => self.multi_sparse_unique_vals.get_mut(field),
            None => self.sparse_unique_vals.get_mut(col),
        };
        let vocab = vocab.ok_or_else(|| {
            RecError::Schema(format!("`{col}` is not a sparse column of the schema"))
        })?;
        Ok(vocab.expand(values).len())
    }

    /// Lays out every sparse column in column order. Non-main multi-sparse
    /// columns get the offset and oov of their field.
    pub fn recompute_offsets(&mut self) {
        let n = self.sparse_names.len();
        let mut offsets = vec![0; n];
        let mut oovs = vec![0; n];
        let mut cursor = 0;
        let mut shared = Vec::new();
        for (pos, col) in self.sparse_names.iter().enumerate() {
            if let Some(main) = self.mapping.multi_sparse.get(col) {
                shared.push((pos, self.mapping.sparse_col[main]));
                continue;
            }
            let n_categories = if self.mapping.is_multi_sparse_main(col) {
                self.multi_sparse_unique_vals.get(col).map_or(0, Vocabulary::len)
            } else {
                self.sparse_unique_vals.get(col).map_or(0, Vocabulary::len)
            };
            offsets[pos] = cursor;
            oovs[pos] = cursor + n_categories;
            cursor += n_categories + 1;
        }
        for (pos, main_pos) in shared {
            offsets[pos] = offsets[main_pos];
            oovs[pos] = oovs[main_pos];
        }

        let fields = self.mapping.multi_sparse_fields();
        self.multi_sparse_combine_info = (!fields.is_empty()).then(|| {
            let mut info = MultiSparseInfo::default();
            for (main, cols) in &fields {
                let main_pos = self.mapping.sparse_col[main];
                info.field_offset.push(main_pos);
                info.field_len.push(cols.len());
                info.feat_oov.push(oovs[main_pos]);
            }
            info
        });
        self.sparse_offset = offsets;
        self.sparse_oov = oovs;
    }

    pub fn snapshot(&self) -> OldSchema {
        let sparse_len = self
            .sparse_names
            .iter()
            .enumerate()
            .map(|(pos, col)| {
                if self.mapping.multi_sparse.contains_key(col) {
                    None
                } else {
                    self.vocabulary(pos).ok().map(Vocabulary::len)
                }
            })
            .collect();
        OldSchema {
            sparse_len,
            sparse_oov: self.sparse_oov.clone(),
            sparse_offset: self.sparse_offset.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals(values: &[&str]) -> Vec<ExternalId> {
        values.iter().map(|&v| ExternalId::from(v)).collect()
    }

    // user: sex, occupation; item: genre1, genre2, genre3 (multi-sparse), studio
    fn build_schema() -> Result<FeatureSchema> {
        let mapping = ColumnMapping::from_columns(
            &["sex", "occupation"],
            &["genre1", "genre2", "genre3", "studio"],
            &["age"],
            &["price"],
            &[&["genre1", "genre2", "genre3"]],
        )?;
        let mut sparse = BTreeMap::new();
        sparse.insert("sex".to_string(), vals(&["F", "M"]));
        sparse.insert("occupation".to_string(), vals(&["a", "b", "c"]));
        sparse.insert("studio".to_string(), vals(&["x"]));
        let mut multi = BTreeMap::new();
        multi.insert("genre1".to_string(), vals(&["drama", "comedy", "action", "crime"]));
        FeatureSchema::new(mapping, sparse, multi)
    }

    #[test]
    fn test_offsets_and_oov() -> Result<()> {
        let schema = build_schema()?;
        // sex: [0, 1] oov 2 | occupation: [3..5] oov 6
        // genre: [7..10] oov 11 | studio: [12] oov 13
        assert_eq!(schema.sparse_offset(), &[0, 3, 7, 7, 7, 12]);
        assert_eq!(schema.sparse_oov(), &[2, 6, 11, 11, 11, 13]);
        assert_eq!(schema.n_sparse_indices(), 14);

        let info = schema.multi_sparse_combine_info().unwrap();
        assert_eq!(info.field_offset, vec![2]);
        assert_eq!(info.field_len, vec![3]);
        assert_eq!(info.feat_oov, vec![11]);

        assert_eq!(schema.sparse_index(1, &"c".into())?, 5);
        assert_eq!(schema.sparse_index(3, &"comedy".into())?, 8);
        assert_eq!(schema.sparse_index(4, &"unknown".into())?, 11);
        Ok(())
    }

    #[test]
    fn test_family_views() -> Result<()> {
        let schema = build_schema()?;
        let item_sparse = schema.mapping().family(ColumnFamily::ItemSparse);
        assert_eq!(item_sparse.name, vec!["genre1", "genre2", "genre3", "studio"]);
        assert_eq!(item_sparse.index, vec![2, 3, 4, 5]);
        let user_dense = schema.mapping().family(ColumnFamily::UserDense);
        assert_eq!(user_dense.name, vec!["age"]);
        assert_eq!(schema.mapping().family(ColumnFamily::ItemDense).index, vec![1]);
        Ok(())
    }

    #[test]
    fn test_expand_and_rebase() -> Result<()> {
        let mut schema = build_schema()?;
        let old = schema.snapshot();
        assert_eq!(old.sparse_len, vec![Some(2), Some(3), Some(4), None, None, Some(1)]);

        assert_eq!(schema.expand_categories("occupation", &vals(&["b", "d", "e"]))?, 2);
        assert_eq!(schema.expand_categories("genre3", &vals(&["horror"]))?, 1);
        assert_eq!(schema.expand_categories("sex", &vals(&["F"]))?, 0);
        schema.recompute_offsets();

        assert_eq!(schema.sparse_offset(), &[0, 3, 9, 9, 9, 15]);
        assert_eq!(schema.sparse_oov(), &[2, 8, 14, 14, 14, 16]);
        assert_eq!(old.diff_offsets(&schema)?, vec![0, 0, 2, 2, 2, 3]);

        // sex is untouched, "c" keeps its slot, old oov maps to new oov
        assert_eq!(old.rebase(&schema, 0, 1)?, 1);
        assert_eq!(old.rebase(&schema, 1, 5)?, 5);
        assert_eq!(old.rebase(&schema, 1, 6)?, 8);
        assert_eq!(old.rebase(&schema, 2, 8)?, 10);
        assert_eq!(old.rebase(&schema, 4, 11)?, 14);
        assert_eq!(old.rebase(&schema, 5, 12)?, 15);
        assert!(old.rebase(&schema, 5, 3).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_mappings() {
        let mut mapping = ColumnMapping::default();
        mapping.sparse_col.insert("a".to_string(), 0);
        mapping.sparse_col.insert("b".to_string(), 2);
        assert!(matches!(mapping.validate(), Err(RecError::Schema(_))));

        let mut mapping = ColumnMapping::default();
        mapping.sparse_col.insert("a".to_string(), 0);
        mapping.user_sparse_col.insert("a".to_string(), 1);
        assert!(mapping.validate().is_err());

        let res = ColumnMapping::from_columns(&["g1", "x", "g2"], &[], &[], &[], &[&["g1", "g2"]]);
        assert!(res.is_err());

        let res = ColumnMapping::from_columns(&["g1"], &["g2"], &[], &[], &[&["g1", "g2"]]);
        assert!(res.is_err());
    }

    #[test]
    fn test_missing_categories() -> Result<()> {
        let mapping = ColumnMapping::from_columns(&["sex"], &["studio"], &[], &[], &[])?;
        let mut sparse = BTreeMap::new();
        sparse.insert("sex".to_string(), vals(&["F"]));
        let res = FeatureSchema::new(mapping, sparse, BTreeMap::new());
        assert!(matches!(res, Err(RecError::Schema(_))));
        Ok(())
    }

    #[test]
    fn test_mapping_json() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let schema = build_schema()?;
        let json = serde_json::to_string(schema.mapping())?;
        let mapping: ColumnMapping = serde_json::from_str(&json)?;
        assert_eq!(&mapping, schema.mapping());
        Ok(())
    }
}
