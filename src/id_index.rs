use std::fmt;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::utils::InnerId;

/// Identifier supplied by the caller for a user, an item or a sparse category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExternalId {
    Int(i64),
    Str(String),
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Int(v) => write!(f, "{v}"),
            ExternalId::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ExternalId {
    fn from(v: i64) -> Self {
        ExternalId::Int(v)
    }
}

impl From<i32> for ExternalId {
    fn from(v: i32) -> Self {
        ExternalId::Int(i64::from(v))
    }
}

impl From<u32> for ExternalId {
    fn from(v: u32) -> Self {
        ExternalId::Int(i64::from(v))
    }
}

impl From<&str> for ExternalId {
    fn from(v: &str) -> Self {
        ExternalId::Str(v.to_string())
    }
}

impl From<String> for ExternalId {
    fn from(v: String) -> Self {
        ExternalId::Str(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Item,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Item => "item",
        }
    }
}

/// Append-only arena of external ids, position == inner id.
///
/// The reverse lookup is rebuilt on deserialization and updated on every
/// append, so it can never drift from `unique_vals`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ExternalId>", into = "Vec<ExternalId>")]
pub struct EntityIndex {
    unique_vals: Vec<ExternalId>,
    lookup: FxHashMap<ExternalId, InnerId>,
}

impl From<Vec<ExternalId>> for EntityIndex {
    fn from(values: Vec<ExternalId>) -> Self {
        let mut index = EntityIndex::default();
        index.expand(values.iter());
        index
    }
}

impl From<EntityIndex> for Vec<ExternalId> {
    fn from(index: EntityIndex) -> Self {
        index.unique_vals
    }
}

impl EntityIndex {
    #[inline]
    pub fn len(&self) -> usize {
        self.unique_vals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.unique_vals.is_empty()
    }

    /// Inner id used for any value that isn't in the index.
    #[inline]
    pub fn oov(&self) -> InnerId {
        self.unique_vals.len() as InnerId
    }

    pub fn unique_vals(&self) -> &[ExternalId] {
        &self.unique_vals
    }

    /// External id to inner id mapping.
    pub fn mapping(&self) -> &FxHashMap<ExternalId, InnerId> {
        &self.lookup
    }

    #[inline]
    pub fn get(&self, id: &ExternalId) -> Option<InnerId> {
        self.lookup.get(id).copied()
    }

    #[inline]
    pub fn contains(&self, id: &ExternalId) -> bool {
        self.lookup.contains_key(id)
    }

    #[inline]
    pub fn external(&self, inner: InnerId) -> Option<&ExternalId> {
        self.unique_vals.get(inner as usize)
    }

    #[inline]
    pub fn get_or_oov(&self, id: &ExternalId) -> InnerId {
        self.get(id).unwrap_or_else(|| self.oov())
    }

    fn push(&mut self, id: &ExternalId) -> InnerId {
        if let Some(inner) = self.get(id) {
            return inner;
        }
        let inner = self.oov();
        self.unique_vals.push(id.clone());
        self.lookup.insert(id.clone(), inner);
        inner
    }

    /// Inner ids for `values`, learning the unseen ones.
    pub fn assign<'a, I>(&mut self, values: I) -> Vec<InnerId>
    where
        I: IntoIterator<Item = &'a ExternalId>,
    {
        values.into_iter().map(|v| self.push(v)).collect()
    }

    /// Appends the values not known yet, in the order encountered, and
    /// returns them.
    pub fn expand<'a, I>(&mut self, values: I) -> Vec<ExternalId>
    where
        I: IntoIterator<Item = &'a ExternalId>,
    {
        let mut added = Vec::new();
        for v in values {
            if !self.contains(v) {
                self.push(v);
                added.push(v.clone());
            }
        }
        added
    }
}

/// User and item id mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifierIndex {
    users: EntityIndex,
    items: EntityIndex,
}

impl IdentifierIndex {
    pub fn new(user_unique_vals: Vec<ExternalId>, item_unique_vals: Vec<ExternalId>) -> Self {
        Self {
            users: EntityIndex::from(user_unique_vals),
            items: EntityIndex::from(item_unique_vals),
        }
    }

    #[inline]
    pub fn entity(&self, kind: EntityKind) -> &EntityIndex {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Item => &self.items,
        }
    }

    #[inline]
    fn entity_mut(&mut self, kind: EntityKind) -> &mut EntityIndex {
        match kind {
            EntityKind::User => &mut self.users,
            EntityKind::Item => &mut self.items,
        }
    }

    pub fn users(&self) -> &EntityIndex {
        &self.users
    }

    pub fn items(&self) -> &EntityIndex {
        &self.items
    }

    pub fn n_users(&self) -> usize {
        self.users.len()
    }

    pub fn n_items(&self) -> usize {
        self.items.len()
    }

    pub fn assign<'a, I>(&mut self, values: I, kind: EntityKind) -> Vec<InnerId>
    where
        I: IntoIterator<Item = &'a ExternalId>,
    {
        self.entity_mut(kind).assign(values)
    }

    /// Learns novel users and items, returns how many of each were added.
    pub fn expand(&mut self, users: &[ExternalId], items: &[ExternalId]) -> (usize, usize) {
        let new_users = self.users.expand(users);
        let new_items = self.items.expand(items);
        (new_users.len(), new_items.len())
    }

    pub fn inner_id(&self, id: &ExternalId, kind: EntityKind) -> Option<InnerId> {
        self.entity(kind).get(id)
    }

    pub fn inner_id_strict(&self, id: &ExternalId, kind: EntityKind) -> Result<InnerId> {
        self.inner_id(id, kind).ok_or_else(|| RecError::UnknownEntity {
            kind: kind.as_str(),
            id: id.to_string(),
        })
    }

    pub fn external_id(&self, inner: InnerId, kind: EntityKind) -> Option<&ExternalId> {
        self.entity(kind).external(inner)
    }
}
