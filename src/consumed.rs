use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::utils::InnerId;

/// Items consumed by every user and users who consumed every item, in the
/// order the interactions were seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionIndex {
    user_consumed: FxHashMap<InnerId, Vec<InnerId>>,
    item_consumed: FxHashMap<InnerId, Vec<InnerId>>,
}

impl ConsumptionIndex {
    /// Single pass over the interactions, duplicates are kept.
    pub fn build(user_indices: &[InnerId], item_indices: &[InnerId]) -> Result<Self> {
        if user_indices.len() != item_indices.len() {
            return Err(RecError::InvalidArgument(format!(
                "{} user indices but {} item indices",
                user_indices.len(),
                item_indices.len()
            )));
        }
        let mut user_consumed: FxHashMap<InnerId, Vec<InnerId>> = FxHashMap::default();
        let mut item_consumed: FxHashMap<InnerId, Vec<InnerId>> = FxHashMap::default();

        for (&u, &i) in user_indices.iter().zip(item_indices.iter()) {
            user_consumed.entry(u).or_default().push(i);
            item_consumed.entry(i).or_default().push(u);
        }

        Ok(Self {
            user_consumed,
            item_consumed,
        })
    }

    /// Rebuilds from the old interactions followed by the new ones.
    pub fn merge_and_rebuild(
        old_user_indices: &[InnerId],
        old_item_indices: &[InnerId],
        new_user_indices: &[InnerId],
        new_item_indices: &[InnerId],
    ) -> Result<Self> {
        let users: Vec<InnerId> = old_user_indices
            .iter()
            .chain(new_user_indices)
            .copied()
            .collect();
        let items: Vec<InnerId> = old_item_indices
            .iter()
            .chain(new_item_indices)
            .copied()
            .collect();
        Self::build(&users, &items)
    }

    /// Removes consecutive duplicates, non-consecutive ones are preserved.
    /// Example: [10, 10, 20, 10, 30, 30] -> [10, 20, 10, 30]
    pub fn dedup_consecutive(&mut self) {
        self.user_consumed.values_mut().for_each(|v| v.dedup());
        self.item_consumed.values_mut().for_each(|v| v.dedup());
    }

    pub fn user_consumed(&self) -> &FxHashMap<InnerId, Vec<InnerId>> {
        &self.user_consumed
    }

    pub fn item_consumed(&self) -> &FxHashMap<InnerId, Vec<InnerId>> {
        &self.item_consumed
    }

    pub fn items_of(&self, user: InnerId) -> &[InnerId] {
        self.user_consumed.get(&user).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn users_of(&self, item: InnerId) -> &[InnerId] {
        self.item_consumed.get(&item).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn into_parts(
        self,
    ) -> (
        FxHashMap<InnerId, Vec<InnerId>>,
        FxHashMap<InnerId, Vec<InnerId>>,
    ) {
        (self.user_consumed, self.item_consumed)
    }
}

/// Get consumed item set for a user if filtering is enabled
pub(crate) fn get_consumed_set(
    consumption: &ConsumptionIndex,
    u: InnerId,
    filter_consumed: bool,
) -> Option<FxHashSet<InnerId>> {
    filter_consumed
        .then(|| {
            consumption
                .user_consumed
                .get(&u)
                .map(|v| v.iter().copied().collect())
        })
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_keeps_order_and_duplicates() -> Result<()> {
        let users = [0, 1, 0, 0, 2];
        let items = [3, 3, 1, 3, 0];
        let index = ConsumptionIndex::build(&users, &items)?;
        assert_eq!(index.items_of(0), &[3, 1, 3]);
        assert_eq!(index.items_of(1), &[3]);
        assert_eq!(index.users_of(3), &[0, 1, 0]);
        assert_eq!(index.users_of(2), &[] as &[InnerId]);
        assert_eq!(index.user_consumed().len(), 3);
        Ok(())
    }

    #[test]
    fn test_merge_and_rebuild() -> Result<()> {
        let merged = ConsumptionIndex::merge_and_rebuild(&[0, 1], &[0, 0], &[1, 2], &[1, 0])?;
        let expected = ConsumptionIndex::build(&[0, 1, 1, 2], &[0, 0, 1, 0])?;
        assert_eq!(merged, expected);
        assert_eq!(merged.users_of(0), &[0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_dedup_consecutive() -> Result<()> {
        let mut index = ConsumptionIndex::build(&[5, 5, 5, 5, 5, 5], &[10, 10, 20, 10, 30, 30])?;
        index.dedup_consecutive();
        assert_eq!(index.items_of(5), &[10, 20, 10, 30]);
        Ok(())
    }

    #[test]
    fn test_consumed_set() -> Result<()> {
        let index = ConsumptionIndex::build(&[0, 0], &[4, 2])?;
        let set = get_consumed_set(&index, 0, true).unwrap();
        assert!(set.contains(&4) && set.contains(&2));
        assert!(get_consumed_set(&index, 0, false).is_none());
        assert!(get_consumed_set(&index, 9, true).is_none());
        Ok(())
    }

    #[test]
    fn test_length_mismatch() {
        assert!(ConsumptionIndex::build(&[0, 1], &[0]).is_err());
    }
}
