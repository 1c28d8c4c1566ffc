use std::path::Path;

use fxhash::FxHashMap;

use crate::cf_base::{CfBase, CfConfig, CfModel, CfType};
use crate::data_info::DataInfo;
use crate::error::Result;
use crate::utils::{InnerId, Task};

pub struct UserCF {
    base: CfBase,
}

impl UserCF {
    pub fn new(task: Task, data_info: DataInfo, config: CfConfig) -> Result<Self> {
        let base = CfBase::new(task, CfType::UserCf, data_info, config)?;
        Ok(Self { base })
    }

    pub fn load(path: impl AsRef<Path>, model_name: &str, data_info: DataInfo) -> Result<Self> {
        let base = CfBase::load(path, model_name, data_info, CfType::UserCf)?;
        Ok(Self { base })
    }
}

impl CfModel for UserCF {
    fn base(&self) -> &CfBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CfBase {
        &mut self.base
    }

    /// Items consumed by the most similar users, weighted by similarity and label.
    fn recommend_one(
        &self,
        user: InnerId,
        n_rec: usize,
        filter_consumed: bool,
        random_rec: bool,
    ) -> Vec<InnerId> {
        let user_interaction = self.base.user_interaction();
        let mut item_scores: FxHashMap<InnerId, f32> = FxHashMap::default();
        for nb in self.base.engine().neighbors(user).iter() {
            let (items, labels) = user_interaction.row(nb.id as usize);
            for (&i, &label) in items.iter().zip(labels) {
                *item_scores.entry(i).or_insert(0.0) += nb.sim * label;
            }
        }
        self.base
            .rank_recommendations(user, item_scores, n_rec, filter_consumed, random_rec)
    }
}
