use std::path::Path;

use fxhash::FxHashMap;

use crate::cf_base::{CfBase, CfConfig, CfModel, CfType};
use crate::data_info::DataInfo;
use crate::error::Result;
use crate::utils::{InnerId, Task};

/// Item-based collaborative filtering, similarities are computed between items.
pub struct ItemCF {
    base: CfBase,
}

impl ItemCF {
    pub fn new(task: Task, data_info: DataInfo, config: CfConfig) -> Result<Self> {
        let base = CfBase::new(task, CfType::ItemCf, data_info, config)?;
        Ok(Self { base })
    }

    pub fn load(path: impl AsRef<Path>, model_name: &str, data_info: DataInfo) -> Result<Self> {
        let base = CfBase::load(path, model_name, data_info, CfType::ItemCf)?;
        Ok(Self { base })
    }
}

impl CfModel for ItemCF {
    fn base(&self) -> &CfBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut CfBase {
        &mut self.base
    }

    /// Aggregates similarity scores from the user's interacted items to their
    /// neighbors: `score[candidate] += sim(item, candidate) * label`.
    fn recommend_one(
        &self,
        user: InnerId,
        n_rec: usize,
        filter_consumed: bool,
        random_rec: bool,
    ) -> Vec<InnerId> {
        let engine = self.base.engine();
        let (items, labels) = self.base.user_interaction().row(user as usize);
        let mut item_scores: FxHashMap<InnerId, f32> = FxHashMap::default();
        for (&i, &i_label) in items.iter().zip(labels) {
            for nb in engine.neighbors(i).iter() {
                let delta = nb.sim * i_label;
                item_scores
                    .entry(nb.id)
                    .and_modify(|score| *score += delta)
                    .or_insert(delta);
            }
        }
        self.base
            .rank_recommendations(user, item_scores, n_rec, filter_consumed, random_rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cf_base::sample_data_info;
    use crate::error::RecError;
    use crate::id_index::ExternalId;
    use crate::serialization::test_dir;
    use crate::similarities::SimMode;
    use crate::user_cf::UserCF;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn ids(values: &[i64]) -> Vec<ExternalId> {
        values.iter().map(|&v| ExternalId::from(v)).collect()
    }

    fn get_item_cf() -> Result<ItemCF> {
        let config = CfConfig::default().with_k_sim(2).with_min_common(1);
        let mut model = ItemCF::new(Task::Ranking, sample_data_info(false)?, config)?;
        model.fit()?;
        Ok(model)
    }

    #[test]
    fn test_item_cf_training() -> TestResult {
        let get_nbs = |model: &ItemCF, i: u32| -> Vec<u32> {
            model.base().engine().neighbors(i).iter().map(|n| n.id).collect()
        };
        let model = get_item_cf()?;
        assert_eq!(get_nbs(&model, 0), vec![1, 2]);
        assert_eq!(get_nbs(&model, 1), vec![0, 2]);
        // equal similarity to items 1 and 3
        assert_eq!(get_nbs(&model, 2), vec![1, 3]);
        assert_eq!(get_nbs(&model, 3), vec![4, 2]);
        assert_eq!(get_nbs(&model, 4), vec![3, 2]);
        // items 0 and 3, 0 and 4, 1 and 4 share no user
        assert_eq!(model.num_sim_elements(), 14);
        Ok(())
    }

    #[test]
    fn test_recommend_known_users() -> TestResult {
        let model = get_item_cf()?;
        let recs = model.recommend_user(&ids(&[1, 2, 3]), 3, "popular", true, false)?;
        assert_eq!(recs[&ExternalId::Int(1)], ids(&[30]));
        assert_eq!(recs[&ExternalId::Int(2)], ids(&[40]));
        assert_eq!(recs[&ExternalId::Int(3)], ids(&[10, 50]));

        let data_info = model.base().data_info();
        for (user, items) in &recs {
            assert!(items.len() <= 3);
            let u = data_info.user_inner_id_strict(user)?;
            let consumed = data_info.consumption().items_of(u);
            for item in items {
                let i = data_info.item_inner_id_strict(item)?;
                assert!(!consumed.contains(&i));
            }
        }

        // consumed items come back once filtering is off, best score first
        let recs = model.recommend_user(&ids(&[1]), 2, "popular", false, false)?;
        assert_eq!(recs[&ExternalId::Int(1)], ids(&[30, 10]));
        Ok(())
    }

    #[test]
    fn test_random_rec() -> TestResult {
        let model = get_item_cf()?;
        let first = model.recommend_one(2, 1, false, true);
        let second = model.recommend_one(2, 1, false, true);
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_cold_start() -> TestResult {
        let model = get_item_cf()?;
        let recs = model.recommend_user(&ids(&[-99999, -1]), 3, "popular", true, false)?;
        assert_eq!(recs[&ExternalId::Int(-99999)], recs[&ExternalId::Int(-1)]);
        // popular: items 20, 30 and 40 have three users each
        assert_eq!(recs[&ExternalId::Int(-1)], ids(&[20, 30, 40]));

        let res = model.recommend_user(&ids(&[-1]), 3, "average", true, false);
        assert!(matches!(res, Err(RecError::UnsupportedStrategy(_))));
        let res = model.predict(&ids(&[1]), &ids(&[10]), "average");
        assert!(matches!(res, Err(RecError::UnsupportedStrategy(_))));
        Ok(())
    }

    #[test]
    fn test_predict() -> TestResult {
        let model = get_item_cf()?;
        let preds = model.predict(&ids(&[1, 1, 1, -1]), &ids(&[30, 50, 999, 10]), "popular")?;
        // neighbors of item 30 consumed by user 1: items 10 and 20
        let expected = (1.0 / 6.0f32.sqrt() + 2.0 / 3.0) / 2.0;
        assert!((preds[0] - expected).abs() < 1e-5);
        // no common neighbor, unknown item, unknown user
        assert_eq!(preds[1], 0.0);
        assert_eq!(preds[2], 0.0);
        assert_eq!(preds[3], 0.0);
        assert_eq!(model.base().default_pred(), 0.0);
        Ok(())
    }

    #[test]
    fn test_inference_before_fit() -> TestResult {
        let model = ItemCF::new(Task::Ranking, sample_data_info(false)?, CfConfig::default())?;
        let res = model.recommend_user(&ids(&[1]), 3, "popular", true, false);
        assert!(matches!(res, Err(RecError::UnsupportedOperation(_))));
        assert!(model.predict(&ids(&[1]), &ids(&[10]), "popular").is_err());
        Ok(())
    }

    #[test]
    fn test_forward_mode_matches() -> TestResult {
        let model = get_item_cf()?;
        let config = CfConfig::default()
            .with_k_sim(2)
            .with_mode(SimMode::Forward)
            .with_block_size(Some(2))
            .with_num_threads(2)
            .with_store_top_k(false);
        let mut forward = ItemCF::new(Task::Ranking, sample_data_info(false)?, config)?;
        forward.fit()?;
        assert_eq!(
            forward.base().engine().sim_matrix(),
            model.base().engine().sim_matrix()
        );
        let users = ids(&[1, 2, 3, 4, 5]);
        assert_eq!(
            forward.recommend_user(&users, 3, "popular", true, false)?,
            model.recommend_user(&users, 3, "popular", true, false)?
        );
        Ok(())
    }

    #[test]
    fn test_save_model() -> TestResult {
        let dir = test_dir("item_cf");
        let model = get_item_cf()?;
        model.save(&dir, "item_cf_model")?;
        for suffix in ["sim_matrix.gz", "user_inter.gz", "item_inter.gz", "hyper_parameters.json"] {
            assert!(dir.join(format!("item_cf_model_{suffix}")).exists());
        }

        let data_info = model.base().data_info().clone();
        let new_model = ItemCF::load(&dir, "item_cf_model", data_info.clone())?;
        assert_eq!(new_model.base().config(), model.base().config());
        assert!(new_model.base().engine().top_k().is_some());
        let users = ids(&[1, 3, -5]);
        assert_eq!(
            new_model.recommend_user(&users, 10, "popular", true, false)?,
            model.recommend_user(&users, 10, "popular", true, false)?
        );

        let res = UserCF::load(&dir, "item_cf_model", data_info.clone());
        assert!(matches!(res, Err(RecError::InvalidArgument(_))));
        let res = ItemCF::load(&dir, "missing_model", data_info);
        assert!(matches!(res, Err(RecError::StorageNotFound(_))));

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
