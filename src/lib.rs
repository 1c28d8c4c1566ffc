//! Data indexing and neighborhood collaborative filtering for recommender
//! systems.
//!
//! [`DataInfo`] turns raw interaction frames into dense inner ids, feature
//! vocabularies and consumption lists, and keeps them consistent across
//! incremental updates. [`UserCF`] and [`ItemCF`] are trained on top of it.

mod cf_base;
mod consumed;
mod data;
mod data_info;
mod error;
mod features;
mod id_index;
mod inference;
mod item_cf;
#[cfg(feature = "python")]
mod python;
mod schema;
mod serialization;
mod similarities;
mod sparse;
mod user_cf;
mod utils;

pub use cf_base::{
    CfBase, CfConfig, CfModel, CfType, ColdStart, SimilarityEngine, SimilarityState,
};
pub use consumed::ConsumptionIndex;
pub use data::{EntityFeatures, FeatureColumns, InteractionData};
pub use data_info::{DataInfo, LabelStats, OldInfo};
pub use error::{RecError, Result};
pub use features::{FeatureMatrix, FeatureRow};
pub use id_index::{EntityIndex, EntityKind, ExternalId, IdentifierIndex};
pub use item_cf::ItemCF;
pub use schema::{
    ColumnFamily, ColumnMapping, Feature, FeatureSchema, MultiSparseInfo, OldSchema, Vocabulary,
};
pub use similarities::{compute_similarity, compute_top_k, SimMode, SimType};
pub use sparse::CsrMatrix;
pub use user_cf::UserCF;
pub use utils::{InnerId, Neighbor, Task};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
