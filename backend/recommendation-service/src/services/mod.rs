pub mod model_manager;
pub mod ratings;
pub mod recommendation;
pub mod registry;
pub mod similarity;

pub use model_manager::{LoadOptions, ModelManager, ModelStoreStats};
pub use ratings::RatingStore;
pub use recommendation::RecommendationEngine;
pub use registry::ModelRegistry;
pub use similarity::SimilarityEngine;
