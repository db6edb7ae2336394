pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::model_manager::calculate_checksum;
pub use services::{
    LoadOptions, ModelManager, ModelRegistry, ModelStoreStats, RatingStore, RecommendationEngine,
    SimilarityEngine,
};
