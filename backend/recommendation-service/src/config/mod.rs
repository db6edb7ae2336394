use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub recommendation: RecommendationConfig,
    pub model_store: ModelStoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationConfig {
    /// Max similar users considered per user-based request.
    pub neighbor_limit: usize,
    /// Max seed wines considered per item-based request.
    pub seed_limit: usize,
    /// Ratings at or above this feed the item-based seed set.
    pub seed_rating_floor: f64,
    /// Neighbors/items below this similarity are discarded.
    pub min_similarity: f64,
    /// Users with fewer ratings than this take the popularity path. Kept at 1
    /// so only an empty history is treated as cold; sparse histories run the
    /// normal pipeline and degrade naturally.
    pub cold_start_threshold: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelStoreConfig {
    /// Directory holding one `{name}-{version}.json` document per artifact.
    pub model_dir: PathBuf,
    pub validate_checksum: bool,
    pub auto_migrate: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Config {
            recommendation: RecommendationConfig {
                neighbor_limit: env::var("RECOMMENDATION_NEIGHBOR_LIMIT")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("RECOMMENDATION_NEIGHBOR_LIMIT must be a valid usize"),
                seed_limit: env::var("RECOMMENDATION_SEED_LIMIT")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("RECOMMENDATION_SEED_LIMIT must be a valid usize"),
                seed_rating_floor: env::var("RECOMMENDATION_SEED_RATING_FLOOR")
                    .unwrap_or_else(|_| "3.5".to_string())
                    .parse()
                    .expect("RECOMMENDATION_SEED_RATING_FLOOR must be a valid f64"),
                min_similarity: env::var("RECOMMENDATION_MIN_SIMILARITY")
                    .unwrap_or_else(|_| "0.1".to_string())
                    .parse()
                    .expect("RECOMMENDATION_MIN_SIMILARITY must be a valid f64"),
                cold_start_threshold: env::var("RECOMMENDATION_COLD_START_THRESHOLD")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .expect("RECOMMENDATION_COLD_START_THRESHOLD must be a valid usize"),
            },
            model_store: ModelStoreConfig {
                model_dir: env::var("MODEL_DIR")
                    .unwrap_or_else(|_| "./models".to_string())
                    .into(),
                validate_checksum: env::var("MODEL_VALIDATE_CHECKSUM")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("MODEL_VALIDATE_CHECKSUM must be true or false"),
                auto_migrate: env::var("MODEL_AUTO_MIGRATE")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("MODEL_AUTO_MIGRATE must be true or false"),
            },
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            neighbor_limit: 20,
            seed_limit: 5,
            seed_rating_floor: 3.5,
            min_similarity: 0.1,
            cold_start_threshold: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_recommendation_config() {
        let config = RecommendationConfig::default();
        assert_eq!(config.cold_start_threshold, 1);
        assert!(config.min_similarity > 0.0);
    }
}
