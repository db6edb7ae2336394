use crate::config::RecommendationConfig;
use crate::error::Result;
use crate::models::{
    Algorithm, DishContext, ModelArtifact, Rating, Recommendation, RecommendOptions,
};
use crate::services::model_manager::{LoadOptions, ModelManager};
use crate::services::ratings::RatingStore;
use crate::services::similarity::SimilarityEngine;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Artifact names per algorithm family.
const USER_CF_MODEL: &str = "user-cf";
const ITEM_CF_MODEL: &str = "item-cf";
const POPULARITY_MODEL: &str = "popularity";

/// Hyperparameter keys read off loaded artifacts.
const HP_NEIGHBOR_LIMIT: &str = "neighbor_limit";
const HP_MIN_SIMILARITY: &str = "min_similarity";
const HP_SEED_LIMIT: &str = "seed_limit";
const HP_SEED_RATING_FLOOR: &str = "seed_rating_floor";
const HP_CONFIDENCE_PIVOT: &str = "confidence_pivot";

/// Hard ceiling on cold-start confidence. Popularity evidence is known to be
/// weaker than collaborative evidence, and callers rely on staying under 0.8.
const COLD_START_CONFIDENCE_CAP: f64 = 0.75;

/// Orchestrates user-based, item-based and hybrid recommendation generation
/// over the rating store, with popularity fallback for cold-start users.
///
/// All three entry points share the invariants: a returned wine is never one
/// the target user has already rated, results are ordered by predicted rating
/// descending with stable ties, and a rating-store failure propagates rather
/// than degrading to an empty list.
pub struct RecommendationEngine {
    store: Arc<dyn RatingStore>,
    similarity: SimilarityEngine,
    model_manager: Arc<ModelManager>,
    config: RecommendationConfig,
    load_options: LoadOptions,
}

/// Scored candidate accumulator shared by both CF paths.
#[derive(Debug, Default, Clone, Copy)]
struct WeightedScore {
    weighted_sum: f64,
    weight_sum: f64,
}

impl WeightedScore {
    fn add(&mut self, weight: f64, rating: f64) {
        self.weighted_sum += weight * rating;
        self.weight_sum += weight;
    }

    fn predicted(&self) -> f64 {
        self.weighted_sum / self.weight_sum
    }

    /// Evidence-monotonic confidence in [0, 1): more similarity mass behind a
    /// candidate means a higher score, with diminishing returns.
    fn confidence(&self) -> f64 {
        self.weight_sum / (self.weight_sum + 1.0)
    }
}

impl RecommendationEngine {
    pub fn new(
        store: Arc<dyn RatingStore>,
        model_manager: Arc<ModelManager>,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            similarity: SimilarityEngine::new(Arc::clone(&store)),
            store,
            model_manager,
            config,
            load_options: LoadOptions::resilient(),
        }
    }

    /// Override the serving-path load options, e.g. with
    /// `LoadOptions::from_config` when checksum validation or auto-migration
    /// is switched off in deployment config.
    pub fn with_load_options(mut self, load_options: LoadOptions) -> Self {
        self.load_options = load_options;
        self
    }

    pub fn similarity(&self) -> &SimilarityEngine {
        &self.similarity
    }

    /// Predict ratings from the wines that users similar to the target rated.
    pub async fn get_user_based_recommendations(
        &self,
        user_id: &str,
        dish_context: &DishContext,
        options: &RecommendOptions,
    ) -> Result<Vec<Recommendation>> {
        let history = self.store.ratings_for_user(user_id).await?;
        if self.is_cold_start(&history) {
            return self.popularity_recommendations(user_id, &history, options).await;
        }

        let model = self.load_family_model(USER_CF_MODEL).await?;
        let neighbor_limit =
            model.hyperparameter(HP_NEIGHBOR_LIMIT, self.config.neighbor_limit as f64) as usize;
        let min_similarity = model.hyperparameter(HP_MIN_SIMILARITY, self.config.min_similarity);

        let rated: HashSet<i64> = history.iter().map(|r| r.wine_id).collect();
        let pool = self.co_rater_pool(user_id, &history).await?;
        let neighbors = self
            .similarity
            .find_similar_users(user_id, &history, &pool)
            .await?;

        let mut scores: HashMap<i64, WeightedScore> = HashMap::new();
        let mut order: Vec<i64> = Vec::new();
        let mut used_neighbors = 0usize;
        for neighbor in &neighbors {
            if neighbor.similarity < min_similarity {
                break; // descending order, nothing below passes either
            }
            if used_neighbors >= neighbor_limit {
                break;
            }
            used_neighbors += 1;

            let neighbor_ratings = self.store.ratings_for_user(&neighbor.user_id).await?;
            for r in neighbor_ratings {
                if rated.contains(&r.wine_id) {
                    continue;
                }
                if !scores.contains_key(&r.wine_id) {
                    order.push(r.wine_id);
                }
                scores
                    .entry(r.wine_id)
                    .or_default()
                    .add(neighbor.similarity, r.rating);
            }
        }

        info!(
            user_id,
            algorithm = Algorithm::UserBasedCf.as_str(),
            dish = dish_context.dish_name.as_deref().unwrap_or("-"),
            neighbors = used_neighbors,
            candidates = order.len(),
            "user-based recommendations computed"
        );

        Ok(finalize(scores, order, Algorithm::UserBasedCf, options.limit))
    }

    /// Predict ratings from wines similar to the target user's favorites.
    pub async fn get_item_based_recommendations(
        &self,
        user_id: &str,
        dish_context: &DishContext,
        options: &RecommendOptions,
    ) -> Result<Vec<Recommendation>> {
        let history = self.store.ratings_for_user(user_id).await?;
        if self.is_cold_start(&history) {
            return self.popularity_recommendations(user_id, &history, options).await;
        }

        let model = self.load_family_model(ITEM_CF_MODEL).await?;
        let seed_limit = model.hyperparameter(HP_SEED_LIMIT, self.config.seed_limit as f64) as usize;
        let seed_rating_floor =
            model.hyperparameter(HP_SEED_RATING_FLOOR, self.config.seed_rating_floor);
        let min_similarity = model.hyperparameter(HP_MIN_SIMILARITY, self.config.min_similarity);
        let neighbor_limit =
            model.hyperparameter(HP_NEIGHBOR_LIMIT, self.config.neighbor_limit as f64) as usize;

        let rated: HashSet<i64> = history.iter().map(|r| r.wine_id).collect();

        // Highest-rated wines seed the search; low ratings are poor anchors.
        let mut seeds: Vec<&Rating> = history
            .iter()
            .filter(|r| r.rating >= seed_rating_floor)
            .collect();
        seeds.sort_by(|a, b| {
            b.rating
                .partial_cmp(&a.rating)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        seeds.truncate(seed_limit);

        let mut scores: HashMap<i64, WeightedScore> = HashMap::new();
        let mut order: Vec<i64> = Vec::new();
        for seed in &seeds {
            let similar = self
                .similarity
                .find_similar_items(seed.wine_id, neighbor_limit)
                .await?;
            for item in similar {
                if item.similarity < min_similarity || rated.contains(&item.wine_id) {
                    continue;
                }
                if !scores.contains_key(&item.wine_id) {
                    order.push(item.wine_id);
                }
                scores
                    .entry(item.wine_id)
                    .or_default()
                    .add(item.similarity, seed.rating);
            }
        }

        info!(
            user_id,
            algorithm = Algorithm::ItemBasedCf.as_str(),
            dish = dish_context.dish_name.as_deref().unwrap_or("-"),
            seeds = seeds.len(),
            candidates = order.len(),
            "item-based recommendations computed"
        );

        Ok(finalize(scores, order, Algorithm::ItemBasedCf, options.limit))
    }

    /// Blend of both CF paths. Wines surfaced by both settle on a
    /// confidence-weighted average, so the stronger source dominates; wines
    /// from a single source keep that source's numbers. Everything returned
    /// here is tagged `Hybrid`.
    pub async fn get_hybrid_recommendations(
        &self,
        user_id: &str,
        dish_context: &DishContext,
        options: &RecommendOptions,
    ) -> Result<Vec<Recommendation>> {
        let user_based = self
            .get_user_based_recommendations(user_id, dish_context, options)
            .await?;
        let item_based = self
            .get_item_based_recommendations(user_id, dish_context, options)
            .await?;

        // Cold start short-circuits the blend: both paths produced the same
        // popularity ranking, pass one of them through untouched.
        if user_based
            .iter()
            .all(|r| r.algorithm == Algorithm::PopularityFallback)
            && !user_based.is_empty()
        {
            return Ok(user_based);
        }

        let mut order: Vec<i64> = Vec::new();
        let mut blended: HashMap<i64, Recommendation> = HashMap::new();
        for r in user_based.into_iter().chain(item_based.into_iter()) {
            match blended.get_mut(&r.wine_id) {
                None => {
                    order.push(r.wine_id);
                    blended.insert(
                        r.wine_id,
                        Recommendation {
                            algorithm: Algorithm::Hybrid,
                            ..r
                        },
                    );
                }
                Some(existing) => {
                    let (r1, c1) = (existing.predicted_rating, existing.confidence);
                    let (r2, c2) = (r.predicted_rating, r.confidence);
                    let total = c1 + c2;
                    if total > 0.0 {
                        existing.predicted_rating = (r1 * c1 + r2 * c2) / total;
                        existing.confidence = (c1 * c1 + c2 * c2) / total;
                    }
                }
            }
        }

        let mut results: Vec<Recommendation> = order
            .into_iter()
            .filter_map(|wine_id| blended.remove(&wine_id))
            .collect();
        results.sort_by(|a, b| {
            b.predicted_rating
                .partial_cmp(&a.predicted_rating)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(options.limit);

        debug!(user_id, results = results.len(), "hybrid blend complete");
        Ok(results)
    }

    /// Popularity ranking with capped confidence for users without enough
    /// history for collaborative filtering. Confidence grows with the number
    /// of supporting ratings but never reaches the 0.8 contract boundary:
    /// `0.75 * n / (n + pivot)`.
    async fn popularity_recommendations(
        &self,
        user_id: &str,
        history: &[Rating],
        options: &RecommendOptions,
    ) -> Result<Vec<Recommendation>> {
        let model = self.load_family_model(POPULARITY_MODEL).await?;
        let pivot = model.hyperparameter(HP_CONFIDENCE_PIVOT, 5.0).max(1.0);

        let rated: HashSet<i64> = history.iter().map(|r| r.wine_id).collect();
        let top = self
            .store
            .top_rated_wines(options.limit + rated.len())
            .await?;

        let recommendations: Vec<Recommendation> = top
            .into_iter()
            .filter(|w| !rated.contains(&w.wine_id))
            .take(options.limit)
            .map(|w| {
                let n = w.rating_count as f64;
                Recommendation {
                    wine_id: w.wine_id,
                    predicted_rating: w.avg_rating,
                    confidence: COLD_START_CONFIDENCE_CAP * n / (n + pivot),
                    algorithm: Algorithm::PopularityFallback,
                }
            })
            .collect();

        info!(
            user_id,
            algorithm = Algorithm::PopularityFallback.as_str(),
            results = recommendations.len(),
            "cold start: served popularity fallback"
        );
        Ok(recommendations)
    }

    /// Cold start is strictly "not enough history to run CF at all". Sparse
    /// histories above the threshold run the normal pipeline and degrade
    /// naturally through weak similarities.
    fn is_cold_start(&self, history: &[Rating]) -> bool {
        history.len() < self.config.cold_start_threshold
    }

    /// Candidate neighbors: everyone who co-rated a wine in the target's
    /// history, first-seen order.
    async fn co_rater_pool(&self, user_id: &str, history: &[Rating]) -> Result<Vec<String>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut pool: Vec<String> = Vec::new();
        for r in history {
            let raters = self.store.ratings_for_wine(r.wine_id).await?;
            for other in raters {
                if other.user_id != user_id && seen.insert(other.user_id.clone()) {
                    pool.push(other.user_id);
                }
            }
        }
        Ok(pool)
    }

    async fn load_family_model(&self, name: &str) -> Result<Arc<ModelArtifact>> {
        self.model_manager
            .load_model(name, None, &self.load_options)
            .await
    }
}

/// Sort accumulated candidates by predicted rating descending (stable over
/// first-seen order) and truncate.
fn finalize(
    scores: HashMap<i64, WeightedScore>,
    order: Vec<i64>,
    algorithm: Algorithm,
    limit: usize,
) -> Vec<Recommendation> {
    let mut results: Vec<Recommendation> = order
        .into_iter()
        .filter_map(|wine_id| {
            let score = scores.get(&wine_id)?;
            if score.weight_sum <= 0.0 {
                return None;
            }
            Some(Recommendation {
                wine_id,
                predicted_rating: score.predicted(),
                confidence: score.confidence(),
                algorithm,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.predicted_rating
            .partial_cmp(&a.predicted_rating)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}
