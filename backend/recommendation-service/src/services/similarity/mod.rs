use crate::error::Result;
use crate::models::{ItemSimilarity, Rating, SimilarityBasis, UserSimilarity};
use crate::services::ratings::RatingStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// User-user and item-item similarity over raw rating vectors.
///
/// User similarity is Pearson correlation over co-rated wines; item
/// similarity is cosine over shared raters. Both operations treat "not enough
/// overlap to say anything" as neutral similarity 0.0, never as an error.
pub struct SimilarityEngine {
    store: Arc<dyn RatingStore>,
}

impl SimilarityEngine {
    pub fn new(store: Arc<dyn RatingStore>) -> Self {
        Self { store }
    }

    /// Pearson correlation of two users' ratings over their co-rated wines.
    ///
    /// Returns a value in [-1, 1]. Empty intersection and zero-variance
    /// vectors both return exactly 0.0.
    pub fn user_similarity(&self, ratings_a: &[Rating], ratings_b: &[Rating]) -> f64 {
        let by_wine: HashMap<i64, f64> = ratings_a.iter().map(|r| (r.wine_id, r.rating)).collect();

        let pairs: Vec<(f64, f64)> = ratings_b
            .iter()
            .filter_map(|r| by_wine.get(&r.wine_id).map(|&a| (a, r.rating)))
            .collect();

        if pairs.is_empty() {
            return 0.0;
        }

        let n = pairs.len() as f64;
        let mean_a = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
        let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;

        let mut covariance = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for (a, b) in &pairs {
            let da = a - mean_a;
            let db = b - mean_b;
            covariance += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let denominator = (var_a * var_b).sqrt();
        if denominator == 0.0 {
            // All ratings identical on one side; correlation is undefined,
            // treated as neutral.
            return 0.0;
        }

        (covariance / denominator).clamp(-1.0, 1.0)
    }

    /// Cosine similarity of two wines' rating vectors over their shared
    /// raters. Returns a value in [0, 1]; zero overlap or zero magnitude
    /// returns exactly 0.0.
    pub fn item_similarity(&self, ratings_a: &[Rating], ratings_b: &[Rating]) -> f64 {
        let by_user: HashMap<&str, f64> = ratings_a
            .iter()
            .map(|r| (r.user_id.as_str(), r.rating))
            .collect();

        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        for r in ratings_b {
            if let Some(&a) = by_user.get(r.user_id.as_str()) {
                dot += a * r.rating;
                norm_a += a * a;
                norm_b += r.rating * r.rating;
            }
        }

        let denominator = (norm_a * norm_b).sqrt();
        if denominator == 0.0 {
            return 0.0;
        }

        // Ratings are non-negative, so cosine lands in [0, 1].
        (dot / denominator).clamp(0.0, 1.0)
    }

    /// Score every candidate against the target user, descending by
    /// similarity. The sort is stable, so ties keep the pool's order and
    /// repeated calls are reproducible.
    pub async fn find_similar_users(
        &self,
        target_user_id: &str,
        target_ratings: &[Rating],
        candidate_pool: &[String],
    ) -> Result<Vec<UserSimilarity>> {
        let mut similar: Vec<UserSimilarity> = Vec::with_capacity(candidate_pool.len());

        for candidate in candidate_pool {
            if candidate == target_user_id {
                continue;
            }
            let candidate_ratings = self.store.ratings_for_user(candidate).await?;
            let similarity = self.user_similarity(target_ratings, &candidate_ratings);
            similar.push(UserSimilarity {
                user_id: candidate.clone(),
                similarity,
                basis: SimilarityBasis::Pearson,
            });
        }

        similar.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            target_user_id,
            candidates = candidate_pool.len(),
            scored = similar.len(),
            "scored similar users"
        );

        Ok(similar)
    }

    /// Most similar wines to `wine_id` within its co-rater neighborhood,
    /// descending, truncated to `limit`.
    pub async fn find_similar_items(&self, wine_id: i64, limit: usize) -> Result<Vec<ItemSimilarity>> {
        let base_ratings = self.store.ratings_for_wine(wine_id).await?;
        if base_ratings.is_empty() {
            return Ok(Vec::new());
        }

        // Candidate set: every other wine rated by someone who rated this one.
        // Insertion order is kept so tie-breaking stays deterministic.
        let mut seen: HashSet<i64> = HashSet::new();
        let mut candidates: Vec<i64> = Vec::new();
        for rater in &base_ratings {
            let rater_ratings = self.store.ratings_for_user(&rater.user_id).await?;
            for r in rater_ratings {
                if r.wine_id != wine_id && seen.insert(r.wine_id) {
                    candidates.push(r.wine_id);
                }
            }
        }

        let mut similar: Vec<ItemSimilarity> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let candidate_ratings = self.store.ratings_for_wine(candidate).await?;
            let similarity = self.item_similarity(&base_ratings, &candidate_ratings);
            similar.push(ItemSimilarity {
                wine_id: candidate,
                similarity,
                basis: SimilarityBasis::Cosine,
            });
        }

        similar.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        similar.truncate(limit);

        Ok(similar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{rating, InMemoryRatingStore};

    fn engine_with(ratings: Vec<Rating>) -> SimilarityEngine {
        SimilarityEngine::new(Arc::new(InMemoryRatingStore::new(ratings)))
    }

    #[test]
    fn test_pearson_positive_correlation() {
        let engine = engine_with(vec![]);
        // Two co-rated wines with opposite rank order
        let u = vec![rating("u", 1, 5.0), rating("u", 2, 4.0)];
        let v = vec![rating("v", 1, 4.0), rating("v", 2, 5.0), rating("v", 3, 4.0)];

        let similarity = engine.user_similarity(&u, &v);
        assert!((-1.0..=1.0).contains(&similarity));
        // Both rank A and B in opposite order, so correlation is -1 here;
        // with a third co-rated wine it turns positive.
        let u2 = vec![rating("u", 1, 5.0), rating("u", 2, 4.0), rating("u", 3, 3.0)];
        let v2 = vec![rating("v", 1, 4.5), rating("v", 2, 4.0), rating("v", 3, 2.5)];
        assert!(engine.user_similarity(&u2, &v2) > 0.9);
    }

    #[test]
    fn test_pearson_zero_overlap_is_neutral() {
        let engine = engine_with(vec![]);
        let a = vec![rating("a", 1, 5.0), rating("a", 2, 3.0)];
        let b = vec![rating("b", 3, 4.0), rating("b", 4, 2.0)];
        assert_eq!(engine.user_similarity(&a, &b), 0.0);
        assert_eq!(engine.user_similarity(&[], &b), 0.0);
    }

    #[test]
    fn test_pearson_zero_variance_is_neutral() {
        let engine = engine_with(vec![]);
        let flat = vec![rating("a", 1, 4.0), rating("a", 2, 4.0), rating("a", 3, 4.0)];
        let varied = vec![rating("b", 1, 5.0), rating("b", 2, 3.0), rating("b", 3, 1.0)];
        assert_eq!(engine.user_similarity(&flat, &varied), 0.0);
        assert_eq!(engine.user_similarity(&flat, &flat), 0.0);
    }

    #[test]
    fn test_pearson_bounds() {
        let engine = engine_with(vec![]);
        let a = vec![rating("a", 1, 1.0), rating("a", 2, 5.0)];
        let inverse = vec![rating("b", 1, 5.0), rating("b", 2, 1.0)];
        let aligned = vec![rating("c", 1, 1.5), rating("c", 2, 4.5)];

        assert!((engine.user_similarity(&a, &inverse) - -1.0).abs() < 1e-9);
        assert!((engine.user_similarity(&a, &aligned) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_bounds_and_zero_magnitude() {
        let engine = engine_with(vec![]);
        let a = vec![rating("u1", 10, 5.0), rating("u2", 10, 4.0)];
        let b = vec![rating("u1", 11, 4.0), rating("u2", 11, 5.0)];
        let similarity = engine.item_similarity(&a, &b);
        assert!((0.0..=1.0).contains(&similarity));
        assert!(similarity > 0.9);

        // No shared raters
        let c = vec![rating("u3", 12, 4.0)];
        assert_eq!(engine.item_similarity(&a, &c), 0.0);
        assert_eq!(engine.item_similarity(&[], &b), 0.0);
    }

    #[tokio::test]
    async fn test_find_similar_users_ordering_is_stable() {
        let store_rows = vec![
            // target
            rating("t", 1, 5.0),
            rating("t", 2, 4.0),
            rating("t", 3, 3.0),
            // close matches the target
            rating("close", 1, 5.0),
            rating("close", 2, 4.0),
            rating("close", 3, 3.0),
            // far inverts it
            rating("far", 1, 1.0),
            rating("far", 2, 3.0),
            rating("far", 3, 5.0),
            // tied_a / tied_b have no overlap, both score 0
            rating("tied_a", 9, 4.0),
            rating("tied_b", 9, 4.0),
        ];
        let engine = engine_with(store_rows);
        let target = vec![rating("t", 1, 5.0), rating("t", 2, 4.0), rating("t", 3, 3.0)];
        let pool = vec![
            "tied_a".to_string(),
            "far".to_string(),
            "close".to_string(),
            "tied_b".to_string(),
        ];

        let similar = engine.find_similar_users("t", &target, &pool).await.unwrap();

        assert_eq!(similar[0].user_id, "close");
        assert!(similar[0].similarity > 0.9);
        // Zero-scored ties keep pool order
        assert_eq!(similar[1].user_id, "tied_a");
        assert_eq!(similar[2].user_id, "tied_b");
        assert_eq!(similar[3].user_id, "far");
        assert!(similar[3].similarity < 0.0);
    }

    #[tokio::test]
    async fn test_find_similar_items_truncates_and_orders() {
        let store_rows = vec![
            rating("u1", 1, 5.0),
            rating("u2", 1, 4.0),
            rating("u3", 1, 4.5),
            // wine 2: rated very similarly by the same users
            rating("u1", 2, 5.0),
            rating("u2", 2, 4.0),
            rating("u3", 2, 4.5),
            // wine 3: one shared rater
            rating("u1", 3, 2.0),
            // wine 4: no shared raters
            rating("u9", 4, 5.0),
        ];
        let engine = engine_with(store_rows);

        let similar = engine.find_similar_items(1, 2).await.unwrap();

        assert!(similar.len() <= 2);
        assert_eq!(similar[0].wine_id, 2);
        assert!(similar[0].similarity > 0.99);
        for window in similar.windows(2) {
            assert!(window[0].similarity >= window[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_find_similar_items_unknown_wine_is_empty() {
        let engine = engine_with(vec![rating("u1", 1, 5.0)]);
        let similar = engine.find_similar_items(999, 10).await.unwrap();
        assert!(similar.is_empty());
    }
}
