use crate::error::Result;
use crate::models::{Rating, WinePopularity};
use async_trait::async_trait;

/// Read-only boundary to the historical rating data owned by the relational
/// layer. The engine never writes through this trait.
///
/// A failing store propagates as `AppError::DataAccess`; an unknown user id
/// simply yields no rows, which downstream is indistinguishable from an empty
/// history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn ratings_for_user(&self, user_id: &str) -> Result<Vec<Rating>>;

    async fn ratings_for_wine(&self, wine_id: i64) -> Result<Vec<Rating>>;

    /// Popularity ranking used by the cold-start path: wines by average
    /// rating with their supporting rating counts.
    async fn top_rated_wines(&self, limit: usize) -> Result<Vec<WinePopularity>>;
}
