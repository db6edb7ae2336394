use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A single historical rating row, supplied read-only by the rating store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: String,
    pub wine_id: i64,
    /// Bounded 1.0–5.0
    pub rating: f64,
    pub timestamp: DateTime<Utc>,
}

/// Popularity row backing the cold-start path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinePopularity {
    pub wine_id: i64,
    pub avg_rating: f64,
    pub rating_count: u64,
}

/// Which statistic a similarity score was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityBasis {
    Pearson,
    Cosine,
}

/// Ephemeral user-user similarity result. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSimilarity {
    pub user_id: String,
    pub similarity: f64,
    pub basis: SimilarityBasis,
}

/// Ephemeral item-item similarity result. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSimilarity {
    pub wine_id: i64,
    pub similarity: f64,
    pub basis: SimilarityBasis,
}

/// Which pipeline produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    UserBasedCf,
    ItemBasedCf,
    Hybrid,
    PopularityFallback,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::UserBasedCf => "user_based_cf",
            Algorithm::ItemBasedCf => "item_based_cf",
            Algorithm::Hybrid => "hybrid",
            Algorithm::PopularityFallback => "popularity_fallback",
        }
    }
}

/// A scored wine suggestion for one request. Not persisted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub wine_id: i64,
    pub predicted_rating: f64,
    /// Evidence strength in [0, 1]
    pub confidence: f64,
    pub algorithm: Algorithm,
}

/// Dish context supplied by the pairing caller. Carried through for tracing
/// and explainability; pairing logic itself lives upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DishContext {
    pub dish_name: Option<String>,
    pub cuisine: Option<String>,
}

/// Per-request options for recommendation generation.
#[derive(Debug, Clone)]
pub struct RecommendOptions {
    pub limit: usize,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

/// Algorithm family a model artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    UserCf,
    ItemCf,
    Popularity,
}

impl ModelType {
    /// Canonical artifact name for this family.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            ModelType::UserCf => "user-cf",
            ModelType::ItemCf => "item-cf",
            ModelType::Popularity => "popularity",
        }
    }
}

/// Model version tag. Releases are SemVer triples; `Baseline` is the built-in
/// always-loadable artifact and sorts below every release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelVersion {
    Baseline,
    Release { major: u32, minor: u32, patch: u32 },
}

impl ModelVersion {
    pub fn release(major: u32, minor: u32, patch: u32) -> Self {
        ModelVersion::Release {
            major,
            minor,
            patch,
        }
    }

    /// Next version per bump granularity. Bumping `Baseline` starts a fresh
    /// release lineage at the bumped zero version.
    pub fn bump(&self, bump: VersionBump) -> ModelVersion {
        let (major, minor, patch) = match *self {
            ModelVersion::Baseline => (0, 0, 0),
            ModelVersion::Release {
                major,
                minor,
                patch,
            } => (major, minor, patch),
        };
        match bump {
            VersionBump::Patch => ModelVersion::release(major, minor, patch + 1),
            VersionBump::Minor => ModelVersion::release(major, minor + 1, 0),
            VersionBump::Major => ModelVersion::release(major + 1, 0, 0),
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVersion::Baseline => write!(f, "baseline"),
            ModelVersion::Release {
                major,
                minor,
                patch,
            } => write!(f, "{}.{}.{}", major, minor, patch),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid model version: {0}")]
pub struct ParseVersionError(pub String);

impl FromStr for ModelVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "baseline" {
            return Ok(ModelVersion::Baseline);
        }
        let mut parts = s.split('.');
        let mut component = |name: &str| -> Result<u32, ParseVersionError> {
            parts
                .next()
                .ok_or_else(|| ParseVersionError(format!("{}: missing {}", s, name)))?
                .parse::<u32>()
                .map_err(|_| ParseVersionError(s.to_string()))
        };
        let major = component("major")?;
        let minor = component("minor")?;
        let patch = component("patch")?;
        if parts.next().is_some() {
            return Err(ParseVersionError(s.to_string()));
        }
        Ok(ModelVersion::release(major, minor, patch))
    }
}

impl Serialize for ModelVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModelVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which SemVer component `save_model` increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionBump {
    Patch,
    Minor,
    Major,
}

/// Training provenance carried by every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub trained_at: DateTime<Utc>,
    pub dataset_size: u64,
    pub accuracy: f64,
    #[serde(default)]
    pub hyperparameters: HashMap<String, f64>,
}

/// Versioned, checksummed model state as persisted on disk. Immutable once
/// written; each save produces a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub version: ModelVersion,
    pub model_type: ModelType,
    pub weights: Vec<f64>,
    pub metadata: ModelMetadata,
    pub checksum: String,
}

impl ModelArtifact {
    /// Per-request hyperparameter lookup with a caller-supplied default.
    pub fn hyperparameter(&self, key: &str, default: f64) -> f64 {
        self.metadata
            .hyperparameters
            .get(key)
            .copied()
            .unwrap_or(default)
    }
}

/// Unversioned model state handed to `save_model`, which assigns the version
/// and checksum.
#[derive(Debug, Clone)]
pub struct ModelDraft {
    pub name: String,
    pub model_type: ModelType,
    pub weights: Vec<f64>,
    pub metadata: ModelMetadata,
}

/// Catalog row held by the in-memory registry. A lookup index only; the
/// artifact it points at may or may not currently be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub version: ModelVersion,
    pub model_type: ModelType,
    pub deprecated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_display() {
        let v: ModelVersion = "1.2.3".parse().unwrap();
        assert_eq!(v, ModelVersion::release(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");

        let b: ModelVersion = "baseline".parse().unwrap();
        assert_eq!(b, ModelVersion::Baseline);
        assert_eq!(b.to_string(), "baseline");

        assert!("1.2".parse::<ModelVersion>().is_err());
        assert!("1.2.3.4".parse::<ModelVersion>().is_err());
        assert!("v1.2.3".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        let mut versions = vec![
            ModelVersion::release(1, 0, 0),
            ModelVersion::Baseline,
            ModelVersion::release(2, 0, 0),
            ModelVersion::release(1, 10, 0),
            ModelVersion::release(1, 2, 0),
        ];
        versions.sort();
        assert_eq!(versions[0], ModelVersion::Baseline);
        assert_eq!(*versions.last().unwrap(), ModelVersion::release(2, 0, 0));
        // 1.10.0 > 1.2.0 numerically, not lexically
        assert!(ModelVersion::release(1, 10, 0) > ModelVersion::release(1, 2, 0));
    }

    #[test]
    fn test_version_bump() {
        let v = ModelVersion::release(1, 1, 2);
        assert_eq!(v.bump(VersionBump::Patch), ModelVersion::release(1, 1, 3));
        assert_eq!(v.bump(VersionBump::Minor), ModelVersion::release(1, 2, 0));
        assert_eq!(v.bump(VersionBump::Major), ModelVersion::release(2, 0, 0));
    }

    #[test]
    fn test_version_serde_as_string() {
        let v = ModelVersion::release(0, 3, 1);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"0.3.1\"");
        let back: ModelVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
