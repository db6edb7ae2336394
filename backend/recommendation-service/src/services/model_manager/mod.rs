mod migration;

use crate::config::ModelStoreConfig;
use crate::error::{AppError, Result};
use crate::models::{ModelArtifact, ModelDraft, ModelMetadata, ModelType, ModelVersion, VersionBump};
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-call load behavior.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Retry with the next-lower persisted version when a load fails.
    pub fallback: bool,
    /// Serve the built-in baseline artifact once every version is exhausted.
    pub baseline: bool,
    /// Re-verify the stored checksum against recomputed weights.
    pub validate_checksum: bool,
    /// Transparently upgrade legacy-shape documents at load time.
    pub auto_migrate: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            fallback: false,
            baseline: false,
            validate_checksum: true,
            auto_migrate: true,
        }
    }
}

impl LoadOptions {
    /// Fallback cascade ending at the baseline — the serving path's choice,
    /// which must always resolve some model.
    pub fn resilient() -> Self {
        Self {
            fallback: true,
            baseline: true,
            ..Self::default()
        }
    }

    /// Serving-path options with the integrity/migration switches taken from
    /// deployment config.
    pub fn from_config(config: &ModelStoreConfig) -> Self {
        Self {
            fallback: true,
            baseline: true,
            validate_checksum: config.validate_checksum,
            auto_migrate: config.auto_migrate,
        }
    }
}

/// Counters mirrored out of the manager for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelStoreStats {
    pub storage_reads: u64,
    pub cache_hits: u64,
    pub fallback_warnings: u64,
}

/// Loads, saves, versions and caches persisted model artifacts.
///
/// One JSON document per (name, version) lives under `model_dir`, named
/// `{name}-{version}.json`, so a directory listing alone enumerates the
/// available versions. Artifacts are immutable: every save allocates the next
/// version, and loaded artifacts are cached per (name, version) until a save
/// for that name invalidates them.
pub struct ModelManager {
    model_dir: PathBuf,
    cache: DashMap<(String, ModelVersion), Arc<ModelArtifact>>,
    storage_reads: AtomicU64,
    cache_hits: AtomicU64,
    fallback_warnings: AtomicU64,
}

/// Deterministic hash of a weight vector: SHA-256 over its canonical JSON
/// encoding, hex-encoded.
pub fn calculate_checksum(weights: &[f64]) -> String {
    // A float slice always has a JSON encoding (non-finite values serialize
    // as null), so this cannot fail.
    let canonical = serde_json::to_vec(weights).expect("f64 slice serializes to JSON");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

impl ModelManager {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            cache: DashMap::new(),
            storage_reads: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            fallback_warnings: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ModelStoreConfig) -> Self {
        Self::new(config.model_dir.clone())
    }

    pub fn stats(&self) -> ModelStoreStats {
        ModelStoreStats {
            storage_reads: self.storage_reads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallback_warnings: self.fallback_warnings.load(Ordering::Relaxed),
        }
    }

    /// Load an artifact, resolving to the highest persisted version when
    /// `version` is omitted.
    ///
    /// A failure at one version (unreadable file, bad shape, checksum
    /// mismatch) either propagates immediately (`fallback: false`) or steps
    /// down to the next-lower version; each step emits one warning. An
    /// exhausted cascade returns the baseline artifact when `baseline` is
    /// set, otherwise the final error.
    pub async fn load_model(
        &self,
        name: &str,
        version: Option<ModelVersion>,
        options: &LoadOptions,
    ) -> Result<Arc<ModelArtifact>> {
        if version == Some(ModelVersion::Baseline) {
            return Ok(Arc::new(self.baseline_artifact(name)));
        }

        // An explicit version that is already cached needs no directory
        // listing; save-time invalidation keeps such entries current.
        if let Some(requested) = version {
            if let Some(hit) = self.cache.get(&(name.to_string(), requested)) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(name, version = %requested, "model cache hit");
                return Ok(hit.value().clone());
            }
        }

        let mut candidates = self.list_versions(name).await?;
        if let Some(requested) = version {
            candidates.retain(|v| *v <= requested);
            if candidates.first() != Some(&requested) {
                if !options.fallback {
                    return Err(AppError::ModelNotFound {
                        name: name.to_string(),
                        requested: requested.to_string(),
                    });
                }
                self.note_fallback(name, &requested.to_string(), "version not persisted");
            }
        }

        let mut last_error: Option<AppError> = None;
        for candidate in candidates {
            let key = (name.to_string(), candidate);
            if let Some(hit) = self.cache.get(&key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(name, version = %candidate, "model cache hit");
                return Ok(hit.value().clone());
            }

            match self.load_version(name, candidate, options).await {
                Ok(artifact) => {
                    let artifact = Arc::new(artifact);
                    self.cache.insert(key, Arc::clone(&artifact));
                    info!(name, version = %candidate, "model loaded");
                    return Ok(artifact);
                }
                Err(e) if options.fallback && e.is_recoverable_per_version() => {
                    self.note_fallback(name, &candidate.to_string(), &e.to_string());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if options.baseline {
            warn!(name, "all persisted versions exhausted, serving baseline model");
            return Ok(Arc::new(self.baseline_artifact(name)));
        }

        Err(last_error.unwrap_or_else(|| AppError::ModelNotFound {
            name: name.to_string(),
            requested: version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "latest".to_string()),
        }))
    }

    /// Persist a draft as the next immutable version for its name.
    ///
    /// The increment is taken against the global maximum across all persisted
    /// versions of the name; minor/major bumps zero the lower components.
    /// Cache entries for the name are dropped before this returns.
    pub async fn save_model(&self, draft: &ModelDraft, bump: VersionBump) -> Result<ModelVersion> {
        // A weightless artifact would fail validation on every load; surface
        // the mistake at the writer instead.
        if draft.weights.is_empty() {
            return Err(AppError::ValidationError(format!(
                "draft {} has no weights",
                draft.name
            )));
        }

        tokio::fs::create_dir_all(&self.model_dir).await?;

        let next = self
            .list_versions(&draft.name)
            .await?
            .first()
            .copied()
            .unwrap_or(ModelVersion::Baseline)
            .bump(bump);

        let path = self.artifact_path(&draft.name, next);
        if tokio::fs::try_exists(&path).await? {
            return Err(AppError::InvalidInput(format!(
                "artifact {}@{} already exists and versions are immutable",
                draft.name, next
            )));
        }

        let artifact = ModelArtifact {
            name: draft.name.clone(),
            version: next,
            model_type: draft.model_type,
            weights: draft.weights.clone(),
            metadata: draft.metadata.clone(),
            checksum: calculate_checksum(&draft.weights),
        };

        let bytes = serde_json::to_vec_pretty(&artifact)
            .map_err(|e| AppError::ValidationError(format!("artifact serialization: {}", e)))?;
        tokio::fs::write(&path, bytes).await?;

        // Synchronous invalidation: the next load for this name must observe
        // the new version set.
        self.cache.retain(|(name, _), _| name != &draft.name);

        info!(name = %draft.name, version = %next, "model saved");
        Ok(next)
    }

    /// Metadata without deserializing `weights` — the cheap read path.
    pub async fn get_model_metadata(
        &self,
        name: &str,
        version: Option<ModelVersion>,
    ) -> Result<ModelMetadata> {
        let resolved = match version {
            Some(v) => v,
            None => self
                .list_versions(name)
                .await?
                .first()
                .copied()
                .ok_or_else(|| AppError::ModelNotFound {
                    name: name.to_string(),
                    requested: "latest".to_string(),
                })?,
        };

        let path = self.artifact_path(name, resolved);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::ModelNotFound {
                    name: name.to_string(),
                    requested: resolved.to_string(),
                }
            } else {
                AppError::Storage(e)
            }
        })?;
        self.storage_reads.fetch_add(1, Ordering::Relaxed);

        migration::read_metadata(&bytes)
    }

    /// Persisted release versions for `name`, descending. A missing model
    /// directory reads as "nothing persisted yet".
    pub async fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let mut dir = match tokio::fs::read_dir(&self.model_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((parsed_name, version)) = parse_artifact_filename(file_name) {
                if parsed_name == name && version != ModelVersion::Baseline {
                    versions.push(version);
                }
            }
        }

        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    /// The always-loadable terminal artifact. Empty weights and
    /// hyperparameters; consumers fall back to configured defaults.
    pub fn baseline_artifact(&self, name: &str) -> ModelArtifact {
        let model_type = match name {
            "item-cf" => ModelType::ItemCf,
            "popularity" => ModelType::Popularity,
            _ => ModelType::UserCf,
        };
        let weights: Vec<f64> = Vec::new();
        ModelArtifact {
            name: name.to_string(),
            version: ModelVersion::Baseline,
            model_type,
            checksum: calculate_checksum(&weights),
            weights,
            metadata: ModelMetadata {
                trained_at: Utc::now(),
                dataset_size: 0,
                accuracy: 0.0,
                hyperparameters: Default::default(),
            },
        }
    }

    async fn load_version(
        &self,
        name: &str,
        version: ModelVersion,
        options: &LoadOptions,
    ) -> Result<ModelArtifact> {
        let path = self.artifact_path(name, version);
        let bytes = tokio::fs::read(&path).await?;
        self.storage_reads.fetch_add(1, Ordering::Relaxed);

        let artifact = migration::parse_document(&bytes, options.auto_migrate)?;
        validate_artifact(&artifact, name, version)?;

        if options.validate_checksum {
            let actual = calculate_checksum(&artifact.weights);
            if actual != artifact.checksum {
                return Err(AppError::CorruptedArtifact {
                    name: name.to_string(),
                    version,
                    expected: artifact.checksum.clone(),
                    actual,
                });
            }
        }

        Ok(artifact)
    }

    fn note_fallback(&self, name: &str, version: &str, reason: &str) {
        warn!(name, version, reason, "model load failed, falling back");
        self.fallback_warnings.fetch_add(1, Ordering::Relaxed);
    }

    fn artifact_path(&self, name: &str, version: ModelVersion) -> PathBuf {
        self.model_dir.join(format!("{}-{}.json", name, version))
    }
}

/// Required-field checks applied after parsing, before the artifact reaches
/// any caller.
fn validate_artifact(artifact: &ModelArtifact, name: &str, version: ModelVersion) -> Result<()> {
    if artifact.name.is_empty() {
        return Err(AppError::ValidationError("artifact name is empty".into()));
    }
    if artifact.name != name {
        return Err(AppError::ValidationError(format!(
            "artifact name {} does not match document location {}",
            artifact.name, name
        )));
    }
    if artifact.version != version {
        return Err(AppError::ValidationError(format!(
            "artifact version {} does not match document location {}",
            artifact.version, version
        )));
    }
    if artifact.weights.is_empty() {
        return Err(AppError::ValidationError(format!(
            "artifact {}@{} has no weights",
            name, version
        )));
    }
    if artifact.checksum.is_empty() {
        return Err(AppError::ValidationError(format!(
            "artifact {}@{} has no checksum",
            name, version
        )));
    }
    Ok(())
}

/// `{name}-{version}.json` → (name, version). Names may themselves contain
/// hyphens, so the version is taken after the last one.
fn parse_artifact_filename(file_name: &str) -> Option<(&str, ModelVersion)> {
    let stem = file_name.strip_suffix(".json")?;
    let (name, version) = stem.rsplit_once('-')?;
    let version = version.parse().ok()?;
    Some((name, version))
}
