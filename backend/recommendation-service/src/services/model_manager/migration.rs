//! Legacy artifact-shape migration.
//!
//! Early training jobs wrote a flat document (`model_name`, `model_version`,
//! `parameters`, `created_at`). Persisted copies of that shape are still on
//! disk, so loads can transparently upgrade them without a re-save. The
//! upgrade is a pure transform; a current-shape document never matches the
//! legacy shape, so re-running it is a no-op.

use crate::error::{AppError, Result};
use crate::models::{ModelArtifact, ModelMetadata, ModelType, ModelVersion};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// The retired on-disk shape.
#[derive(Debug, Deserialize)]
struct LegacyArtifactV0 {
    model_name: String,
    model_version: ModelVersion,
    model_type: ModelType,
    parameters: Vec<f64>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    sample_count: u64,
    #[serde(default)]
    accuracy: f64,
    #[serde(default)]
    hyperparameters: HashMap<String, f64>,
    checksum: String,
}

/// Metadata-only view of the current shape, for the cheap read path.
#[derive(Debug, Deserialize)]
struct MetadataView {
    metadata: ModelMetadata,
}

fn migrate_v0(legacy: LegacyArtifactV0) -> ModelArtifact {
    ModelArtifact {
        name: legacy.model_name,
        version: legacy.model_version,
        model_type: legacy.model_type,
        weights: legacy.parameters,
        metadata: ModelMetadata {
            trained_at: legacy.created_at,
            dataset_size: legacy.sample_count,
            accuracy: legacy.accuracy,
            hyperparameters: legacy.hyperparameters,
        },
        checksum: legacy.checksum,
    }
}

/// Parse a persisted artifact document, upgrading the legacy shape when
/// `auto_migrate` is set. The legacy shape never leaks past this boundary.
pub(super) fn parse_document(bytes: &[u8], auto_migrate: bool) -> Result<ModelArtifact> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| AppError::ValidationError(format!("artifact is not valid JSON: {}", e)))?;

    match serde_json::from_value::<ModelArtifact>(value.clone()) {
        Ok(artifact) => Ok(artifact),
        Err(current_err) => match serde_json::from_value::<LegacyArtifactV0>(value) {
            Ok(legacy) if auto_migrate => Ok(migrate_v0(legacy)),
            Ok(legacy) => Err(AppError::ValidationError(format!(
                "artifact {}@{} uses the legacy format and auto_migrate is disabled",
                legacy.model_name, legacy.model_version
            ))),
            Err(_) => Err(AppError::ValidationError(format!(
                "artifact does not match any known shape: {}",
                current_err
            ))),
        },
    }
}

/// Metadata without deserializing `weights`. Handles both shapes.
pub(super) fn read_metadata(bytes: &[u8]) -> Result<ModelMetadata> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| AppError::ValidationError(format!("artifact is not valid JSON: {}", e)))?;

    if let Ok(view) = serde_json::from_value::<MetadataView>(value.clone()) {
        return Ok(view.metadata);
    }

    let legacy = serde_json::from_value::<LegacyArtifactV0>(value).map_err(|e| {
        AppError::ValidationError(format!("artifact does not match any known shape: {}", e))
    })?;
    Ok(migrate_v0(legacy).metadata)
}
