use crate::models::ModelVersion;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// No artifact exists for the requested name/version and no
    /// fallback/baseline was configured.
    #[error("model not found: {name} (requested version: {requested})")]
    ModelNotFound { name: String, requested: String },

    /// Artifact parses as data but fails required-field or shape checks.
    #[error("model validation failed: {0}")]
    ValidationError(String),

    /// Checksum mismatch. Distinct from validation so operational tooling can
    /// alert on corruption specifically.
    #[error("corrupted artifact {name}@{version}: checksum mismatch (expected {expected}, got {actual})")]
    CorruptedArtifact {
        name: String,
        version: ModelVersion,
        expected: String,
        actual: String,
    },

    /// Rating store unreachable or failing. Never downgraded to an empty
    /// recommendation list.
    #[error("rating store error: {0}")]
    DataAccess(String),

    /// Registering an already-present (name, version) pair.
    #[error("duplicate registration: {name}@{version}")]
    DuplicateRegistration {
        name: String,
        version: ModelVersion,
    },

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Whether a load failure at one version may be retried at a lower
    /// version during a fallback cascade.
    pub fn is_recoverable_per_version(&self) -> bool {
        matches!(
            self,
            AppError::ValidationError(_)
                | AppError::CorruptedArtifact { .. }
                | AppError::Storage(_)
        )
    }
}
