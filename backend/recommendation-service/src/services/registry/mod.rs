use crate::error::{AppError, Result};
use crate::models::{ModelType, ModelVersion, RegistryEntry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// In-memory catalog of known (name, version) → entry mappings, independent
/// of what is currently persisted on disk.
///
/// Registration enforces version immutability at the index layer: the same
/// (name, version) can never be registered twice. Deprecation flags an entry
/// without removing it, so a deprecated version stays discoverable.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: DashMap<(String, ModelVersion), RegistryEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Registering an existing (name, version) is a conflict,
    /// not an upsert.
    pub fn register(&self, entry: RegistryEntry) -> Result<()> {
        let key = (entry.name.clone(), entry.version);
        match self.entries.entry(key) {
            Entry::Occupied(_) => Err(AppError::DuplicateRegistration {
                name: entry.name,
                version: entry.version,
            }),
            Entry::Vacant(slot) => {
                debug!(name = %entry.name, version = %entry.version, "model registered");
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Lookup; a missing key is `None`, never an error.
    pub fn get(&self, name: &str, version: ModelVersion) -> Option<RegistryEntry> {
        self.entries
            .get(&(name.to_string(), version))
            .map(|entry| entry.value().clone())
    }

    /// Remove an entry. Idempotent; returns whether it existed.
    pub fn unregister(&self, name: &str, version: ModelVersion) -> bool {
        self.entries.remove(&(name.to_string(), version)).is_some()
    }

    /// Flag an entry as deprecated without removing it. Idempotent; returns
    /// whether the entry existed.
    pub fn deprecate(&self, name: &str, version: ModelVersion) -> bool {
        match self.entries.get_mut(&(name.to_string(), version)) {
            Some(mut entry) => {
                entry.deprecated = true;
                true
            }
            None => false,
        }
    }

    /// Every entry of the given type, across names and versions. No ordering
    /// guarantee.
    pub fn list_by_type(&self, model_type: ModelType) -> Vec<RegistryEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.model_type == model_type)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, version: ModelVersion, model_type: ModelType) -> RegistryEntry {
        RegistryEntry {
            name: name.to_string(),
            version,
            model_type,
            deprecated: false,
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = ModelRegistry::new();
        let v1 = ModelVersion::release(1, 0, 0);
        registry
            .register(entry("user-cf", v1, ModelType::UserCf))
            .unwrap();

        let found = registry.get("user-cf", v1).unwrap();
        assert_eq!(found.name, "user-cf");
        assert!(!found.deprecated);

        // Missing keys are None, never an error
        assert!(registry.get("user-cf", ModelVersion::release(9, 9, 9)).is_none());
        assert!(registry.get("unknown", v1).is_none());
    }

    #[test]
    fn test_duplicate_registration_is_conflict() {
        let registry = ModelRegistry::new();
        let v1 = ModelVersion::release(1, 0, 0);
        registry
            .register(entry("user-cf", v1, ModelType::UserCf))
            .unwrap();

        let err = registry
            .register(entry("user-cf", v1, ModelType::UserCf))
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateRegistration { .. }));

        // A different version of the same name is fine
        registry
            .register(entry("user-cf", ModelVersion::release(1, 0, 1), ModelType::UserCf))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_deprecate_flags_without_removing() {
        let registry = ModelRegistry::new();
        let v1 = ModelVersion::release(1, 0, 0);
        registry
            .register(entry("item-cf", v1, ModelType::ItemCf))
            .unwrap();

        assert!(registry.deprecate("item-cf", v1));
        // Idempotent
        assert!(registry.deprecate("item-cf", v1));
        assert!(!registry.deprecate("item-cf", ModelVersion::release(2, 0, 0)));

        let found = registry.get("item-cf", v1).unwrap();
        assert!(found.deprecated);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ModelRegistry::new();
        let v1 = ModelVersion::release(1, 0, 0);
        registry
            .register(entry("user-cf", v1, ModelType::UserCf))
            .unwrap();

        assert!(registry.unregister("user-cf", v1));
        assert!(!registry.unregister("user-cf", v1));
        assert!(registry.get("user-cf", v1).is_none());

        // The slot is reusable only through a fresh register call
        registry
            .register(entry("user-cf", v1, ModelType::UserCf))
            .unwrap();
    }

    #[test]
    fn test_list_by_type_spans_names_and_versions() {
        let registry = ModelRegistry::new();
        registry
            .register(entry("user-cf", ModelVersion::release(1, 0, 0), ModelType::UserCf))
            .unwrap();
        registry
            .register(entry("user-cf", ModelVersion::release(1, 1, 0), ModelType::UserCf))
            .unwrap();
        registry
            .register(entry("user-cf-eu", ModelVersion::release(1, 0, 0), ModelType::UserCf))
            .unwrap();
        registry
            .register(entry("popularity", ModelVersion::release(1, 0, 0), ModelType::Popularity))
            .unwrap();

        let user_cf = registry.list_by_type(ModelType::UserCf);
        assert_eq!(user_cf.len(), 3);
        assert!(registry.list_by_type(ModelType::ItemCf).is_empty());
    }
}
