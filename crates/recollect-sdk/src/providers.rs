//! Provider Registry
//!
//! Maps the string ids in `ProvidersConfig` to constructors for storage,
//! embedding and extraction capabilities. Built-in providers are registered
//! up front; applications can register their own under new ids before
//! building a `Memory`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use recollect_core::{InMemoryStorage, StorageAdapter};

use crate::SDKResult;
use crate::config::{ConfigValidationError, MemoryConfig};
use crate::memory::embeddings::{EmbeddingService, HashEmbedder};
use crate::memory::extraction::{ExtractionService, KeywordExtractor, PassthroughExtractor};

/// Constructor for a storage adapter
pub type StorageFactory =
    Arc<dyn Fn(&MemoryConfig) -> SDKResult<Arc<dyn StorageAdapter>> + Send + Sync>;

/// Constructor for an embedding service
pub type EmbedderFactory =
    Arc<dyn Fn(&MemoryConfig) -> SDKResult<Arc<dyn EmbeddingService>> + Send + Sync>;

/// Constructor for an extraction service
pub type ExtractorFactory =
    Arc<dyn Fn(&MemoryConfig) -> SDKResult<Arc<dyn ExtractionService>> + Send + Sync>;

/// Capabilities resolved from configuration
#[derive(Clone)]
pub struct Providers {
    pub storage: Arc<dyn StorageAdapter>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub extractor: Arc<dyn ExtractionService>,
}

/// Registry of provider constructors keyed by id
pub struct ProviderRegistry {
    storage: RwLock<HashMap<String, StorageFactory>>,
    embedders: RwLock<HashMap<String, EmbedderFactory>>,
    extractors: RwLock<HashMap<String, ExtractorFactory>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            storage: RwLock::new(HashMap::new()),
            embedders: RwLock::new(HashMap::new()),
            extractors: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding every provider compiled into this build
    pub fn with_builtins() -> Self {
        let registry = Self::new();

        registry.register_storage("memory", |_| Ok(Arc::new(InMemoryStorage::new())));
        #[cfg(feature = "db")]
        registry.register_storage(
            "sqlite",
            |config| {
                let storage = match &config.providers.database_path {
                    Some(path) => recollect_core::SqliteStorage::open(path)?,
                    None => recollect_core::SqliteStorage::open_in_memory()?,
                };
                Ok(Arc::new(storage))
            },
        );

        registry.register_embedder(
            "hash",
            |config| Ok(Arc::new(HashEmbedder::new(config.providers.embedding_dimensions))),
        );
        #[cfg(feature = "embeddings")]
        registry.register_embedder(
            "fastembed",
            |_| Ok(Arc::new(crate::memory::embeddings::FastEmbedder::new())),
        );

        registry.register_extractor("keyword", |_| Ok(Arc::new(KeywordExtractor::default())));
        registry.register_extractor("none", |_| Ok(Arc::new(PassthroughExtractor)));

        registry
    }

    pub fn register_storage<F>(&self, id: &str, factory: F)
    where
        F: Fn(&MemoryConfig) -> SDKResult<Arc<dyn StorageAdapter>> + Send + Sync + 'static,
    {
        let mut map = self.storage.write().unwrap_or_else(|e| e.into_inner());
        map.insert(id.to_string(), Arc::new(factory));
    }

    pub fn register_embedder<F>(&self, id: &str, factory: F)
    where
        F: Fn(&MemoryConfig) -> SDKResult<Arc<dyn EmbeddingService>> + Send + Sync + 'static,
    {
        let mut map = self.embedders.write().unwrap_or_else(|e| e.into_inner());
        map.insert(id.to_string(), Arc::new(factory));
    }

    pub fn register_extractor<F>(&self, id: &str, factory: F)
    where
        F: Fn(&MemoryConfig) -> SDKResult<Arc<dyn ExtractionService>> + Send + Sync + 'static,
    {
        let mut map = self.extractors.write().unwrap_or_else(|e| e.into_inner());
        map.insert(id.to_string(), Arc::new(factory));
    }

    /// Registered ids per capability, sorted
    pub fn list(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
        fn keys<V>(map: &RwLock<HashMap<String, V>>) -> Vec<String> {
            let map = map.read().unwrap_or_else(|e| e.into_inner());
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            keys
        }
        (keys(&self.storage), keys(&self.embedders), keys(&self.extractors))
    }

    fn lookup<V: Clone>(
        map: &RwLock<HashMap<String, V>>,
        kind: &str,
        id: &str,
    ) -> Result<V, ConfigValidationError> {
        let map = map.read().unwrap_or_else(|e| e.into_inner());
        map.get(id)
            .cloned()
            .ok_or_else(|| ConfigValidationError::UnknownProvider {
                kind: kind.to_string(),
                id: id.to_string(),
            })
    }

    /// Build every capability named by `config`.
    pub fn resolve(&self, config: &MemoryConfig) -> SDKResult<Providers> {
        let providers = &config.providers;
        let storage = Self::lookup(&self.storage, "storage", &providers.storage)?;
        let embedder = Self::lookup(&self.embedders, "embedder", &providers.embedder)?;
        let extractor = Self::lookup(&self.extractors, "extractor", &providers.extractor)?;

        tracing::info!(
            storage = %providers.storage,
            embedder = %providers.embedder,
            extractor = %providers.extractor,
            "Resolved memory providers"
        );
        Ok(Providers {
            storage: storage(config)?,
            embedder: embedder(config)?,
            extractor: extractor(config)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;

    #[test]
    fn test_builtins_are_listed() {
        let registry = ProviderRegistry::with_builtins();
        let (storage, embedders, extractors) = registry.list();
        assert!(storage.contains(&"memory".to_string()));
        assert!(embedders.contains(&"hash".to_string()));
        assert_eq!(extractors, vec!["keyword".to_string(), "none".to_string()]);
    }

    #[test]
    fn test_resolve_defaults() {
        let registry = ProviderRegistry::default();
        let providers = registry.resolve(&MemoryConfig::default()).unwrap();
        assert_eq!(providers.embedder.dimensions(), 256);
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let registry = ProviderRegistry::with_builtins();
        let config = MemoryConfig::default().with_providers(ProvidersConfig {
            embedder: "telepathy".into(),
            ..Default::default()
        });
        let err = registry.resolve(&config).err().unwrap();
        assert!(matches!(
            err,
            crate::SDKError::Config(ConfigValidationError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_custom_provider() {
        let registry = ProviderRegistry::new();
        registry.register_storage("memory", |_| Ok(Arc::new(InMemoryStorage::new())));
        registry.register_embedder("tiny", |_| Ok(Arc::new(HashEmbedder::new(8))));
        registry.register_extractor("keyword", |_| Ok(Arc::new(PassthroughExtractor)));

        let config = MemoryConfig::default().with_providers(ProvidersConfig {
            embedder: "tiny".into(),
            ..Default::default()
        });
        let providers = registry.resolve(&config).unwrap();
        assert_eq!(providers.embedder.dimensions(), 8);
    }
}
