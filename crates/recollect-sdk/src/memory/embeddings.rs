//! Embedding Services
//!
//! The engine consumes embeddings through the `EmbeddingService` capability.
//! Two providers ship with the SDK:
//!
//! - `HashEmbedder`: deterministic feature hashing of word unigrams and
//!   bigrams. No model, no I/O; good enough for near-duplicate detection
//!   and for tests.
//! - `FastEmbedder` (feature `embeddings`): local all-MiniLM-L6-v2 inference
//!   via `fastembed`, loaded lazily on first use.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::SDKResult;

pub use recollect_core::storage::cosine_similarity;

/// Text embedding capability
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>>;

    /// Dimensions of produced vectors
    fn dimensions(&self) -> usize;
}

/// Normalize a cosine similarity (-1 to 1) to a relevance score (0 to 1)
pub fn normalize_similarity(similarity: f32) -> f32 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Weight of a word bigram relative to a unigram
const BIGRAM_WEIGHT: f32 = 0.5;

/// Feature-hashing embedder
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }

    /// Embed synchronously
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = recollect_core::text::tokenize(text);

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), BIGRAM_WEIGHT);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedder {
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Embedding dimensions for all-MiniLM-L6-v2
#[cfg(feature = "embeddings")]
pub const FASTEMBED_DIMENSIONS: usize = 384;

/// Local model embedder backed by `fastembed`
#[cfg(feature = "embeddings")]
pub struct FastEmbedder {
    model: tokio::sync::RwLock<Option<fastembed::TextEmbedding>>,
}

#[cfg(feature = "embeddings")]
impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "embeddings")]
impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: tokio::sync::RwLock::new(None),
        }
    }

    /// Initialize the embedding model (lazy loading)
    async fn ensure_model(&self) -> SDKResult<()> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        if self.model.read().await.is_some() {
            return Ok(());
        }

        let mut model_guard = self.model.write().await;
        if model_guard.is_some() {
            return Ok(());
        }

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = TextEmbedding::try_new(init_options).map_err(|e| {
            crate::SDKError::embedding(format!("Failed to load embedding model: {}", e))
        })?;

        tracing::info!("Embedding model loaded in {:?}", start.elapsed());
        *model_guard = Some(model);
        Ok(())
    }

    /// Check if the model is loaded
    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }
}

#[cfg(feature = "embeddings")]
#[async_trait]
impl EmbeddingService for FastEmbedder {
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>> {
        use crate::SDKError;

        self.ensure_model().await?;

        let model_guard = self.model.read().await;
        let model = model_guard
            .as_ref()
            .ok_or_else(|| SDKError::embedding("Embedding model not initialized"))?;

        model
            .embed(vec![text], None)
            .map_err(|e| SDKError::embedding(format!("Failed to generate embedding: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| SDKError::embedding("No embedding generated"))
    }

    fn dimensions(&self) -> usize {
        FASTEMBED_DIMENSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_similarity() {
        assert!((normalize_similarity(1.0) - 1.0).abs() < 0.001);
        assert!((normalize_similarity(0.0) - 0.5).abs() < 0.001);
        assert!((normalize_similarity(-1.0) - 0.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(128);
        let a = embedder.embed("User prefers dark mode").await.unwrap();
        let b = embedder.embed("user   prefers DARK mode").await.unwrap();

        assert_eq!(a.len(), 128);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_ordering() {
        let embedder = HashEmbedder::default();
        let base = embedder.embed_text("user likes dark mode in the editor");
        let close = embedder.embed_text("user likes light mode in the editor");
        let far = embedder.embed_text("flight to berlin departs tuesday");

        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
        assert!(cosine_similarity(&base, &close) < 0.99);
    }

    #[test]
    fn test_hash_embedder_empty_text() {
        let embedder = HashEmbedder::new(16);
        assert!(embedder.embed_text("").iter().all(|x| *x == 0.0));
    }

    #[cfg(feature = "embeddings")]
    #[tokio::test]
    #[ignore = "requires model download (~90MB)"]
    async fn test_fastembed_single() {
        let embedder = FastEmbedder::new();
        let vector = embedder.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), FASTEMBED_DIMENSIONS);
        assert!(embedder.is_loaded().await);
    }
}
