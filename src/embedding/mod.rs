//! Text-to-vector embedding seam.
//!
//! The engine treats the embedding model as an opaque external function behind
//! [`EmbeddingProvider`]. A deterministic [`hashing::HashingEmbedder`] ships for
//! development, the CLI and tests; production callers inject their own model.

pub mod hashing;

use anyhow::Result;

/// Trait for embedding text into vectors.
///
/// Implementations produce vectors of exactly [`EmbeddingProvider::dimensions`]
/// components and may decline degenerate input (empty or punctuation-only text)
/// by returning `None`. All methods are synchronous; the engine calls them from
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string, or decline with `None`.
    fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Create an embedding provider from config.
///
/// Currently only `"hashing"` is built in.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
    dimension: usize,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Box::new(hashing::HashingEmbedder::new(dimension))),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: hashing"),
    }
}
