//! Feature-hashing embedding provider.
//!
//! Each lowercase alphanumeric token is hashed to a bucket and a sign; the bucket
//! counts are L2-normalized. Texts sharing words get similar vectors, which is
//! enough for keyword-ish recall in development and tests. It captures no
//! semantics; inject a real model for production use.

use super::EmbeddingProvider;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());

            let pos = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[pos] += sign;
            tokens += 1;
        }

        if tokens == 0 {
            return None;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            // Colliding tokens with opposite signs cancelled out
            return None;
        }
        embedding.iter_mut().for_each(|x| *x /= norm);
        Some(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}

/// 64-bit FNV-1a. Stored vectors depend on it, so it must never change.
fn fnv1a(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}
