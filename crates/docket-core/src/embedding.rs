//! Embedder trait, the offline hash embedder, and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! a deterministic [`HashEmbedder`] that needs no model files, plus pure
//! helper functions for vector serialization and similarity computation.
//!
//! Model-backed embedders (fastembed) live in the `docket` app crate.

use crate::error::EmbeddingError;
use crate::lexical::tokenize;

/// Trait for embedding backends.
///
/// Implementations must be deterministic: identical input text always
/// yields an identical vector of length [`dims`](Embedder::dims).
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"fnv1a-hash-384"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts. The default calls [`embed`](Embedder::embed)
    /// once per text; model-backed embedders override it to batch.
    fn embed_batch(&self, texts: &[&str]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Feature-hashing embedder using FNV-1a.
///
/// Each stopword-filtered token contributes to one signed bucket, and its
/// character trigrams contribute at half weight so that morphological
/// variants (`terminate` / `termination`) land near each other. The result
/// is L2-normalized. No ML model, fully deterministic.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    name: String,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            name: format!("fnv1a-hash-{}", dim),
        }
    }

    fn accumulate(&self, out: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dim as u64) as usize;
        let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        out[bucket] += sign * weight;
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut out = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            self.accumulate(&mut out, token.as_bytes(), 1.0);
            let padded: Vec<char> = format!("#{}#", token).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.accumulate(&mut out, gram.as_bytes(), 0.5);
            }
        }
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut out {
                *x /= norm;
            }
        }
        Ok(out)
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use docket_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_deterministic() {
        let e = HashEmbedder::default();
        let a = e.embed("non-compete for twelve months").unwrap();
        let b = e.embed("non-compete for twelve months").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        assert_eq!(e.model_name(), "fnv1a-hash-384");
    }

    #[test]
    fn test_hash_embedder_similarity_tracks_overlap() {
        let e = HashEmbedder::new(256);
        let q = e.embed("termination notice").unwrap();
        let near = e.embed("notice of termination of this agreement").unwrap();
        let far = e.embed("payment schedule invoices").unwrap();
        // Unit vectors, so the dot product is the cosine.
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&q, &near) > dot(&q, &far));
    }

    #[test]
    fn test_hash_embedder_unit_norm() {
        let v = HashEmbedder::new(64).embed("governing law").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_stopword_only_text_is_zero_vector() {
        let v = HashEmbedder::new(16).embed("the and of").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }
}
