//! Exact cosine-similarity vector index keyed by chunk ID.
//!
//! Vectors are L2-normalized on insert, so similarity is a dot product.
//! Search is a brute-force scan, which keeps ranking fully deterministic:
//! results are ordered by similarity descending, ties by chunk ID ascending,
//! and rebuilding from the same vectors always yields the same order.
//! Stored vectors are immutable `Arc<[f32]>`, shared between clones.
//!
//! # Binary format
//!
//! ```text
//! magic    b"DKVX"
//! version  u32 LE
//! dims     u32 LE
//! count    u64 LE
//! count × { id_len u32 LE, id bytes (UTF-8), dims × f32 LE }
//! sha256   32 bytes over everything above
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::VectorIndexError;

const MAGIC: &[u8; 4] = b"DKVX";
const FORMAT_VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    vectors: BTreeMap<String, Arc<[f32]>>,
}

fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: BTreeMap::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.vectors.contains_key(chunk_id)
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = &str> {
        self.vectors.keys().map(String::as_str)
    }

    /// The stored, normalized vector for `chunk_id`.
    pub fn get(&self, chunk_id: &str) -> Option<&[f32]> {
        self.vectors.get(chunk_id).map(|v| &v[..])
    }

    /// Insert or replace the vector for `chunk_id`.
    pub fn add(&mut self, chunk_id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dims {
            return Err(VectorIndexError::DimensionMismatch {
                chunk_id: chunk_id.to_string(),
                expected: self.dims,
                actual: vector.len(),
            });
        }
        self.vectors.insert(chunk_id.to_string(), normalized(vector).into());
        Ok(())
    }

    pub fn remove(&mut self, chunk_id: &str) -> bool {
        self.vectors.remove(chunk_id).is_some()
    }

    /// The `k` most similar chunks to `query`.
    ///
    /// A query of the wrong dimensionality matches nothing.
    #[instrument(skip_all, fields(k = k, size = self.vectors.len()))]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        if query.len() != self.dims || k == 0 {
            return Vec::new();
        }
        let q = normalized(query);
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(id, v)| (id.clone(), v.iter().zip(&q).map(|(a, b)| a * b).sum()))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Serialize to the checksummed binary format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + self.vectors.len() * (self.dims * 4 + 32));
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for (id, vector) in &self.vectors {
            out.extend_from_slice(&(id.len() as u32).to_le_bytes());
            out.extend_from_slice(id.as_bytes());
            out.extend_from_slice(&vec_to_blob(vector));
        }
        let digest = Sha256::digest(&out);
        out.extend_from_slice(&digest);
        out
    }

    /// Decode the binary format, verifying magic, version, and checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VectorIndexError> {
        let corrupt = |msg: &str| VectorIndexError::Corrupt(msg.to_string());
        if bytes.len() < 20 + CHECKSUM_LEN {
            return Err(corrupt("file too short"));
        }
        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if Sha256::digest(body).as_slice() != checksum {
            return Err(corrupt("checksum mismatch"));
        }

        let mut reader = Reader { bytes: body, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = reader.u32()?;
        if version != FORMAT_VERSION {
            return Err(VectorIndexError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let dims = reader.u32()? as usize;
        let count = reader.u64()?;

        let mut index = VectorIndex::new(dims);
        for _ in 0..count {
            let id_len = reader.u32()? as usize;
            let id = std::str::from_utf8(reader.take(id_len)?)
                .map_err(|_| corrupt("chunk id is not UTF-8"))?
                .to_string();
            let vector = blob_to_vec(reader.take(dims * 4)?);
            index.vectors.insert(id, vector.into());
        }
        if reader.pos != body.len() {
            return Err(corrupt("trailing bytes after records"));
        }
        Ok(index)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], VectorIndexError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| VectorIndexError::Corrupt("truncated record".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, VectorIndexError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, VectorIndexError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> VectorIndex {
        let mut idx = VectorIndex::new(3);
        idx.add("c", &[1.0, 0.0, 0.0]).unwrap();
        idx.add("a", &[0.0, 1.0, 0.0]).unwrap();
        idx.add("b", &[1.0, 0.0, 0.0]).unwrap();
        idx
    }

    #[test]
    fn test_search_orders_by_similarity_then_id() {
        let results = index().search(&[2.0, 0.1, 0.0], 3);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!((results[0].1 - results[1].1).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut idx = VectorIndex::new(3);
        let err = idx.add("x", &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));
        assert!(idx.search(&[1.0], 5).is_empty());
    }

    #[test]
    fn test_remove() {
        let mut idx = index();
        assert!(idx.remove("a"));
        assert!(!idx.remove("a"));
        assert_eq!(idx.len(), 2);
        assert!(idx.search(&[0.0, 1.0, 0.0], 3).iter().all(|(id, _)| id != "a"));
    }

    #[test]
    fn test_binary_roundtrip_keeps_ranking() {
        let idx = index();
        let restored = VectorIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(restored, idx);
        assert_eq!(restored.search(&[0.3, 0.9, 0.0], 3), idx.search(&[0.3, 0.9, 0.0], 3));
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = index().to_bytes();
        bytes[25] ^= 0xff;
        assert!(matches!(
            VectorIndex::from_bytes(&bytes),
            Err(VectorIndexError::Corrupt(_))
        ));
        assert!(VectorIndex::from_bytes(b"junk").is_err());
    }
}
