//! Embedding model seam and vector math.

use async_trait::async_trait;

use crate::error::ServiceResult;

/// Turns text into a fixed-size vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>>;

    /// Embed several texts, in order
    async fn embed_batch(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Model name recorded alongside stored vectors
    fn model_name(&self) -> &str;
}

/// Serialize as little-endian f32 for BLOB storage
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Euclidean distance; `None` when the dimensions differ
pub fn l2_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Deterministic embedder for tests. Known texts map to fixed vectors;
    /// anything else hashes into a sparse vector.
    pub(crate) struct FakeEmbedder {
        pub(crate) fixed: HashMap<String, Vec<f32>>,
        pub(crate) dims: usize,
    }

    impl FakeEmbedder {
        pub(crate) fn new(dims: usize) -> Self {
            Self {
                fixed: HashMap::new(),
                dims,
            }
        }

        pub(crate) fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.fixed.insert(text.to_lowercase(), vector);
            self
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
            if let Some(vector) = self.fixed.get(&text.to_lowercase()) {
                return Ok(vector.clone());
            }

            let mut vector = vec![0.0; self.dims];
            for word in text.to_lowercase().split_whitespace() {
                let bucket = word
                    .bytes()
                    .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
                    % self.dims;
                vector[bucket] += 1.0;
            }
            Ok(vector)
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }

    #[test]
    fn test_blob_encoding() {
        let bytes = encode_embedding(&[1.5, -2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_embedding(&bytes), vec![1.5, -2.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_l2_distance() {
        assert_eq!(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), Some(5.0));
        assert_eq!(l2_distance(&[0.0], &[3.0, 4.0]), None);
    }
}
