//! Offline feature-hashing embedder.
//!
//! Each lowercase word (minus common stop words) is hashed into one of
//! `dimensions` buckets with a hash-derived sign, and the result is
//! L2-normalized. Texts sharing vocabulary get high cosine similarity, texts
//! without shared words score near zero.

use super::Embedder;
use crate::error::Result;
use async_trait::async_trait;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "with",
];

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(16),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        {
            let hash = fnv1a(word.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::cosine_similarity;

    #[test]
    fn test_vectors_are_normalized_and_deterministic() {
        let embedder = HashingEmbedder::new(256);
        let a = embedder.vectorize("Mitochondria produce ATP");
        let b = embedder.vectorize("Mitochondria produce ATP");
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::new(1024);
        let passage = embedder.vectorize(
            "The mitochondria produce ATP through oxidative phosphorylation in the inner membrane.",
        );
        let related = embedder.vectorize("How do mitochondria produce ATP?");
        let unrelated = embedder.vectorize("Who won the football championship in 1998?");

        assert!(cosine_similarity(&passage, &related) > 0.3);
        assert!(cosine_similarity(&passage, &unrelated) < 0.1);
    }

    #[test]
    fn test_stop_words_only_gives_zero_vector() {
        let embedder = HashingEmbedder::new(64);
        assert!(embedder.vectorize("what is the").iter().all(|x| *x == 0.0));
    }
}
