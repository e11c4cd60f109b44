//! In-memory cosine-similarity index over the chunks of one corpus.
//!
//! An index is always built whole and then handed to the session store, so it is
//! never mutated once a query can see it.

use std::cmp::Ordering;

use crate::embed_chunks::{embed_all, embed_query, Embedding, EmbeddingProvider};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
struct Entry {
    chunk: String,
    embedding: Embedding,
    magnitude: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub chunk: String,
    pub score: f32,
}

#[derive(Clone, Debug, Default)]
pub struct VectorIndex {
    entries: Vec<Entry>,
    dimension: usize,
}

impl VectorIndex {
    /// Embeds every chunk through `provider` and returns the finished index.
    pub async fn build(
        provider: &dyn EmbeddingProvider,
        chunks: Vec<String>,
        batch_size: usize,
        concurrency: usize,
    ) -> Result<Self> {
        let embeddings = embed_all(provider, &chunks, batch_size, concurrency).await?;
        Self::from_embeddings(chunks, embeddings).map_err(|e| match e {
            Error::Provider { detail, .. } => Error::provider(provider.name(), detail),
            other => other,
        })
    }

    /// Pairs chunks with precomputed embeddings. All vectors must share one non-zero
    /// dimensionality.
    pub fn from_embeddings(chunks: Vec<String>, embeddings: Vec<Embedding>) -> Result<Self> {
        if chunks.len() != embeddings.len() {
            return Err(Error::provider(
                "embedding",
                format!("{} embeddings for {} chunks", embeddings.len(), chunks.len()),
            ));
        }
        let dimension = embeddings.first().map_or(0, Vec::len);
        if !embeddings.is_empty() && dimension == 0 {
            return Err(Error::provider("embedding", "empty embedding vector"));
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for (pos, (chunk, embedding)) in chunks.into_iter().zip(embeddings).enumerate() {
            if embedding.len() != dimension {
                return Err(Error::provider(
                    "embedding",
                    format!(
                        "chunk {} has {} dimensions, expected {}",
                        pos,
                        embedding.len(),
                        dimension
                    ),
                ));
            }
            let magnitude = magnitude(&embedding);
            entries.push(Entry {
                chunk,
                embedding,
                magnitude,
            });
        }
        Ok(Self { entries, dimension })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Zero for an empty index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.chunk.as_str())
    }

    /// Top `k` entries by cosine similarity, highest first; equal scores keep insertion
    /// order. Returns fewer than `k` results when the index is smaller.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        if query.len() != self.dimension {
            return Err(Error::provider(
                "embedding",
                format!(
                    "query has {} dimensions but the index has {}",
                    query.len(),
                    self.dimension
                ),
            ));
        }

        let query_magnitude = magnitude(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| {
                (
                    pos,
                    cosine_similarity(query, &e.embedding, query_magnitude, e.magnitude),
                )
            })
            .collect();

        let by_rank = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
        };
        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_by(by_rank);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: self.entries[pos].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Embeds `query_text` with `provider` and returns the chunk text of the top `k` hits.
    pub async fn search_as_text(
        &self,
        provider: &dyn EmbeddingProvider,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<String>> {
        let query = embed_query(provider, query_text).await?;
        let hits = self.search(&query, k).map_err(|e| match e {
            Error::Provider { detail, .. } => Error::provider(provider.name(), detail),
            other => other,
        })?;
        Ok(hits.into_iter().map(|h| h.chunk).collect())
    }
}

pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity given precomputed magnitudes; zero when either vector has none.
pub fn cosine_similarity(a: &[f32], b: &[f32], mag_a: f32, mag_b: f32) -> f32 {
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn index(vectors: &[(&str, Vec<f32>)]) -> VectorIndex {
        let (chunks, embeddings): (Vec<String>, Vec<Embedding>) = vectors
            .iter()
            .map(|(c, v)| (c.to_string(), v.clone()))
            .unzip();
        VectorIndex::from_embeddings(chunks, embeddings).expect("consistent vectors")
    }

    #[test]
    fn returns_highest_scores_first() {
        // A·q > C·q > B·q
        let idx = index(&[
            ("A", vec![1.0, 0.0]),
            ("B", vec![-1.0, 0.2]),
            ("C", vec![0.6, 0.8]),
        ]);
        let hits = idx.search(&[1.0, 0.1], 2).expect("search");
        let names: Vec<&str> = hits.iter().map(|h| h.chunk.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let idx = index(&[
            ("first", vec![0.0, 1.0]),
            ("dup", vec![1.0, 0.0]),
            ("dup", vec![2.0, 0.0]),
            ("last", vec![3.0, 0.0]),
        ]);
        let hits = idx.search(&[1.0, 0.0], 3).expect("search");
        let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![1.0, 1.0, 1.0]);
        let names: Vec<&str> = hits.iter().map(|h| h.chunk.as_str()).collect();
        assert_eq!(names, vec!["dup", "dup", "last"]);
    }

    #[test]
    fn k_larger_than_index_returns_everything() {
        let idx = index(&[("a", vec![1.0]), ("b", vec![-1.0])]);
        assert_eq!(idx.search(&[1.0], 10).expect("search").len(), 2);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let idx = VectorIndex::default();
        assert!(idx.search(&[1.0, 2.0, 3.0], 3).expect("search").is_empty());
    }

    #[test]
    fn zero_vectors_score_zero() {
        let idx = index(&[("zero", vec![0.0, 0.0]), ("neg", vec![-1.0, 0.0])]);
        let hits = idx.search(&[1.0, 0.0], 2).expect("search");
        assert_eq!(hits[0].chunk, "zero");
        assert_eq!(hits[0].score, 0.0);
        assert_eq!(hits[1].score, -1.0);
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let err = VectorIndex::from_embeddings(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0, 0.0], vec![1.0]],
        )
        .expect_err("mixed dimensions");
        assert!(matches!(err, Error::Provider { .. }));

        let idx = index(&[("a", vec![1.0, 0.0])]);
        assert!(idx.search(&[1.0], 1).is_err());
    }

    proptest! {
        #[test]
        fn returns_min_k_n_sorted(
            vectors in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 4), 0..40),
            query in prop::collection::vec(-10.0f32..10.0, 4),
            k in 0usize..50,
        ) {
            let chunks: Vec<String> = (0..vectors.len()).map(|i| i.to_string()).collect();
            let idx = VectorIndex::from_embeddings(chunks, vectors.clone()).unwrap();
            let hits = idx.search(&query, k).unwrap();
            prop_assert_eq!(hits.len(), k.min(vectors.len()));
            for pair in hits.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.score > b.score || (a.score == b.score
                    && a.chunk.parse::<usize>().unwrap() < b.chunk.parse::<usize>().unwrap()));
            }
        }

        #[test]
        fn ranking_ignores_uniform_rescaling(
            ints in prop::collection::vec(prop::collection::vec(-10i32..10, 3), 1..20),
            query in prop::collection::vec(-10i32..10, 3),
            factor in prop::sample::select(vec![0.25f32, 0.5, 2.0, 4.0, 8.0]),
        ) {
            // Integer components and power-of-two factors keep the rescaled scores exact.
            let vectors: Vec<Embedding> = ints
                .iter()
                .map(|v| v.iter().map(|&x| x as f32).collect())
                .collect();
            let query: Vec<f32> = query.into_iter().map(|x| x as f32).collect();
            let chunks: Vec<String> = (0..vectors.len()).map(|i| i.to_string()).collect();
            let scaled: Vec<Embedding> = vectors
                .iter()
                .map(|v| v.iter().map(|x| x * factor).collect())
                .collect();
            let plain = VectorIndex::from_embeddings(chunks.clone(), vectors).unwrap();
            let rescaled = VectorIndex::from_embeddings(chunks, scaled).unwrap();

            let a: Vec<String> = plain.search(&query, 5).unwrap().into_iter().map(|h| h.chunk).collect();
            let b: Vec<String> = rescaled.search(&query, 5).unwrap().into_iter().map(|h| h.chunk).collect();
            prop_assert_eq!(a, b);
        }
    }
}
