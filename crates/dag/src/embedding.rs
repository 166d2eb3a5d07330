//! Optional vector indexing of recorded turns.
//!
//! The recorder enqueues `(hash, text)` jobs after every insert; a worker
//! task embeds the text through the configured [`Embedder`] and upserts the
//! vector into the [`VectorDriver`]. Failures are logged and the node simply
//! stays unindexed; the DAG itself is never affected.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

/// One pending vector-index entry.
#[derive(Debug, Clone)]
pub struct EmbeddingJob {
    pub hash: String,
    pub text: String,
}

/// Computes embeddings. Implementations typically wrap an HTTP client for an
/// embedding model; the worker only needs this one call.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// A similarity match returned by [`VectorDriver::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub hash: String,
    pub score: f32,
}

/// Stores `(hash, vector)` pairs and answers nearest-neighbor queries.
pub trait VectorDriver: Send + Sync {
    fn upsert(&self, hash: &str, vector: Vec<f32>) -> anyhow::Result<()>;

    fn query(&self, vector: &[f32], top_k: usize) -> anyhow::Result<Vec<VectorMatch>>;

    fn close(&self);
}

/// Brute-force in-memory vector index with cosine similarity. Fine for the
/// sizes a single recording session produces.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: Mutex<Vec<(String, Vec<f32>)>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Vec<f32>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

impl VectorDriver for MemoryVectorIndex {
    fn upsert(&self, hash: &str, vector: Vec<f32>) -> anyhow::Result<()> {
        let mut entries = self.lock();

        match entries.iter_mut().find(|(existing, _)| existing == hash) {
            Some((_, existing)) => *existing = vector,
            None => entries.push((hash.to_string(), vector)),
        }

        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> anyhow::Result<Vec<VectorMatch>> {
        let entries = self.lock();

        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .map(|(hash, candidate)| VectorMatch {
                hash: hash.clone(),
                score: cosine(vector, candidate),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);

        Ok(matches)
    }

    fn close(&self) {}
}

/// Spawn the embedding worker. Returns the job sender the recorder feeds and
/// the task handle to await on shutdown; the worker exits once every sender
/// is dropped.
pub fn spawn_embedding_worker(
    embedder: Arc<dyn Embedder>,
    driver: Arc<dyn VectorDriver>,
    queue_depth: usize,
) -> (
    tokio::sync::mpsc::Sender<EmbeddingJob>,
    tokio::task::JoinHandle<()>,
) {
    let (sender, mut receiver) = tokio::sync::mpsc::channel::<EmbeddingJob>(queue_depth);

    let handle = tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            match embedder.embed(&job.text).await {
                Ok(vector) => {
                    if let Err(err) = driver.upsert(&job.hash, vector) {
                        log::warn!("vector upsert failed for {}: {err}", job.hash);
                    }
                }
                Err(err) => {
                    log::warn!("embedding failed for {}: {err}", job.hash);
                }
            }
        }

        driver.close();
        log::debug!("embedding queue drained, worker exiting");
    });

    (sender, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            // A stand-in embedding: character counts keep the math honest.
            let len = text.len() as f32;
            Ok(vec![len, 1.0])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("model offline")
        }
    }

    #[test]
    fn cosine_ranks_closer_vectors_higher() {
        let index = MemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0]).unwrap();
        index.upsert("b", vec![0.0, 1.0]).unwrap();

        let matches = index.query(&[1.0, 0.1], 2).unwrap();
        assert_eq!(matches[0].hash, "a");
        assert_eq!(matches.len(), 2);

        let top_one = index.query(&[1.0, 0.1], 1).unwrap();
        assert_eq!(top_one.len(), 1);
    }

    #[test]
    fn upsert_replaces_existing_vectors() {
        let index = MemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0]).unwrap();
        index.upsert("a", vec![0.0, 1.0]).unwrap();

        assert_eq!(index.len(), 1);
        let matches = index.query(&[0.0, 1.0], 1).unwrap();
        assert!(matches[0].score > 0.99);
    }

    #[tokio::test]
    async fn worker_indexes_jobs_and_survives_failures() {
        let driver = Arc::new(MemoryVectorIndex::new());

        let (sender, handle) =
            spawn_embedding_worker(Arc::new(HashEmbedder), driver.clone(), 8);

        sender
            .send(EmbeddingJob {
                hash: "h1".into(),
                text: "hello".into(),
            })
            .await
            .unwrap();
        drop(sender);
        handle.await.unwrap();

        assert_eq!(driver.len(), 1);

        let (sender, handle) =
            spawn_embedding_worker(Arc::new(FailingEmbedder), driver.clone(), 8);
        sender
            .send(EmbeddingJob {
                hash: "h2".into(),
                text: "boom".into(),
            })
            .await
            .unwrap();
        drop(sender);
        handle.await.unwrap();

        // The failed job left no vector behind.
        assert_eq!(driver.len(), 1);
    }
}
