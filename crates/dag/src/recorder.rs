//! The recording worker: turns captured request/response byte pairs into
//! DAG nodes.
//!
//! Tasks arrive over a bounded `tokio::sync::mpsc` queue and are processed
//! serially per store by one worker task, which keeps writes ordered. The
//! proxy side never blocks: a full queue drops the task with a warning,
//! trading records for client latency under sustained overload.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use codec::ProviderCodec;
use tokio::sync::mpsc;

use crate::{
    bucket::Bucket,
    embedding::EmbeddingJob,
    error::{DagError, DagResult},
    node::{DagNode, prefix_fingerprint, sha256_hex},
    store::{DagStore, PutOutcome},
};

/// Backoff before the single retry of a failed storage transaction.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// One captured exchange, as handed over by the proxy.
#[derive(Debug, Clone)]
pub struct RecordTask {
    pub request: Bytes,
    pub response: Bytes,
    /// Configured provider identifier of the route, which selects the codec.
    pub provider: String,
    pub project: Option<String>,
    pub received_at: jiff::Timestamp,
}

/// Cheap handle the proxy uses to offer tasks to the worker.
#[derive(Clone)]
pub struct Recorder {
    sender: mpsc::Sender<RecordTask>,
    has_embeddings: bool,
}

/// Join handle for the worker task. The worker exits once every
/// [`Recorder`] clone is dropped and the queue has drained.
pub struct RecorderWorker {
    handle: tokio::task::JoinHandle<()>,
}

impl Recorder {
    /// Spawn the worker task draining a bounded queue into `store`.
    pub fn spawn(
        store: Arc<dyn DagStore>,
        embeddings: Option<mpsc::Sender<EmbeddingJob>>,
        queue_depth: usize,
    ) -> (Self, RecorderWorker) {
        let (sender, mut receiver) = mpsc::channel::<RecordTask>(queue_depth);
        let has_embeddings = embeddings.is_some();

        let handle = tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let provider = task.provider.clone();

                if let Err(err) = record(store.as_ref(), embeddings.as_ref(), task).await {
                    log::warn!("dropping {provider} exchange: {err}");
                }
            }

            log::debug!("recorder queue drained, worker exiting");
        });

        (
            Self {
                sender,
                has_embeddings,
            },
            RecorderWorker { handle },
        )
    }

    /// Whether an embedding queue was wired in at spawn time.
    pub fn has_embeddings(&self) -> bool {
        self.has_embeddings
    }

    /// Offer a task without blocking. Dropped with a warning when the queue
    /// is full; the client response is long gone by now and unaffected.
    pub fn offer(&self, task: RecordTask) {
        use tokio::sync::mpsc::error::TrySendError;

        match self.sender.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("recorder queue full, dropping recording task");
            }
            Err(TrySendError::Closed(_)) => {
                log::warn!("recorder worker gone, dropping recording task");
            }
        }
    }
}

impl RecorderWorker {
    /// Wait for the worker to drain and exit. Call after the last
    /// [`Recorder`] clone is dropped.
    pub async fn join(self) {
        if self.handle.await.is_err() {
            log::error!("recorder worker panicked");
        }
    }
}

/// Record one exchange. Steps: decode both sides, build the bucket, resolve
/// the parent by prefix fingerprint, hash, insert, enqueue the embedding.
async fn record(
    store: &dyn DagStore,
    embeddings: Option<&mpsc::Sender<EmbeddingJob>>,
    task: RecordTask,
) -> DagResult<()> {
    let codec = ProviderCodec::from_name(&task.provider).unwrap_or(ProviderCodec::BestEffort);

    let request = codec.parse_request(&task.request)?;

    let Some(last) = request.last_message() else {
        return Err(DagError::MalformedExchange("request has no messages".into()));
    };
    if !last.role.is_user() {
        return Err(DagError::MalformedExchange(format!(
            "last message has role {}, expected user",
            last.role.as_str()
        )));
    }

    let response = codec.parse_response(&task.response)?;

    let bucket = Bucket {
        user_message: last.clone(),
        assistant_message: response.message.clone(),
        provider: task.provider.clone(),
        model: if response.model.is_empty() {
            request.model.clone()
        } else {
            response.model.clone()
        },
        stop_reason: response.stop_reason.clone(),
        usage: response.usage.clone(),
        created_at: task.received_at,
        project: task.project.clone(),
    };

    let prefix = &request.messages[..request.messages.len() - 1];
    let parent_hash = if prefix.is_empty() {
        None
    } else {
        let fingerprint = prefix_fingerprint(prefix);
        let next_user_sha = sha256_hex(bucket.user_message.text().as_bytes());

        store
            .find_by_prefix(&fingerprint, &next_user_sha)?
            .map(|node| node.hash)
    };

    let node = DagNode::create(bucket, parent_hash);
    let outcome = put_with_retry(store, &node).await?;

    log::debug!(
        "recorded {} node {} (parent: {})",
        node.bucket.provider,
        node.hash,
        node.parent_hash.as_deref().unwrap_or("none"),
    );

    if outcome == PutOutcome::Inserted
        && let Some(embeddings) = embeddings
    {
        let text = node.bucket.extract_text();

        // Tool-only turns project to nothing; there is nothing to index.
        if !text.is_empty() {
            use tokio::sync::mpsc::error::TrySendError;

            match embeddings.try_send(EmbeddingJob {
                hash: node.hash.clone(),
                text,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("embedding queue full, node {} stays unindexed", node.hash);
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("embedding worker gone, node {} stays unindexed", node.hash);
                }
            }
        }
    }

    Ok(())
}

/// Storage faults get one retry with backoff; everything else fails fast.
async fn put_with_retry(store: &dyn DagStore, node: &DagNode) -> DagResult<PutOutcome> {
    match store.put(node) {
        Ok(outcome) => Ok(outcome),
        Err(err) if err.is_transient() => {
            log::warn!("insert of {} failed, retrying once: {err}", node.hash);
            tokio::time::sleep(RETRY_BACKOFF).await;
            store.put(node)
        }
        Err(err) => Err(err),
    }
}
