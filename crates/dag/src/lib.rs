//! The Merkle DAG behind the recording proxy.
//!
//! Every user→assistant exchange becomes one content-addressed node whose
//! hash covers its bucket plus the hash of its parent turn. Parents are
//! resolved from the request's message history alone (the proxy is
//! transparent, so there is no session identifier), which makes branches
//! written by independent clients first-class: two requests sharing a prefix
//! simply become siblings.

mod bucket;
mod embedding;
mod error;
mod loader;
mod node;
mod recorder;
mod store;

pub use bucket::Bucket;
pub use embedding::{
    Embedder, EmbeddingJob, MemoryVectorIndex, VectorDriver, VectorMatch, spawn_embedding_worker,
};
pub use error::{DagError, DagResult};
pub use loader::{LoadedDag, load_branch};
pub use node::{
    DagNode, PrefixEntry, PrefixFingerprint, canonical_hash, digest_entries, prefix_fingerprint,
    sha256_hex,
};
pub use recorder::{RecordTask, Recorder, RecorderWorker};
pub use store::{DagStore, PutOutcome, memory::MemoryStore, sqlite::SqliteStore};
