//! The storage capability surface shared by the in-memory and SQLite
//! backends.

pub mod memory;
pub mod sqlite;

use crate::{
    error::DagResult,
    node::{DagNode, PrefixFingerprint},
};

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// A node with the same hash already existed; the write was a no-op.
    Duplicate,
}

/// A DAG storage driver.
///
/// Implementations are thread-safe; `put` serializes within one driver
/// instance, and `find_by_prefix` observes every `put` that completed before
/// it was called in the same process.
pub trait DagStore: Send + Sync {
    /// Idempotent insert. The node's parent, when present, must already be
    /// stored; this is what keeps the DAG acyclic by construction.
    fn put(&self, node: &DagNode) -> DagResult<PutOutcome>;

    fn get(&self, hash: &str) -> DagResult<Option<DagNode>>;

    /// Resolve the node whose recorded conversation matches the given prefix
    /// fingerprint. `next_user_text_sha` is the digest of the user turn the
    /// caller is about to attach: among equal matches, a node that already
    /// has a child with that exact user text is deprioritized, and the most
    /// recently written candidate wins.
    fn find_by_prefix(
        &self,
        fingerprint: &PrefixFingerprint,
        next_user_text_sha: &str,
    ) -> DagResult<Option<DagNode>>;

    /// All direct children of a node. Siblings carry no defined order.
    fn children(&self, hash: &str) -> DagResult<Vec<DagNode>>;

    /// The chain from the root down to the node's parent, oldest first. The
    /// node itself is not included.
    fn ancestors(&self, hash: &str) -> DagResult<Vec<DagNode>>;

    /// Every node reachable from the given node via child edges, excluding
    /// the node itself.
    fn descendants(&self, hash: &str) -> DagResult<Vec<DagNode>>;

    /// Backfill usage counters on an existing node. The only mutation the
    /// store permits.
    fn update_usage(&self, hash: &str, usage: &codec::Usage) -> DagResult<()>;

    fn close(&self) -> DagResult<()>;
}
