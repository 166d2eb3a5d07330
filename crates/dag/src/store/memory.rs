//! In-memory storage driver, used for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::{
    error::{DagError, DagResult},
    node::{DagNode, PrefixEntry, PrefixFingerprint, digest_entries, sha256_hex},
    store::{DagStore, PutOutcome},
};

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, DagNode>,
    /// Child hashes per parent, in insertion order.
    children: HashMap<String, Vec<String>>,
    /// Full conversation sequence per node, parent chain included.
    sequences: HashMap<String, Vec<PrefixEntry>>,
    /// Node hashes per sequence digest, in insertion order.
    by_digest: HashMap<String, Vec<String>>,
}

/// A [`DagStore`] holding everything behind one mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All nodes without a parent.
    pub fn roots(&self) -> Vec<DagNode> {
        self.lock()
            .nodes
            .values()
            .filter(|node| node.parent_hash.is_none())
            .cloned()
            .collect()
    }
}

impl DagStore for MemoryStore {
    fn put(&self, node: &DagNode) -> DagResult<PutOutcome> {
        let mut inner = self.lock();

        if inner.nodes.contains_key(&node.hash) {
            return Ok(PutOutcome::Duplicate);
        }

        // The node's conversation sequence extends its parent's by one
        // user/assistant pair.
        let mut sequence = match &node.parent_hash {
            Some(parent) => {
                if !inner.nodes.contains_key(parent) {
                    return Err(DagError::storage(format!(
                        "parent {parent} is not in the store"
                    )));
                }
                inner.sequences.get(parent).cloned().unwrap_or_default()
            }
            None => Vec::new(),
        };
        sequence.push(PrefixEntry::for_message(&node.bucket.user_message));
        sequence.push(PrefixEntry::for_message(&node.bucket.assistant_message));

        let digest = digest_entries(&sequence);

        inner.nodes.insert(node.hash.clone(), node.clone());
        inner.sequences.insert(node.hash.clone(), sequence);
        inner
            .by_digest
            .entry(digest)
            .or_default()
            .push(node.hash.clone());

        if let Some(parent) = &node.parent_hash {
            inner
                .children
                .entry(parent.clone())
                .or_default()
                .push(node.hash.clone());
        }

        Ok(PutOutcome::Inserted)
    }

    fn get(&self, hash: &str) -> DagResult<Option<DagNode>> {
        Ok(self.lock().nodes.get(hash).cloned())
    }

    fn find_by_prefix(
        &self,
        fingerprint: &PrefixFingerprint,
        next_user_text_sha: &str,
    ) -> DagResult<Option<DagNode>> {
        let inner = self.lock();

        let Some(candidates) = inner.by_digest.get(&fingerprint.digest) else {
            return Ok(None);
        };

        // Newest first; a candidate that already answered this exact user
        // turn loses to one that has not.
        let mut fallback = None;

        for hash in candidates.iter().rev() {
            if inner.sequences.get(hash) != Some(&fingerprint.entries) {
                continue;
            }

            if fallback.is_none() {
                fallback = Some(hash);
            }

            let has_same_text_child = inner
                .children
                .get(hash)
                .is_some_and(|children| {
                    children.iter().any(|child| {
                        inner.nodes.get(child).is_some_and(|child| {
                            sha256_hex(child.bucket.user_message.text().as_bytes())
                                == next_user_text_sha
                        })
                    })
                });

            if !has_same_text_child {
                return Ok(inner.nodes.get(hash).cloned());
            }
        }

        Ok(fallback.and_then(|hash| inner.nodes.get(hash).cloned()))
    }

    fn children(&self, hash: &str) -> DagResult<Vec<DagNode>> {
        let inner = self.lock();

        Ok(inner
            .children
            .get(hash)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| inner.nodes.get(child).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn ancestors(&self, hash: &str) -> DagResult<Vec<DagNode>> {
        let inner = self.lock();

        let mut chain = Vec::new();
        let mut current = inner
            .nodes
            .get(hash)
            .ok_or_else(|| DagError::NotFound(hash.to_string()))?
            .parent_hash
            .clone();

        while let Some(parent_hash) = current {
            let parent = inner
                .nodes
                .get(&parent_hash)
                .ok_or_else(|| DagError::NotFound(parent_hash.clone()))?;
            current = parent.parent_hash.clone();
            chain.push(parent.clone());
        }

        chain.reverse();
        Ok(chain)
    }

    fn descendants(&self, hash: &str) -> DagResult<Vec<DagNode>> {
        let inner = self.lock();

        let mut out = Vec::new();
        let mut queue = vec![hash.to_string()];

        while let Some(current) = queue.pop() {
            for child in inner.children.get(&current).cloned().unwrap_or_default() {
                if let Some(node) = inner.nodes.get(&child) {
                    out.push(node.clone());
                }
                queue.push(child);
            }
        }

        Ok(out)
    }

    fn update_usage(&self, hash: &str, usage: &codec::Usage) -> DagResult<()> {
        let mut inner = self.lock();

        let node = inner
            .nodes
            .get_mut(hash)
            .ok_or_else(|| DagError::NotFound(hash.to_string()))?;
        node.bucket.usage = usage.clone();

        Ok(())
    }

    fn close(&self) -> DagResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use codec::{Message, Role, Usage};

    use crate::{bucket::Bucket, node::prefix_fingerprint};

    use super::*;

    fn turn(provider: &str, user: &str, assistant: &str) -> Bucket {
        Bucket {
            user_message: Message::from_text(Role::User, user),
            assistant_message: Message::from_text(Role::Assistant, assistant),
            provider: provider.into(),
            model: "m".into(),
            stop_reason: None,
            usage: Usage::default(),
            created_at: jiff::Timestamp::UNIX_EPOCH,
            project: None,
        }
    }

    #[test]
    fn put_is_idempotent() {
        let store = MemoryStore::new();
        let node = DagNode::create(turn("ollama", "hi", "hello"), None);

        assert_eq!(store.put(&node).unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put(&node).unwrap(), PutOutcome::Duplicate);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_parent_is_rejected() {
        let store = MemoryStore::new();
        let node = DagNode::create(turn("ollama", "hi", "hello"), Some("does-not-exist".into()));

        assert!(store.put(&node).is_err());
    }

    #[test]
    fn prefix_lookup_finds_the_continuation_parent() {
        let store = MemoryStore::new();

        let root = DagNode::create(turn("ollama", "hi", "hello"), None);
        store.put(&root).unwrap();

        // The continuation request repeats the recorded turn as its prefix.
        let prefix = prefix_fingerprint(&[
            Message::from_text(Role::User, "hi"),
            Message::from_text(Role::Assistant, "hello"),
        ]);
        let next_sha = sha256_hex(b"more");

        let found = store.find_by_prefix(&prefix, &next_sha).unwrap().unwrap();
        assert_eq!(found.hash, root.hash);

        // An unrelated prefix matches nothing.
        let other = prefix_fingerprint(&[Message::from_text(Role::User, "bye")]);
        assert!(store.find_by_prefix(&other, &next_sha).unwrap().is_none());
    }

    #[test]
    fn siblings_share_a_parent_and_ancestors_walk_to_the_root() {
        let store = MemoryStore::new();

        let root = DagNode::create(turn("ollama", "hi", "hello"), None);
        store.put(&root).unwrap();

        let left = DagNode::create(turn("ollama", "more", "sure"), Some(root.hash.clone()));
        let right = DagNode::create(turn("ollama", "different", "ok"), Some(root.hash.clone()));
        store.put(&left).unwrap();
        store.put(&right).unwrap();

        let children = store.children(&root.hash).unwrap();
        assert_eq!(children.len(), 2);

        let ancestors = store.ancestors(&left.hash).unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].hash, root.hash);

        let descendants = store.descendants(&root.hash).unwrap();
        assert_eq!(descendants.len(), 2);
    }

    #[test]
    fn usage_backfill_mutates_only_usage() {
        let store = MemoryStore::new();
        let node = DagNode::create(turn("ollama", "hi", "hello"), None);
        store.put(&node).unwrap();

        let usage = Usage {
            prompt_tokens: Some(5),
            completion_tokens: Some(3),
            total_tokens: Some(8),
            ..Default::default()
        };
        store.update_usage(&node.hash, &usage).unwrap();

        let reloaded = store.get(&node.hash).unwrap().unwrap();
        assert_eq!(reloaded.bucket.usage, usage);
        assert_eq!(reloaded.hash, node.hash);
    }
}
