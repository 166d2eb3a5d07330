//! Materializing a walkable in-memory view of a branch.
//!
//! Given any node, the loader pulls its ancestor chain and descendant
//! sub-DAG out of the store and wires up parent/child indices so callers can
//! traverse without touching the driver again. Nothing is cached beyond the
//! returned value.

use std::collections::HashMap;

use crate::{
    error::{DagError, DagResult},
    node::DagNode,
    store::DagStore,
};

/// An in-memory slice of the DAG: one node, everything above it, and
/// everything below it.
pub struct LoadedDag {
    nodes: HashMap<String, DagNode>,
    /// Child hashes per node, in load order.
    children: HashMap<String, Vec<String>>,
    root: String,
}

/// Load the branch view around `hash`: its ancestors up to the root plus all
/// of its descendants.
pub fn load_branch(store: &dyn DagStore, hash: &str) -> DagResult<LoadedDag> {
    let node = store
        .get(hash)?
        .ok_or_else(|| DagError::NotFound(hash.to_string()))?;

    let ancestors = store.ancestors(hash)?;
    let descendants = store.descendants(hash)?;

    let root = ancestors
        .first()
        .map(|ancestor| ancestor.hash.clone())
        .unwrap_or_else(|| node.hash.clone());

    let mut nodes = HashMap::new();
    let mut children: HashMap<String, Vec<String>> = HashMap::new();

    for node in ancestors.into_iter().chain([node]).chain(descendants) {
        if let Some(parent) = &node.parent_hash {
            children
                .entry(parent.clone())
                .or_default()
                .push(node.hash.clone());
        }
        nodes.insert(node.hash.clone(), node);
    }

    Ok(LoadedDag {
        nodes,
        children,
        root,
    })
}

impl LoadedDag {
    pub fn root(&self) -> &DagNode {
        // The root hash always points at a loaded node by construction.
        &self.nodes[&self.root]
    }

    pub fn get(&self, hash: &str) -> Option<&DagNode> {
        self.nodes.get(hash)
    }

    pub fn children_of(&self, hash: &str) -> Vec<&DagNode> {
        self.children
            .get(hash)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first traversal from the root. The visitor receives each node
    /// with its depth (root = 0).
    pub fn walk(&self, visit: &mut dyn FnMut(&DagNode, usize)) {
        let mut stack = vec![(&self.root, 0usize)];

        while let Some((hash, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(hash) else {
                continue;
            };

            visit(node, depth);

            if let Some(children) = self.children.get(hash) {
                // Reverse so the first-loaded child is visited first.
                for child in children.iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use codec::{Message, Role, Usage};

    use crate::{bucket::Bucket, store::memory::MemoryStore};

    use super::*;

    fn turn(user: &str, assistant: &str) -> Bucket {
        Bucket {
            user_message: Message::from_text(Role::User, user),
            assistant_message: Message::from_text(Role::Assistant, assistant),
            provider: "ollama".into(),
            model: "m".into(),
            stop_reason: None,
            usage: Usage::default(),
            created_at: jiff::Timestamp::UNIX_EPOCH,
            project: None,
        }
    }

    #[test]
    fn walk_visits_the_whole_branch_depth_first() {
        let store = MemoryStore::new();

        let root = DagNode::create(turn("a", "1"), None);
        store.put(&root).unwrap();
        let mid = DagNode::create(turn("b", "2"), Some(root.hash.clone()));
        store.put(&mid).unwrap();
        let left = DagNode::create(turn("c", "3"), Some(mid.hash.clone()));
        store.put(&left).unwrap();
        let right = DagNode::create(turn("d", "4"), Some(mid.hash.clone()));
        store.put(&right).unwrap();

        // Load from the middle: root above, both leaves below.
        let dag = load_branch(&store, &mid.hash).unwrap();
        assert_eq!(dag.len(), 4);
        assert_eq!(dag.root().hash, root.hash);

        let mut visited = Vec::new();
        dag.walk(&mut |node, depth| visited.push((node.bucket.user_message.text(), depth)));

        assert_eq!(visited.len(), 4);
        assert_eq!(visited[0], ("a".to_string(), 0));
        assert_eq!(visited[1], ("b".to_string(), 1));
        assert!(visited[2..].iter().all(|(_, depth)| *depth == 2));
    }

    #[test]
    fn unknown_hash_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            load_branch(&store, "missing"),
            Err(DagError::NotFound(_))
        ));
    }
}
