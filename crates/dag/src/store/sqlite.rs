//! SQLite storage driver.
//!
//! Layout: `nodes(hash PK, parent_hash, bucket BLOB, created_at, project)`
//! holds one row per turn with the bucket as canonical JSON, and
//! `node_prefix(node_hash, message_index, role, text_sha)` holds the
//! canonicalized conversation sequence ending at each node so parent
//! resolution stays proportional to the prefix length.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    bucket::Bucket,
    error::{DagError, DagResult},
    node::{DagNode, PrefixEntry, PrefixFingerprint, sha256_hex},
    store::{DagStore, PutOutcome},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    hash        TEXT PRIMARY KEY,
    parent_hash TEXT,
    bucket      BLOB NOT NULL,
    created_at  INTEGER NOT NULL,
    project     TEXT
);

CREATE TABLE IF NOT EXISTS node_prefix (
    node_hash     TEXT NOT NULL,
    message_index INTEGER NOT NULL,
    role          TEXT NOT NULL,
    text_sha      TEXT NOT NULL,
    PRIMARY KEY (node_hash, message_index)
);

CREATE INDEX IF NOT EXISTS nodes_parent_idx ON nodes (parent_hash);
CREATE INDEX IF NOT EXISTS nodes_project_idx ON nodes (project);
CREATE INDEX IF NOT EXISTS node_prefix_idx ON node_prefix (text_sha, message_index);
"#;

/// A [`DagStore`] backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> DagResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// An in-memory database, handy for tests.
    pub fn open_in_memory() -> DagResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> DagResult<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> DagResult<T>) -> DagResult<T> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard
            .as_mut()
            .ok_or_else(|| DagError::storage("store is closed"))?;

        f(conn)
    }
}

fn decode_bucket(blob: &[u8]) -> DagResult<Bucket> {
    serde_json::from_slice(blob)
        .map_err(|err| DagError::storage(format!("undecodable bucket blob: {err}")))
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Option<String>, Vec<u8>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn node_from_parts(
    (hash, parent_hash, blob): (String, Option<String>, Vec<u8>),
) -> DagResult<DagNode> {
    Ok(DagNode {
        hash,
        parent_hash,
        bucket: decode_bucket(&blob)?,
    })
}

fn sequence_of(conn: &Connection, hash: &str) -> DagResult<Vec<PrefixEntry>> {
    let mut stmt = conn.prepare(
        "SELECT role, text_sha FROM node_prefix WHERE node_hash = ?1 ORDER BY message_index",
    )?;

    let rows = stmt.query_map(params![hash], |row| {
        Ok(PrefixEntry {
            role: row.get(0)?,
            text_sha: row.get(1)?,
        })
    })?;

    let mut entries = Vec::new();
    for entry in rows {
        entries.push(entry?);
    }

    Ok(entries)
}

fn children_of(conn: &Connection, hash: &str) -> DagResult<Vec<DagNode>> {
    let mut stmt = conn.prepare(
        "SELECT hash, parent_hash, bucket FROM nodes WHERE parent_hash = ?1 ORDER BY rowid",
    )?;

    let rows = stmt.query_map(params![hash], row_to_node)?;

    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(node_from_parts(row?)?);
    }

    Ok(nodes)
}

fn get_node(conn: &Connection, hash: &str) -> DagResult<Option<DagNode>> {
    let parts = conn
        .query_row(
            "SELECT hash, parent_hash, bucket FROM nodes WHERE hash = ?1",
            params![hash],
            row_to_node,
        )
        .optional()?;

    parts.map(node_from_parts).transpose()
}

impl DagStore for SqliteStore {
    fn put(&self, node: &DagNode) -> DagResult<PutOutcome> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM nodes WHERE hash = ?1",
                    params![node.hash],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_some() {
                return Ok(PutOutcome::Duplicate);
            }

            let mut sequence = match &node.parent_hash {
                Some(parent) => {
                    let parent_exists: Option<i64> = tx
                        .query_row(
                            "SELECT 1 FROM nodes WHERE hash = ?1",
                            params![parent],
                            |row| row.get(0),
                        )
                        .optional()?;

                    if parent_exists.is_none() {
                        return Err(DagError::storage(format!(
                            "parent {parent} is not in the store"
                        )));
                    }

                    sequence_of(&tx, parent)?
                }
                None => Vec::new(),
            };
            sequence.push(PrefixEntry::for_message(&node.bucket.user_message));
            sequence.push(PrefixEntry::for_message(&node.bucket.assistant_message));

            let blob = serde_json::to_vec(&node.bucket)
                .map_err(|err| DagError::storage(format!("unencodable bucket: {err}")))?;

            tx.execute(
                "INSERT OR IGNORE INTO nodes (hash, parent_hash, bucket, created_at, project)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    node.hash,
                    node.parent_hash,
                    blob,
                    node.bucket.created_at.as_millisecond(),
                    node.bucket.project,
                ],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO node_prefix (node_hash, message_index, role, text_sha)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;

                for (index, entry) in sequence.iter().enumerate() {
                    stmt.execute(params![node.hash, index as i64, entry.role, entry.text_sha])?;
                }
            }

            tx.commit()?;
            Ok(PutOutcome::Inserted)
        })
    }

    fn get(&self, hash: &str) -> DagResult<Option<DagNode>> {
        self.with_conn(|conn| get_node(conn, hash))
    }

    fn find_by_prefix(
        &self,
        fingerprint: &PrefixFingerprint,
        next_user_text_sha: &str,
    ) -> DagResult<Option<DagNode>> {
        let prefix_len = fingerprint.entries.len();
        let Some(last) = fingerprint.entries.last() else {
            return Ok(None);
        };

        self.with_conn(|conn| {
            // Candidates are nodes whose sequence ends with the same text at
            // the same index; the per-candidate verification below keeps
            // this O(prefix length).
            let mut stmt = conn.prepare(
                "SELECT np.node_hash FROM node_prefix np
                 JOIN nodes n ON n.hash = np.node_hash
                 WHERE np.text_sha = ?1 AND np.message_index = ?2
                 ORDER BY n.rowid DESC",
            )?;

            let candidates: Vec<String> = stmt
                .query_map(params![last.text_sha, (prefix_len - 1) as i64], |row| {
                    row.get(0)
                })?
                .collect::<Result<_, _>>()?;

            let mut fallback = None;

            for hash in candidates {
                let sequence = sequence_of(conn, &hash)?;
                if sequence != fingerprint.entries {
                    continue;
                }

                if fallback.is_none() {
                    fallback = Some(hash.clone());
                }

                let has_same_text_child = children_of(conn, &hash)?.iter().any(|child| {
                    sha256_hex(child.bucket.user_message.text().as_bytes()) == next_user_text_sha
                });

                if !has_same_text_child {
                    return get_node(conn, &hash);
                }
            }

            match fallback {
                Some(hash) => get_node(conn, &hash),
                None => Ok(None),
            }
        })
    }

    fn children(&self, hash: &str) -> DagResult<Vec<DagNode>> {
        self.with_conn(|conn| children_of(conn, hash))
    }

    fn ancestors(&self, hash: &str) -> DagResult<Vec<DagNode>> {
        self.with_conn(|conn| {
            let node =
                get_node(conn, hash)?.ok_or_else(|| DagError::NotFound(hash.to_string()))?;

            let mut chain = Vec::new();
            let mut current = node.parent_hash;

            while let Some(parent_hash) = current {
                let parent = get_node(conn, &parent_hash)?
                    .ok_or_else(|| DagError::NotFound(parent_hash.clone()))?;
                current = parent.parent_hash.clone();
                chain.push(parent);
            }

            chain.reverse();
            Ok(chain)
        })
    }

    fn descendants(&self, hash: &str) -> DagResult<Vec<DagNode>> {
        self.with_conn(|conn| {
            let mut out = Vec::new();
            let mut queue = vec![hash.to_string()];

            while let Some(current) = queue.pop() {
                for child in children_of(conn, &current)? {
                    queue.push(child.hash.clone());
                    out.push(child);
                }
            }

            Ok(out)
        })
    }

    fn update_usage(&self, hash: &str, usage: &codec::Usage) -> DagResult<()> {
        self.with_conn(|conn| {
            let mut node =
                get_node(conn, hash)?.ok_or_else(|| DagError::NotFound(hash.to_string()))?;
            node.bucket.usage = usage.clone();

            let blob = serde_json::to_vec(&node.bucket)
                .map_err(|err| DagError::storage(format!("unencodable bucket: {err}")))?;

            conn.execute(
                "UPDATE nodes SET bucket = ?1 WHERE hash = ?2",
                params![blob, hash],
            )?;

            Ok(())
        })
    }

    fn close(&self) -> DagResult<()> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(conn) = guard.take()
            && let Err((_, err)) = conn.close()
        {
            return Err(DagError::storage(err));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use codec::{Message, Role, Usage};

    use crate::node::prefix_fingerprint;

    use super::*;

    fn turn(user: &str, assistant: &str) -> Bucket {
        Bucket {
            user_message: Message::from_text(Role::User, user),
            assistant_message: Message::from_text(Role::Assistant, assistant),
            provider: "ollama".into(),
            model: "llama3".into(),
            stop_reason: Some("stop".into()),
            usage: Usage::default(),
            created_at: jiff::Timestamp::UNIX_EPOCH,
            project: Some("demo".into()),
        }
    }

    #[test]
    fn nodes_round_trip_through_the_blob() {
        let store = SqliteStore::open_in_memory().unwrap();
        let node = DagNode::create(turn("hi", "hello"), None);

        assert_eq!(store.put(&node).unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put(&node).unwrap(), PutOutcome::Duplicate);

        let reloaded = store.get(&node.hash).unwrap().unwrap();
        assert_eq!(reloaded.hash, node.hash);
        assert_eq!(reloaded.bucket.user_message.text(), "hi");
        assert_eq!(reloaded.bucket.assistant_message.text(), "hello");
        assert_eq!(reloaded.bucket.project.as_deref(), Some("demo"));

        let usage = Usage {
            prompt_tokens: Some(5),
            completion_tokens: Some(3),
            total_tokens: Some(8),
            ..Default::default()
        };
        store.update_usage(&node.hash, &usage).unwrap();
        let backfilled = store.get(&node.hash).unwrap().unwrap();
        assert_eq!(backfilled.bucket.usage, usage);
    }

    #[test]
    fn prefix_resolution_spans_generations() {
        let store = SqliteStore::open_in_memory().unwrap();

        let root = DagNode::create(turn("hi", "hello"), None);
        store.put(&root).unwrap();

        let child = DagNode::create(turn("more", "sure"), Some(root.hash.clone()));
        store.put(&child).unwrap();

        // A request continuing the whole conversation resolves to the child.
        let prefix = prefix_fingerprint(&[
            Message::from_text(Role::User, "hi"),
            Message::from_text(Role::Assistant, "hello"),
            Message::from_text(Role::User, "more"),
            Message::from_text(Role::Assistant, "sure"),
        ]);

        let found = store
            .find_by_prefix(&prefix, &sha256_hex(b"and then?"))
            .unwrap()
            .unwrap();
        assert_eq!(found.hash, child.hash);
    }

    #[test]
    fn most_recent_match_wins() {
        let store = SqliteStore::open_in_memory().unwrap();

        // Two roots with identical conversations but different providers.
        let first = DagNode::create(turn("hi", "hello"), None);
        let mut second_bucket = turn("hi", "hello");
        second_bucket.provider = "openai".into();
        let second = DagNode::create(second_bucket, None);

        store.put(&first).unwrap();
        store.put(&second).unwrap();

        let prefix = prefix_fingerprint(&[
            Message::from_text(Role::User, "hi"),
            Message::from_text(Role::Assistant, "hello"),
        ]);

        let found = store
            .find_by_prefix(&prefix, &sha256_hex(b"more"))
            .unwrap()
            .unwrap();
        assert_eq!(found.hash, second.hash);
    }

    #[test]
    fn persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tapes.db");

        let node = DagNode::create(turn("hi", "hello"), None);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(&node).unwrap();
            store.close().unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get(&node.hash).unwrap().is_some());
    }

    #[test]
    fn closed_store_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.close().unwrap();

        assert!(store.get("anything").is_err());
    }
}
