//! Content addressing: node hashes and prefix fingerprints.
//!
//! A node's hash is deterministic in its bucket content plus its parent
//! hash, and deliberately covers only the provider-agnostic projection of
//! the exchange. The same logical turn therefore hashes identically no
//! matter which wire format carried it.

use codec::Message;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bucket::Bucket;

/// One element of the Merkle DAG: a bucket, its content address, and the
/// address of the turn it continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    /// Hex-encoded SHA-256 content address.
    pub hash: String,
    /// Address of the parent turn; `None` for conversation roots.
    #[serde(default)]
    pub parent_hash: Option<String>,
    pub bucket: Bucket,
}

impl DagNode {
    /// Build a node, deriving its hash from the bucket and parent.
    pub fn create(bucket: Bucket, parent_hash: Option<String>) -> Self {
        let hash = canonical_hash(&bucket, parent_hash.as_deref());

        Self {
            hash,
            parent_hash,
            bucket,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// The canonical hash of a turn: SHA-256 over the sorted-key JSON projection
/// of the bucket, concatenated with the parent hash (empty for roots).
///
/// The projection keeps only the fields every codec can reproduce, so two
/// captures of the same exchange in different wire formats collide on
/// purpose.
pub fn canonical_hash(bucket: &Bucket, parent_hash: Option<&str>) -> String {
    // serde_json maps are ordered by key, which makes this projection
    // deterministic without any explicit sorting step.
    let projection = serde_json::json!({
        "assistant_msg_role": bucket.assistant_message.role.as_str(),
        "assistant_msg_text": bucket.assistant_message.text(),
        "model": bucket.model,
        "provider": bucket.provider,
        "user_msg_role": bucket.user_message.role.as_str(),
        "user_msg_text": bucket.user_message.text(),
    });

    let mut hasher = Sha256::new();
    hasher.update(projection.to_string().as_bytes());
    hasher.update(parent_hash.unwrap_or_default().as_bytes());
    hex_encode(&hasher.finalize())
}

/// One message of a canonicalized prefix sequence: its role plus the SHA-256
/// of its textual projection. These are what `node_prefix` rows persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixEntry {
    pub role: String,
    pub text_sha: String,
}

impl PrefixEntry {
    pub fn for_message(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            text_sha: sha256_hex(message.text().as_bytes()),
        }
    }
}

/// Fingerprint of a message-history prefix, used to resolve a request's
/// parent node without any session identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixFingerprint {
    /// Digest over the whole canonical sequence.
    pub digest: String,
    /// The per-message entries the digest covers, in order.
    pub entries: Vec<PrefixEntry>,
}

/// Fingerprint the given messages (a request's history excluding its final
/// user turn).
pub fn prefix_fingerprint(messages: &[Message]) -> PrefixFingerprint {
    let entries: Vec<PrefixEntry> = messages.iter().map(PrefixEntry::for_message).collect();
    let digest = digest_entries(&entries);

    PrefixFingerprint { digest, entries }
}

/// Digest a canonical sequence of prefix entries.
pub fn digest_entries(entries: &[PrefixEntry]) -> String {
    let mut hasher = Sha256::new();

    for entry in entries {
        hasher.update(entry.role.as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.text_sha.as_bytes());
        hasher.update(b"\n");
    }

    hex_encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use codec::{Role, Usage};

    use super::*;

    fn bucket(provider: &str, model: &str, user: &str, assistant: &str) -> Bucket {
        Bucket {
            user_message: Message::from_text(Role::User, user),
            assistant_message: Message::from_text(Role::Assistant, assistant),
            provider: provider.into(),
            model: model.into(),
            stop_reason: None,
            usage: Usage::default(),
            created_at: jiff::Timestamp::UNIX_EPOCH,
            project: None,
        }
    }

    #[test]
    fn hash_ignores_wire_only_details() {
        let mut a = bucket("anthropic", "m", "hi", "hello");
        let b = bucket("anthropic", "m", "hi", "hello");

        // Usage and stop reason are wire details, not identity.
        a.usage.prompt_tokens = Some(99);
        a.stop_reason = Some("end_turn".into());

        assert_eq!(canonical_hash(&a, None), canonical_hash(&b, None));
    }

    #[test]
    fn hash_depends_on_provider_and_parent() {
        let anthropic = bucket("anthropic", "m", "hi", "hello");
        let openai = bucket("openai", "m", "hi", "hello");

        assert_ne!(canonical_hash(&anthropic, None), canonical_hash(&openai, None));
        assert_ne!(
            canonical_hash(&anthropic, None),
            canonical_hash(&anthropic, Some("abc123"))
        );
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        let forward = prefix_fingerprint(&[
            Message::from_text(Role::User, "one"),
            Message::from_text(Role::Assistant, "two"),
        ]);
        let reversed = prefix_fingerprint(&[
            Message::from_text(Role::Assistant, "two"),
            Message::from_text(Role::User, "one"),
        ]);

        assert_ne!(forward.digest, reversed.digest);
        assert_eq!(forward.entries.len(), 2);
    }

    #[test]
    fn empty_prefix_has_a_stable_digest() {
        let empty = prefix_fingerprint(&[]);
        assert_eq!(empty.entries.len(), 0);
        assert_eq!(empty.digest, digest_entries(&[]));
    }
}
