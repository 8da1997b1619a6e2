//! Hash-chain helpers: each event may commit to its project predecessor.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use vigil_types::ActionEvent;

/// The identity and content hash of the last event recorded for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub event_id: Uuid,
    pub content_hash: String,
}

impl ChainLink {
    /// The `parentEventHash` the next event should declare.
    pub fn expected_parent_hash(&self) -> String {
        chain_hash(&self.event_id, &self.content_hash)
    }

    /// Whether `event` declares a parent hash that disagrees with this link.
    /// Events without a declared parent hash never mismatch.
    pub fn mismatches(&self, event: &ActionEvent) -> bool {
        event
            .parent_event_hash
            .as_deref()
            .is_some_and(|declared| declared != self.expected_parent_hash())
    }
}

impl From<&ActionEvent> for ChainLink {
    fn from(event: &ActionEvent) -> Self {
        Self {
            event_id: event.id,
            content_hash: event.content_hash.clone(),
        }
    }
}

/// SHA-256 over the previous event's id followed by its content hash, hex encoded.
pub fn chain_hash(prev_event_id: &Uuid, prev_content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_event_id.to_string());
    hasher.update(prev_content_hash);
    hex::encode(hasher.finalize())
}
