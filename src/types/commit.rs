use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// a snapshot of a root tree with at most one parent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Hash>,
    pub subject: String,
    /// unix timestamp (seconds since epoch)
    pub timestamp: i64,
    /// BTreeMap keeps the encoding deterministic
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Commit {
    pub fn new(tree: Hash, parent: Option<Hash>, subject: impl Into<String>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::with_timestamp(tree, parent, subject, timestamp)
    }

    pub fn with_timestamp(
        tree: Hash,
        parent: Option<Hash>,
        subject: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            tree,
            parent,
            subject: subject.into(),
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// first commit on its ref
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
