//! Document and its metadata (spec.md §3). The document itself is an
//! opaque, schema-tagged payload; `synapsd` never interprets `data` beyond
//! what a registered [`crate::schema::SchemaHandler`] extracts from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Oid;

/// Lifecycle status of a document's metadata record.
///
/// `Active` and `Deleted` are the two states spec.md describes directly.
/// `Freed` is a supplemental third state (SPEC_FULL.md §3): the brief
/// window between `Synapses.clearSynapses` succeeding and `DocumentStore`
/// finishing its removal during `deleteDocument`, so a crash mid-delete
/// leaves a record that is clearly neither live nor silently orphaned, and
/// a subsequent open can finish the removal instead of treating the
/// leftover row as a real document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Active,
    Freed,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub status: DocumentStatus,
}

impl DocumentMetadata {
    pub fn new(now: DateTime<Utc>) -> DocumentMetadata {
        DocumentMetadata { created_at: now, updated_at: now, deleted_at: None, status: DocumentStatus::Active }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
        self.status = DocumentStatus::Deleted;
    }
}

/// Declares which fields of `data` feed checksum computation, full-text
/// extraction, and (future) embedding extraction, and which checksum
/// algorithms to run (spec.md §3, `indexOptions`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexOptions {
    #[serde(default)]
    pub checksum_algorithms: Vec<String>,
    #[serde(default)]
    pub checksum_fields: Vec<String>,
    #[serde(default)]
    pub search_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<Oid>,
    pub schema: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub checksum_array: Vec<String>,
    #[serde(default)]
    pub index_options: IndexOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_touch_updates_only_updated_at() {
        let created = Utc::now();
        let mut meta = DocumentMetadata::new(created);
        let later = created + chrono::Duration::seconds(5);
        meta.touch(later);
        assert_eq!(meta.created_at, created);
        assert_eq!(meta.updated_at, later);
        assert_eq!(meta.status, DocumentStatus::Active);
    }
}
