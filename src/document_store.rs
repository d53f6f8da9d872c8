//! DocumentStore: the primary OID -> document dataset, plus its sibling
//! OID -> metadata dataset (spec.md §4.8, §6 persisted layout). Both are
//! keyed the same way `Synapses` keys its entries — zero-padded decimal —
//! so range scans (used by the datetime oracle and by backup/debug
//! tooling) come back in OID order for free.

use log::debug;

use crate::document::{Document, DocumentMetadata};
use crate::error::Result;
use crate::kv::{Dataset, KvStore};
use crate::Oid;

fn key(oid: Oid) -> String {
    format!("{oid:010}")
}

pub struct DocumentStore {
    documents: Box<dyn Dataset>,
    metadata: Box<dyn Dataset>,
}

impl DocumentStore {
    pub fn open(store: &dyn KvStore) -> Result<DocumentStore> {
        Ok(DocumentStore { documents: store.dataset("documents")?, metadata: store.dataset("metadata")? })
    }

    pub fn get(&self, oid: Oid) -> Result<Option<Document>> {
        match self.documents.get(key(oid).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, document: &Document) -> Result<()> {
        let oid = document.id.expect("document must carry an assigned id before being stored");
        let bytes = serde_json::to_vec(document)?;
        self.documents.put(key(oid).as_bytes(), &bytes)?;
        debug!("document {oid} persisted ({} bytes)", bytes.len());
        Ok(())
    }

    pub fn remove(&self, oid: Oid) -> Result<()> {
        self.documents.remove(key(oid).as_bytes())?;
        self.metadata.remove(key(oid).as_bytes())
    }

    pub fn contains(&self, oid: Oid) -> Result<bool> {
        self.documents.does_exist(key(oid).as_bytes())
    }

    pub fn get_metadata(&self, oid: Oid) -> Result<Option<DocumentMetadata>> {
        match self.metadata.get(key(oid).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_metadata(&self, oid: Oid, metadata: &DocumentMetadata) -> Result<()> {
        let bytes = serde_json::to_vec(metadata)?;
        self.metadata.put(key(oid).as_bytes(), &bytes)
    }

    /// Every `(oid, metadata)` pair currently on record, in OID order — the
    /// set the datetime oracle evaluates each filter against (spec.md §4.6
    /// step 4). This crate does not maintain a secondary timestamp index;
    /// a full scan of `metadata` is the straightforward reading of "external
    /// collaborator" datetime helpers operating over stored documents.
    pub fn all_metadata(&self) -> Result<Vec<(Oid, DocumentMetadata)>> {
        let mut out = Vec::new();
        for (raw_key, value) in self.metadata.get_range("0000000000".as_bytes().."9999999999".as_bytes())? {
            let key_str = String::from_utf8(raw_key).map_err(|e| crate::error::Error::internal(e.to_string()))?;
            let oid: Oid = key_str.parse().map_err(|e: std::num::ParseIntError| crate::error::Error::internal(e.to_string()))?;
            out.push((oid, serde_json::from_slice(&value)?));
        }
        Ok(out)
    }

    /// Number of documents currently stored (spec.md §8 scenario 3:
    /// "`DocumentStore.size` unchanged" after a duplicate insert).
    pub fn len(&self) -> Result<usize> {
        Ok(self.documents.get_range("0000000000".as_bytes().."9999999999".as_bytes())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentStatus, IndexOptions};
    use crate::kv::HeedKvStore;
    use chrono::Utc;

    fn open() -> (tempfile::TempDir, DocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        (dir, DocumentStore::open(&store).unwrap())
    }

    fn doc(oid: Oid) -> Document {
        Document {
            id: Some(oid),
            schema: "generic".to_string(),
            data: serde_json::json!({"title": "hello"}),
            metadata: None,
            checksum_array: Vec::new(),
            index_options: IndexOptions::default(),
        }
    }

    #[test]
    fn put_get_remove_round_trip() {
        let (_dir, documents) = open();
        documents.put(&doc(100001)).unwrap();
        assert!(documents.contains(100001).unwrap());
        assert_eq!(documents.get(100001).unwrap().unwrap().data, serde_json::json!({"title": "hello"}));

        let metadata = DocumentMetadata::new(Utc::now());
        documents.put_metadata(100001, &metadata).unwrap();
        assert_eq!(documents.get_metadata(100001).unwrap().unwrap().status, DocumentStatus::Active);

        documents.remove(100001).unwrap();
        assert!(!documents.contains(100001).unwrap());
        assert!(documents.get_metadata(100001).unwrap().is_none());
    }

    #[test]
    fn len_tracks_stored_documents() {
        let (_dir, documents) = open();
        assert_eq!(documents.len().unwrap(), 0);
        documents.put(&doc(100001)).unwrap();
        documents.put(&doc(100002)).unwrap();
        assert_eq!(documents.len().unwrap(), 2);
    }

    #[test]
    fn all_metadata_scans_in_oid_order() {
        let (_dir, documents) = open();
        documents.put_metadata(100002, &DocumentMetadata::new(Utc::now())).unwrap();
        documents.put_metadata(100001, &DocumentMetadata::new(Utc::now())).unwrap();
        let all = documents.all_metadata().unwrap();
        assert_eq!(all.iter().map(|(oid, _)| *oid).collect::<Vec<_>>(), vec![100001, 100002]);
    }
}
