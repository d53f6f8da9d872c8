//! Full-text search adapter boundary (SPEC_FULL.md §4.9). spec.md treats
//! FTS as an external collaborator the pipeline calls into without owning;
//! this module gives that collaborator a trait seam with two concrete
//! implementations, the way `milli`'s tokenizer pipeline is pluggable
//! behind `meilisearch_tokenizer::Analyzer` rather than hardcoded.

use crate::error::Result;
use crate::Oid;

pub trait FtsAdapter: Send + Sync {
    fn insert(&self, oid: Oid, fields: &[String]) -> Result<()>;
    fn remove(&self, oid: Oid) -> Result<()>;

    /// `limit` caps the number of hits returned; `None` means unbounded
    /// (spec.md line 33's `search(query, limit)`).
    fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<Oid>>;
}

/// No-op adapter: `insertDocument`/`deleteDocument` still call into it, but
/// it never indexes anything and `search` always returns empty. The default
/// when no FTS backend is configured.
pub struct NullFtsAdapter;

impl FtsAdapter for NullFtsAdapter {
    fn insert(&self, _oid: Oid, _fields: &[String]) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _oid: Oid) -> Result<()> {
        Ok(())
    }

    fn search(&self, _query: &str, _limit: Option<usize>) -> Result<Vec<Oid>> {
        Ok(Vec::new())
    }
}

/// In-memory substring-match adapter, useful for tests and small indices
/// without pulling in a real text-search engine.
#[derive(Default)]
pub struct MemoryFtsAdapter {
    entries: parking_lot::RwLock<std::collections::HashMap<Oid, String>>,
}

impl MemoryFtsAdapter {
    pub fn new() -> MemoryFtsAdapter {
        MemoryFtsAdapter::default()
    }
}

impl FtsAdapter for MemoryFtsAdapter {
    fn insert(&self, oid: Oid, fields: &[String]) -> Result<()> {
        self.entries.write().insert(oid, fields.join(" ").to_lowercase());
        Ok(())
    }

    fn remove(&self, oid: Oid) -> Result<()> {
        self.entries.write().remove(&oid);
        Ok(())
    }

    fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<Oid>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<Oid> =
            self.entries.read().iter().filter(|(_, text)| text.contains(&needle)).map(|(oid, _)| *oid).collect();
        hits.sort();
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_adapter_finds_substring_matches() {
        let fts = MemoryFtsAdapter::new();
        fts.insert(100001, &["Quarterly Report".to_string()]).unwrap();
        fts.insert(100002, &["Shopping List".to_string()]).unwrap();
        assert_eq!(fts.search("report", None).unwrap(), vec![100001]);
    }

    #[test]
    fn memory_adapter_remove_clears_entry() {
        let fts = MemoryFtsAdapter::new();
        fts.insert(100001, &["Quarterly Report".to_string()]).unwrap();
        fts.remove(100001).unwrap();
        assert!(fts.search("report", None).unwrap().is_empty());
    }

    #[test]
    fn memory_adapter_search_respects_limit() {
        let fts = MemoryFtsAdapter::new();
        fts.insert(100001, &["Quarterly Report A".to_string()]).unwrap();
        fts.insert(100002, &["Quarterly Report B".to_string()]).unwrap();
        fts.insert(100003, &["Quarterly Report C".to_string()]).unwrap();
        assert_eq!(fts.search("report", Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn null_adapter_never_matches() {
        let fts = NullFtsAdapter;
        fts.insert(100001, &["anything".to_string()]).unwrap();
        assert!(fts.search("anything", None).unwrap().is_empty());
    }
}
