//! ChecksumIndex: `"<algo>/<hex>" -> OID` map used for duplicate detection
//! at insert (spec.md §3, §4.1). Per-algorithm entries let a document carry
//! several checksums (e.g. `sha256` and a perceptual hash) and be found by
//! any of them.

use crate::error::Result;
use crate::kv::{Dataset, KvStore};
use crate::Oid;

pub struct ChecksumIndex {
    dataset: Box<dyn Dataset>,
}

impl ChecksumIndex {
    pub fn open(store: &dyn KvStore) -> Result<ChecksumIndex> {
        Ok(ChecksumIndex { dataset: store.dataset("checksums")? })
    }

    fn key(algorithm: &str, hex: &str) -> String {
        format!("{algorithm}/{hex}")
    }

    pub fn lookup(&self, algorithm: &str, hex: &str) -> Result<Option<Oid>> {
        match self.dataset.get(Self::key(algorithm, hex).as_bytes())? {
            Some(bytes) => Ok(Some(u32::from_be_bytes(bytes.try_into().map_err(|_| {
                crate::error::Error::internal("corrupt checksum index entry")
            })?))),
            None => Ok(None),
        }
    }

    /// Looks up every `"algo/hex"` pair in `checksums` and returns the first
    /// existing OID found, if any — used by the insert pipeline to detect a
    /// duplicate across the whole checksum array in one pass.
    pub fn find_existing(&self, checksums: &[(String, String)]) -> Result<Option<Oid>> {
        for (algorithm, hex) in checksums {
            if let Some(oid) = self.lookup(algorithm, hex)? {
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }

    pub fn insert(&self, algorithm: &str, hex: &str, oid: Oid) -> Result<()> {
        self.dataset.put(Self::key(algorithm, hex).as_bytes(), &oid.to_be_bytes())
    }

    pub fn insert_all(&self, checksums: &[(String, String)], oid: Oid) -> Result<()> {
        for (algorithm, hex) in checksums {
            self.insert(algorithm, hex, oid)?;
        }
        Ok(())
    }

    pub fn remove(&self, algorithm: &str, hex: &str) -> Result<()> {
        self.dataset.remove(Self::key(algorithm, hex).as_bytes())
    }

    pub fn remove_all(&self, checksums: &[(String, String)]) -> Result<()> {
        for (algorithm, hex) in checksums {
            self.remove(algorithm, hex)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::HeedKvStore;

    fn open() -> (tempfile::TempDir, ChecksumIndex) {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let index = ChecksumIndex::open(&store).unwrap();
        (dir, index)
    }

    #[test]
    fn insert_and_lookup_round_trip() {
        let (_dir, index) = open();
        index.insert("sha256", "abcd", 100001).unwrap();
        assert_eq!(index.lookup("sha256", "abcd").unwrap(), Some(100001));
        assert_eq!(index.lookup("sha256", "missing").unwrap(), None);
    }

    #[test]
    fn find_existing_checks_every_algorithm() {
        let (_dir, index) = open();
        index.insert("sha256", "abcd", 100001).unwrap();
        let checksums = vec![("md5".to_string(), "zzzz".to_string()), ("sha256".to_string(), "abcd".to_string())];
        assert_eq!(index.find_existing(&checksums).unwrap(), Some(100001));
    }

    #[test]
    fn remove_all_clears_every_entry() {
        let (_dir, index) = open();
        let checksums = vec![("sha256".to_string(), "abcd".to_string())];
        index.insert_all(&checksums, 100001).unwrap();
        index.remove_all(&checksums).unwrap();
        assert_eq!(index.lookup("sha256", "abcd").unwrap(), None);
    }
}
