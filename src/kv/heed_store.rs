use std::ops::Range;
use std::path::Path;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use parking_lot::RwLock;

use crate::error::{DatabaseError, Error, Result};
use crate::kv::{Dataset, KvStore};

/// Every dataset named in the persisted layout (spec.md §6) is opened
/// eagerly so that the fixed LMDB `max_dbs` budget is known up front, the
/// way `milli`'s `Index::new` opens its handful of named databases once at
/// construction rather than on first use.
const KNOWN_DATASETS: &[&str] = &[
    "documents",
    "metadata",
    "checksums",
    "synapses",
    "bitmaps",
    "layers",
    "tree",
    "internal",
];

/// LMDB-backed [`KvStore`] built on `heed`: one `heed::Env`, several named
/// `heed::Database`s, explicit `RwTxn`/`RoTxn` scoping per call.
pub struct HeedKvStore {
    env: Env,
    databases: RwLock<std::collections::HashMap<String, Database<Str, Bytes>>>,
}

impl HeedKvStore {
    /// Opens (creating if absent) an LMDB environment at `path` with room
    /// for every known dataset plus a handful of headroom slots for
    /// `BitmapCollection` prefix-scoped sub-datasets opened later.
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<HeedKvStore> {
        std::fs::create_dir_all(&path).map_err(DatabaseError::from)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(map_size);
        options.max_dbs(KNOWN_DATASETS.len() as u32 + 16);

        // SAFETY: `HeedKvStore` owns this environment for its whole
        // lifetime and nothing else opens a concurrent writer on `path`
        // from this process, per the single-writer discipline of
        // spec.md §5.
        let env = unsafe { options.open(path.as_ref()) }.map_err(DatabaseError::from)?;

        let store = HeedKvStore { env, databases: RwLock::new(std::collections::HashMap::new()) };
        for name in KNOWN_DATASETS {
            store.open_database(name)?;
        }

        Ok(store)
    }

    fn open_database(&self, name: &str) -> Result<Database<Str, Bytes>> {
        if let Some(db) = self.databases.read().get(name) {
            return Ok(*db);
        }

        let mut wtxn = self.env.write_txn().map_err(DatabaseError::from)?;
        let db: Database<Str, Bytes> =
            self.env.create_database(&mut wtxn, Some(name)).map_err(DatabaseError::from)?;
        wtxn.commit().map_err(DatabaseError::from)?;

        self.databases.write().insert(name.to_owned(), db);
        Ok(db)
    }
}

struct HeedDataset {
    env: Env,
    db: Database<Str, Bytes>,
}

impl Dataset for HeedDataset {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(DatabaseError::from)?;
        let key = std::str::from_utf8(key).map_err(|e| Error::internal(e.to_string()))?;
        let value = self.db.get(&rtxn, key).map_err(DatabaseError::from)?;
        Ok(value.map(<[u8]>::to_vec))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(DatabaseError::from)?;
        let key = std::str::from_utf8(key).map_err(|e| Error::internal(e.to_string()))?;
        self.db.put(&mut wtxn, key, value).map_err(DatabaseError::from)?;
        wtxn.commit().map_err(DatabaseError::from)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(DatabaseError::from)?;
        let key = std::str::from_utf8(key).map_err(|e| Error::internal(e.to_string()))?;
        self.db.delete(&mut wtxn, key).map_err(DatabaseError::from)?;
        wtxn.commit().map_err(DatabaseError::from)?;
        Ok(())
    }

    fn get_range(&self, range: Range<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rtxn = self.env.read_txn().map_err(DatabaseError::from)?;
        let start = std::str::from_utf8(range.start).map_err(|e| Error::internal(e.to_string()))?;
        let end = std::str::from_utf8(range.end).map_err(|e| Error::internal(e.to_string()))?;

        let mut out = Vec::new();
        for result in self.db.range(&rtxn, &(start..end)).map_err(DatabaseError::from)? {
            let (k, v) = result.map_err(DatabaseError::from)?;
            out.push((k.as_bytes().to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn clear(&self) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(DatabaseError::from)?;
        self.db.clear(&mut wtxn).map_err(DatabaseError::from)?;
        wtxn.commit().map_err(DatabaseError::from)?;
        Ok(())
    }
}

impl KvStore for HeedKvStore {
    fn dataset(&self, name: &str) -> Result<Box<dyn Dataset>> {
        let db = self.open_database(name)?;
        Ok(Box::new(HeedDataset { env: self.env.clone(), db }))
    }

    fn transaction_sync(
        &self,
        dataset_name: &str,
        key: &[u8],
        f: &mut dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let db = self.open_database(dataset_name)?;
        let key = std::str::from_utf8(key).map_err(|e| Error::internal(e.to_string()))?;

        // A single write transaction is LMDB's atomic unit: opening one
        // here blocks every other writer on the environment until commit,
        // which is exactly the synchronous critical section spec.md §5
        // requires for OID allocation.
        let mut wtxn = self.env.write_txn().map_err(DatabaseError::from)?;
        let current = db.get(&wtxn, key).map_err(DatabaseError::from)?.map(<[u8]>::to_vec);
        let next = f(current)?;
        db.put(&mut wtxn, key, &next).map_err(DatabaseError::from)?;
        wtxn.commit().map_err(DatabaseError::from)?;
        Ok(next)
    }

    fn backup(&self, path: &Path, compact: bool) -> Result<()> {
        std::fs::create_dir_all(path).map_err(DatabaseError::from)?;
        let option =
            if compact { heed::CompactionOption::Enabled } else { heed::CompactionOption::Disabled };
        self.env.copy_to_path(path, option).map_err(DatabaseError::from)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Dropping the last `Env` handle triggers `heed`'s own close;
        // nothing else to do synchronously here.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let ds = store.dataset("documents").unwrap();

        assert_eq!(ds.get(b"100001").unwrap(), None);
        ds.put(b"100001", b"{}").unwrap();
        assert_eq!(ds.get(b"100001").unwrap(), Some(b"{}".to_vec()));
        assert!(ds.does_exist(b"100001").unwrap());

        ds.remove(b"100001").unwrap();
        assert_eq!(ds.get(b"100001").unwrap(), None);
    }

    #[test]
    fn range_scan_is_key_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let ds = store.dataset("bitmaps").unwrap();

        ds.put(b"vfs/a", b"1").unwrap();
        ds.put(b"vfs/b", b"2").unwrap();
        ds.put(b"other/c", b"3").unwrap();

        let scanned = ds.get_range(b"vfs/".as_ref()..b"vfs0".as_ref()).unwrap();
        let keys: Vec<_> = scanned.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"vfs/a".to_vec(), b"vfs/b".to_vec()]);
    }

    #[test]
    fn transaction_sync_is_atomic_read_modify_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();

        let mut bump = |current: Option<Vec<u8>>| -> Result<Vec<u8>> {
            let n = current.map(|b| u32::from_be_bytes(b.try_into().unwrap())).unwrap_or(0);
            Ok((n + 1).to_be_bytes().to_vec())
        };

        let first = store.transaction_sync("internal", b"counter", &mut bump).unwrap();
        let second = store.transaction_sync("internal", b"counter", &mut bump).unwrap();
        assert_eq!(u32::from_be_bytes(first.try_into().unwrap()), 1);
        assert_eq!(u32::from_be_bytes(second.try_into().unwrap()), 2);
    }
}
