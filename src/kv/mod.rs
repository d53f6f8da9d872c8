//! KV Store Adapter (spec.md §4.1, §6).
//!
//! The indexing engine is written against the [`KvStore`]/[`Dataset`] trait
//! boundary rather than against LMDB directly, the way `milli`'s `Index`
//! is written against `heed`'s typed `Database` handles rather than against
//! raw LMDB. [`heed_store::HeedKvStore`] is the one shipped implementation;
//! swapping it for another ordered KV engine only requires implementing
//! these two traits.

mod heed_store;

pub use heed_store::HeedKvStore;

use std::ops::Range;

use crate::error::Result;

/// One named, ordered key/value collection within a [`KvStore`].
///
/// All keys and values are opaque byte strings; callers (the typed
/// components built on top, e.g. `BitmapIndex`, `LayerIndex`) own the
/// encoding. Iteration order follows key byte order, matching LMDB's
/// native ordering and the "strict async order" guarantee of spec.md §4.1:
/// within a single logical actor, a read observes the last write issued
/// for that key.
pub trait Dataset: Send + Sync {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Durable write, ordered with respect to other writes on this dataset.
    /// The KV contract distinguishes `put` (logically asynchronous) from
    /// `put_sync`; both are committed before returning here because the
    /// engine runs single-process and cooperative (spec.md §5) rather than
    /// against a remote store where the distinction would matter.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Synchronous write used on the OID counter critical section and any
    /// other call site that must observe the write before proceeding.
    fn put_sync(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<()>;

    fn does_exist(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inclusive-exclusive range scan over keys, returned in key order.
    fn get_range(&self, range: Range<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Same as [`Dataset::get_range`] but keys only, for prefix/listing scans.
    fn get_keys(&self, range: Range<&[u8]>) -> Result<Vec<Vec<u8>>> {
        Ok(self.get_range(range)?.into_iter().map(|(k, _)| k).collect())
    }

    /// Drops every entry in the dataset.
    fn clear(&self) -> Result<()>;
}

/// A single physical store exposing many named [`Dataset`]s plus the one
/// cross-dataset primitive the engine needs: an atomic single-key
/// read-increment-write used for OID allocation (spec.md §5).
pub trait KvStore: Send + Sync {
    /// Opens (creating if absent) the named dataset.
    fn dataset(&self, name: &str) -> Result<Box<dyn Dataset>>;

    /// Runs `f` inside one atomic write transaction against `dataset_name`,
    /// giving `f` the dataset's current raw value for `key` (`None` if
    /// absent) and committing whatever `f` returns as the new value, unless
    /// `f` returns `Err`, in which case the transaction is rolled back.
    ///
    /// This is the one synchronous critical section the concurrency model
    /// (spec.md §5) requires; it backs [`crate::id_allocator::IdAllocator`].
    fn transaction_sync(
        &self,
        dataset_name: &str,
        key: &[u8],
        f: &mut dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>>,
    ) -> Result<Vec<u8>>;

    /// Snapshots the whole store to `path`. `compact` requests a compacted
    /// copy where the backend supports it (LMDB's `mdb_env_copy2` with the
    /// `MDB_CP_COMPACT` flag for [`HeedKvStore`]).
    fn backup(&self, path: &std::path::Path, compact: bool) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}
