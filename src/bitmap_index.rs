//! BitmapIndex: a keyed collection of bitmaps with a write-through cache
//! (spec.md §4.2). This is the engine's hot path — every placement, tag,
//! and query boils down to a handful of calls here.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::bitmap::Bitmap;
use crate::error::Result;
use crate::kv::{Dataset, KvStore};
use crate::Oid;

pub struct BitmapIndex {
    dataset: Box<dyn Dataset>,
    cache: RwLock<HashMap<String, Bitmap>>,
}

impl BitmapIndex {
    pub fn open(store: &dyn KvStore) -> Result<BitmapIndex> {
        Ok(BitmapIndex { dataset: store.dataset("bitmaps")?, cache: RwLock::new(HashMap::new()) })
    }

    /// Returns the bitmap for `key`, loading it from the store into the
    /// cache on a miss, or constructing an empty `static` bitmap when
    /// `auto_create` is set and nothing exists yet.
    pub fn get(&self, key: &str, auto_create: bool) -> Result<Option<Bitmap>> {
        if let Some(bitmap) = self.cache.read().get(key) {
            debug!("bitmap cache hit for `{key}`");
            return Ok(Some(bitmap.clone()));
        }

        if let Some(bytes) = self.dataset.get(key.as_bytes())? {
            debug!("bitmap cache miss for `{key}`, loaded from store");
            let bitmap = Bitmap::deserialize(key, &bytes)?;
            self.cache.write().insert(key.to_owned(), bitmap.clone());
            return Ok(Some(bitmap));
        }

        if auto_create {
            debug!("auto-creating empty static bitmap for `{key}`");
            let bitmap = Bitmap::new(key);
            self.cache.write().insert(key.to_owned(), bitmap.clone());
            Ok(Some(bitmap))
        } else {
            Ok(None)
        }
    }

    fn persist(&self, bitmap: &Bitmap) -> Result<()> {
        self.dataset.put(bitmap.key().as_bytes(), &bitmap.serialize())?;
        self.cache.write().insert(bitmap.key().to_owned(), bitmap.clone());
        Ok(())
    }

    /// Adds `oids` to the bitmap at `key`, creating it if missing, and
    /// writes the result through to cache and store.
    pub fn tick(&self, key: &str, oids: &[Oid]) -> Result<()> {
        let mut bitmap = self.get(key, true)?.expect("auto_create=true always returns Some");
        bitmap.insert_many(oids.iter().copied())?;
        self.persist(&bitmap)
    }

    /// Removes `oids` from the bitmap at `key`. Returns `false` without
    /// writing anything if the bitmap does not exist; otherwise persists
    /// the new state (including an empty bitmap).
    pub fn untick(&self, key: &str, oids: &[Oid]) -> Result<bool> {
        let mut bitmap = match self.get(key, false)? {
            Some(bitmap) => bitmap,
            None => return Ok(false),
        };
        bitmap.remove_many(oids.iter().copied());
        self.persist(&bitmap)?;
        Ok(true)
    }

    pub fn tick_many(&self, keys: &[String], oids: &[Oid]) -> Result<()> {
        for key in keys {
            self.tick(key, oids)?;
        }
        Ok(())
    }

    pub fn untick_many(&self, keys: &[String], oids: &[Oid]) -> Result<()> {
        for key in keys {
            self.untick(key, oids)?;
        }
        Ok(())
    }

    /// Removes `oid` from every bitmap in the collection. Used by
    /// `Synapses::clear_synapses` / `deleteDocument` to purge a document
    /// from the forward index without needing its layer set up front.
    pub fn delete(&self, oid: Oid) -> Result<()> {
        for key in self.all_keys()? {
            self.untick(&key, &[oid])?;
        }
        Ok(())
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        let keys = self.dataset.get_keys("".as_bytes().."\u{10FFFF}".as_bytes())?;
        Ok(keys.into_iter().filter_map(|k| String::from_utf8(k).ok()).collect())
    }

    /// In-order intersection; any missing key makes the whole result empty
    /// (spec.md §9(b) resolves the source's inconsistent short-circuit
    /// behavior in favor of this, stricter, reading).
    pub fn and(&self, keys: &[String]) -> Result<Bitmap> {
        if keys.is_empty() {
            return Ok(Bitmap::new("and-result"));
        }

        let mut acc: Option<Bitmap> = None;
        for key in keys {
            match self.get(key, false)? {
                Some(bitmap) => match acc.as_mut() {
                    Some(acc) => acc.intersect_with(&bitmap),
                    None => acc = Some(bitmap),
                },
                None => return Ok(Bitmap::new("and-result")),
            }
        }
        Ok(acc.unwrap_or_else(|| Bitmap::new("and-result")))
    }

    /// Union of every present bitmap; missing keys are simply skipped.
    pub fn or(&self, keys: &[String]) -> Result<Bitmap> {
        let mut result = Bitmap::new("or-result");
        for key in keys {
            if let Some(bitmap) = self.get(key, false)? {
                result.union_with(&bitmap);
            }
        }
        Ok(result)
    }

    /// Symmetric difference over every present, non-empty bitmap.
    pub fn xor(&self, keys: &[String]) -> Result<Bitmap> {
        let mut result = Bitmap::new("xor-result");
        for key in keys {
            if let Some(bitmap) = self.get(key, false)? {
                if !bitmap.is_empty() {
                    result.symmetric_difference_with(&bitmap);
                }
            }
        }
        Ok(result)
    }

    /// Drops the bitmap at `key` entirely — store entry and cache — rather
    /// than emptying its membership. Used by `deleteLayer` to remove the
    /// backing bitmap for a layer that no longer exists (spec.md §3
    /// Lifecycle), as distinct from `untick`, which leaves an (empty)
    /// bitmap behind for a key that is still meaningful.
    pub fn remove_key(&self, key: &str) -> Result<()> {
        self.dataset.remove(key.as_bytes())?;
        self.cache.write().remove(key);
        Ok(())
    }

    pub fn rename_bitmap(&self, old_key: &str, new_key: &str) -> Result<()> {
        if let Some(mut bitmap) = self.get(old_key, false)? {
            self.dataset.remove(old_key.as_bytes())?;
            self.cache.write().remove(old_key);
            bitmap = Bitmap::deserialize(new_key, &bitmap.serialize())?;
            self.persist(&bitmap)?;
        }
        Ok(())
    }

    /// Drops the in-memory cache without touching persisted state; state
    /// has already been written through on every mutation, so there is
    /// nothing to flush.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

/// The narrow capability `ContextTree` needs from `BitmapIndex` to
/// implement `mergeUp`/`mergeDown`/`subtractUp`/`subtractDown` (spec.md
/// §4.4, design note §9): the tree never sees the full `BitmapIndex` API,
/// and `BitmapIndex` never references the tree, breaking the cyclic
/// dependency the two components would otherwise have on each other.
pub trait LayerBitmaps: Send + Sync {
    fn members(&self, layer_id: uuid::Uuid) -> Result<Vec<Oid>>;
    fn union_members_into(&self, target: uuid::Uuid, members: &[Oid]) -> Result<()>;
    fn remove_members_from(&self, target: uuid::Uuid, members: &[Oid]) -> Result<()>;
}

impl LayerBitmaps for BitmapIndex {
    fn members(&self, layer_id: uuid::Uuid) -> Result<Vec<Oid>> {
        Ok(self.get(&layer_id.to_string(), false)?.map(|b| b.iter().collect()).unwrap_or_default())
    }

    fn union_members_into(&self, target: uuid::Uuid, members: &[Oid]) -> Result<()> {
        self.tick(&target.to_string(), members)
    }

    fn remove_members_from(&self, target: uuid::Uuid, members: &[Oid]) -> Result<()> {
        self.untick(&target.to_string(), members)?;
        Ok(())
    }
}

/// A namespaced view over a [`BitmapIndex`] that prefixes every key with
/// `"<prefix>/"`, used by `DirectoryTree` (spec.md §4.7) to keep its
/// per-path bitmaps out of the main layer/feature keyspace.
pub struct BitmapCollection {
    index: Arc<BitmapIndex>,
    prefix: String,
}

impl BitmapCollection {
    pub fn new(index: Arc<BitmapIndex>, prefix: impl Into<String>) -> BitmapCollection {
        BitmapCollection { index, prefix: prefix.into() }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }

    pub fn get(&self, key: &str, auto_create: bool) -> Result<Option<Bitmap>> {
        self.index.get(&self.scoped(key), auto_create)
    }

    pub fn tick(&self, key: &str, oids: &[Oid]) -> Result<()> {
        self.index.tick(&self.scoped(key), oids)
    }

    pub fn untick(&self, key: &str, oids: &[Oid]) -> Result<bool> {
        self.index.untick(&self.scoped(key), oids)
    }

    pub fn rename(&self, old_key: &str, new_key: &str) -> Result<()> {
        self.index.rename_bitmap(&self.scoped(old_key), &self.scoped(new_key))
    }

    pub fn delete_key(&self, key: &str) -> Result<()> {
        let scoped = self.scoped(key);
        self.index.dataset.remove(scoped.as_bytes())?;
        self.index.cache.write().remove(&scoped);
        Ok(())
    }

    /// Lists every key in this sub-collection (without the prefix),
    /// scanning the underlying dataset directly by key-byte-range.
    pub fn list_bitmaps(&self) -> Result<Vec<String>> {
        self.list_keys_with_prefix("")
    }

    /// Lists every key under `sub_prefix` within this collection (without
    /// either prefix), used by `DirectoryTree` to scan a single subtree
    /// instead of the whole VFS keyspace.
    ///
    /// Scans strictly at the `/`-separator boundary: `sub_prefix == "work"`
    /// matches `"work"` itself and anything under `"work/"`, never a
    /// byte-prefix sibling like `"workspace"`.
    pub fn list_keys_with_prefix(&self, sub_prefix: &str) -> Result<Vec<String>> {
        let full_prefix = format!("{}/", self.prefix);

        if sub_prefix.is_empty() {
            let end = format!("{full_prefix}\u{10FFFF}");
            let keys = self.index.dataset.get_keys(full_prefix.as_bytes()..end.as_bytes())?;
            return Ok(keys
                .into_iter()
                .filter_map(|k| String::from_utf8(k).ok())
                .filter_map(|k| k.strip_prefix(&full_prefix).map(str::to_owned))
                .collect());
        }

        let scoped_prefix = self.scoped(sub_prefix);
        let children_start = format!("{scoped_prefix}/");
        let children_end = format!("{children_start}\u{10FFFF}");

        let mut out = Vec::new();
        if self.index.get(&scoped_prefix, false)?.is_some() {
            out.push(sub_prefix.to_owned());
        }
        let keys = self.index.dataset.get_keys(children_start.as_bytes()..children_end.as_bytes())?;
        out.extend(
            keys.into_iter()
                .filter_map(|k| String::from_utf8(k).ok())
                .filter_map(|k| k.strip_prefix(&full_prefix).map(str::to_owned)),
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::HeedKvStore;

    fn open_index() -> (tempfile::TempDir, BitmapIndex) {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let index = BitmapIndex::open(&store).unwrap();
        (dir, index)
    }

    #[test]
    fn tick_and_get_round_trip() {
        let (_dir, index) = open_index();
        index.tick("work", &[100001, 100002]).unwrap();
        let bitmap = index.get("work", false).unwrap().unwrap();
        assert!(bitmap.contains(100001));
        assert!(bitmap.contains(100002));
    }

    #[test]
    fn untick_missing_bitmap_returns_false() {
        let (_dir, index) = open_index();
        assert!(!index.untick("missing", &[1]).unwrap());
    }

    #[test]
    fn and_short_circuits_to_empty_on_missing_key() {
        let (_dir, index) = open_index();
        index.tick("aaa", &[100001]).unwrap();
        let result = index.and(&["aaa".to_string(), "missing".to_string()]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn and_of_empty_key_list_is_empty() {
        let (_dir, index) = open_index();
        let result = index.and(&[]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn or_skips_missing_keys() {
        let (_dir, index) = open_index();
        index.tick("aaa", &[100001]).unwrap();
        let result = index.or(&["aaa".to_string(), "missing".to_string()]).unwrap();
        assert!(result.contains(100001));
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn delete_removes_oid_from_every_bitmap() {
        let (_dir, index) = open_index();
        index.tick("aaa", &[100001]).unwrap();
        index.tick("bbb", &[100001, 100002]).unwrap();
        index.delete(100001).unwrap();
        assert!(!index.get("aaa", false).unwrap().unwrap().contains(100001));
        assert!(!index.get("bbb", false).unwrap().unwrap().contains(100001));
        assert!(index.get("bbb", false).unwrap().unwrap().contains(100002));
    }

    #[test]
    fn remove_key_drops_store_and_cache() {
        let (_dir, index) = open_index();
        index.tick("aaa", &[100001]).unwrap();
        index.remove_key("aaa").unwrap();
        assert!(index.get("aaa", false).unwrap().is_none());
    }

    #[test]
    fn bitmap_collection_scopes_keys_by_prefix() {
        let (_dir, index) = open_index();
        let index = Arc::new(index);
        let vfs = BitmapCollection::new(index.clone(), "vfs");
        vfs.tick("work/notes", &[100001]).unwrap();

        assert!(index.get("vfs/work/notes", false).unwrap().unwrap().contains(100001));
        assert_eq!(vfs.list_bitmaps().unwrap(), vec!["work/notes".to_string()]);
    }

    #[test]
    fn list_keys_with_prefix_excludes_byte_prefix_sibling() {
        let (_dir, index) = open_index();
        let index = Arc::new(index);
        let vfs = BitmapCollection::new(index, "vfs");
        vfs.tick("work", &[100001]).unwrap();
        vfs.tick("work/notes", &[100002]).unwrap();
        vfs.tick("workspace", &[100003]).unwrap();
        vfs.tick("workspace/notes", &[100004]).unwrap();

        let mut keys = vfs.list_keys_with_prefix("work").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["work".to_string(), "work/notes".to_string()]);
    }
}
