//! DirectoryTree: the VFS-style view over placements (spec.md §4.7). Unlike
//! `ContextTree`, which keys bitmaps per layer segment, `DirectoryTree` keys
//! one bitmap per *whole* normalized path string, scoped under a
//! configurable prefix (`vfs` by default) via `BitmapCollection` — the same
//! sub-collection mechanism `ContextTree`'s forward index rides on, reused
//! for a second, orthogonal view of the same OIDs.

use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::bitmap_index::{BitmapCollection, BitmapIndex};
use crate::context_tree::normalize_path;
use crate::error::Result;
use crate::events::Event;
use crate::Oid;

pub struct DirectoryTree {
    collection: BitmapCollection,
    events: Option<crossbeam_channel::Sender<Event>>,
}

/// `BitmapCollection` scopes keys as `"<prefix>/<key>"`; normalized paths
/// already start with `/`, so the key handed to it is the normalized path
/// with that leading slash stripped (root maps to the empty key).
fn vfs_key(path: &str) -> String {
    normalize_path(path).trim_start_matches('/').to_string()
}

impl DirectoryTree {
    pub fn new(bitmaps: Arc<BitmapIndex>, prefix: impl Into<String>, events: Option<crossbeam_channel::Sender<Event>>) -> DirectoryTree {
        DirectoryTree { collection: BitmapCollection::new(bitmaps, prefix), events }
    }

    fn emit(&self, event: Event) {
        if let Some(sender) = &self.events {
            let _ = sender.try_send(event);
        }
    }

    /// Ticks `oid` into the bitmap keyed by `path`'s full normalized form.
    pub fn insert_document(&self, oid: Oid, path: &str) -> Result<()> {
        self.collection.tick(&vfs_key(path), &[oid])
    }

    pub fn remove_document(&self, oid: Oid, path: &str) -> Result<bool> {
        self.collection.untick(&vfs_key(path), &[oid])
    }

    /// Single bitmap lookup at the exact normalized path.
    pub fn find(&self, path: &str) -> Result<Bitmap> {
        let key = vfs_key(path);
        Ok(self.collection.get(&key, false)?.unwrap_or_else(|| Bitmap::new(key)))
    }

    /// Unions every bitmap keyed at or under `path` into one result, via a
    /// prefix range scan rather than a tree walk (spec.md §4.7).
    pub fn find_recursive(&self, path: &str) -> Result<Bitmap> {
        let prefix = vfs_key(path);
        let mut result = Bitmap::new(format!("{prefix}*"));
        for key in self.collection.list_keys_with_prefix(&prefix)? {
            if let Some(bitmap) = self.collection.get(&key, false)? {
                result.union_with(&bitmap);
            }
        }
        Ok(result)
    }

    /// Unique next-level path segments directly under `parent`.
    pub fn list_directories(&self, parent: &str) -> Result<Vec<String>> {
        let prefix = vfs_key(parent);
        let depth = if prefix.is_empty() { 0 } else { prefix.split('/').count() };

        let mut seen = std::collections::BTreeSet::new();
        for key in self.collection.list_keys_with_prefix(&prefix)? {
            let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
            if let Some(next) = segments.get(depth) {
                seen.insert(next.to_string());
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// Renames every bitmap keyed at or under `from` to the equivalent key
    /// under `to`, preserving each bitmap's membership.
    pub fn move_directory(&self, from: &str, to: &str) -> Result<()> {
        let from_prefix = vfs_key(from);
        let to_prefix = vfs_key(to);
        for key in self.collection.list_keys_with_prefix(&from_prefix)? {
            let new_key = format!("{to_prefix}{}", &key[from_prefix.len()..]);
            self.collection.rename(&key, &new_key)?;
        }
        self.emit(Event::DirectoryMoved { from: normalize_path(from), to: normalize_path(to) });
        Ok(())
    }

    /// Deletes the bitmap at `path`, or every bitmap at/under it when
    /// `recursive` is set.
    pub fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let prefix = vfs_key(path);
        if recursive {
            for key in self.collection.list_keys_with_prefix(&prefix)? {
                self.collection.delete_key(&key)?;
            }
        } else {
            self.collection.delete_key(&prefix)?;
        }
        self.emit(Event::DirectoryDeleted { path: normalize_path(path) });
        Ok(())
    }
}
