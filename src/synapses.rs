//! Synapses: the reverse index from document id to every bitmap key it is
//! a member of (spec.md §4.5). Each entry mirrors exactly the set of forward
//! bitmaps an OID has been ticked into, whether that key names a layer (a
//! stringified layer id) or a bare feature label such as `client/os/linux`
//! — `BitmapIndex` treats both identically, so `Synapses` does too.

use std::sync::Arc;

use log::debug;

use crate::bitmap_index::BitmapIndex;
use crate::error::Result;
use crate::events::Event;
use crate::kv::{Dataset, KvStore};
use crate::Oid;

pub struct Synapses {
    dataset: Box<dyn Dataset>,
    bitmaps: Arc<BitmapIndex>,
    events: Option<crossbeam_channel::Sender<Event>>,
}

impl Synapses {
    pub fn open(
        store: &dyn KvStore,
        bitmaps: Arc<BitmapIndex>,
        events: Option<crossbeam_channel::Sender<Event>>,
    ) -> Result<Synapses> {
        Ok(Synapses { dataset: store.dataset("synapses")?, bitmaps, events })
    }

    /// Zero-padded so that key byte order (the store's iteration order)
    /// matches numeric OID order, the way `bitmap_codec`'s keys are kept
    /// sortable.
    fn key(oid: Oid) -> String {
        format!("{oid:010}")
    }

    pub fn get(&self, oid: Oid) -> Result<Vec<String>> {
        match self.dataset.get(Self::key(oid).as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self, oid: Oid, keys: &[String]) -> Result<()> {
        let bytes = serde_json::to_vec(keys)?;
        self.dataset.put(Self::key(oid).as_bytes(), &bytes)
    }

    /// Unions `keys` into the OID's synapse set and mirrors the membership
    /// into `BitmapIndex` so the two stay in lockstep (spec.md invariant:
    /// every forward bitmap containing `oid` keyed by `k` has `k` present in
    /// `Synapses(oid)`, and vice versa).
    pub fn create_synapses(&self, oid: Oid, keys: &[String]) -> Result<()> {
        let mut current = self.get(oid)?;
        let mut changed = false;
        for key in keys {
            if !current.contains(key) {
                current.push(key.clone());
                changed = true;
            }
        }
        if changed {
            current.sort();
            current.dedup();
            self.persist(oid, &current)?;
        }
        self.bitmaps.tick_many(keys, &[oid])?;
        debug!("synapses({oid}) now has {} keys", current.len());
        Ok(())
    }

    /// Batch form of [`Synapses::create_synapses`] used by the document
    /// insertion pipeline, which already has a `(oid, keys)` pair per
    /// document ready to go in one pass.
    pub fn create_synapses_from_docs(&self, entries: &[(Oid, Vec<String>)]) -> Result<()> {
        for (oid, keys) in entries {
            self.create_synapses(*oid, keys)?;
        }
        Ok(())
    }

    /// Removes `keys` from the OID's synapse set and unticks them from the
    /// mirrored bitmaps.
    pub fn remove_synapses(&self, oid: Oid, keys: &[String]) -> Result<()> {
        let mut current = self.get(oid)?;
        current.retain(|k| !keys.contains(k));
        self.persist(oid, &current)?;
        self.bitmaps.untick_many(keys, &[oid])?;
        Ok(())
    }

    /// Drops every synapse for `oid`, unticking it from each bitmap it was
    /// a member of. Used by `deleteDocument`.
    pub fn clear_synapses(&self, oid: Oid) -> Result<()> {
        let current = self.get(oid)?;
        if current.is_empty() {
            return Ok(());
        }
        self.bitmaps.untick_many(&current, &[oid])?;
        self.dataset.remove(Self::key(oid).as_bytes())?;
        self.emit(Event::DocumentRemoved { oid });
        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(sender) = &self.events {
            let _ = sender.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::HeedKvStore;

    fn open() -> (tempfile::TempDir, Synapses) {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let bitmaps = Arc::new(BitmapIndex::open(&store).unwrap());
        let synapses = Synapses::open(&store, bitmaps, None).unwrap();
        (dir, synapses)
    }

    #[test]
    fn create_synapses_mirrors_into_bitmaps() {
        let (_dir, synapses) = open();
        synapses.create_synapses(100001, &["work".to_string(), "client/os/linux".to_string()]).unwrap();
        let keys = synapses.get(100001).unwrap();
        assert_eq!(keys, vec!["client/os/linux".to_string(), "work".to_string()]);
        assert!(synapses.bitmaps.get("work", false).unwrap().unwrap().contains(100001));
    }

    #[test]
    fn create_synapses_is_idempotent_and_deduplicated() {
        let (_dir, synapses) = open();
        synapses.create_synapses(100001, &["work".to_string()]).unwrap();
        synapses.create_synapses(100001, &["work".to_string(), "home".to_string()]).unwrap();
        assert_eq!(synapses.get(100001).unwrap(), vec!["home".to_string(), "work".to_string()]);
    }

    #[test]
    fn clear_synapses_unticks_every_bitmap() {
        let (_dir, synapses) = open();
        synapses.create_synapses(100001, &["work".to_string(), "home".to_string()]).unwrap();
        synapses.clear_synapses(100001).unwrap();
        assert!(synapses.get(100001).unwrap().is_empty());
        assert!(!synapses.bitmaps.get("work", false).unwrap().unwrap().contains(100001));
    }
}
