//! SynapsD: an embedded document index built around a context tree of
//! globally unique layer bitmaps (spec.md §1). Documents are stored once
//! and re-viewed through overlapping classifications at query time —
//! contexts (tree paths), features (auxiliary labels), and datetime
//! predicates compose into one roaring bitmap that is then materialized
//! back to documents.
//!
//! The crate is organized as narrow, single-purpose modules under one
//! facade struct ([`SynapsD`]) that owns every collaborator and wires
//! them together, rather than a god object doing the work itself.

pub mod bitmap;
pub mod bitmap_codec;
pub mod bitmap_index;
pub mod checksum;
pub mod checksum_index;
pub mod config;
pub mod context_tree;
pub mod directory_tree;
pub mod document;
pub mod document_store;
pub mod error;
pub mod events;
pub mod fts;
pub mod id_allocator;
pub mod kv;
pub mod layer;
pub mod layer_index;
pub mod query;
pub mod schema;
pub mod synapses;
pub mod timestamp;

use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::bitmap_index::BitmapIndex;
use crate::checksum_index::ChecksumIndex;
use crate::config::SynapsdOptions;
use crate::context_tree::ContextTree;
use crate::directory_tree::DirectoryTree;
use crate::document::{Document, DocumentMetadata};
use crate::document_store::DocumentStore;
use crate::error::{DuplicateError, NotFoundError, Result, ValidationError};
use crate::events::Event;
use crate::fts::{FtsAdapter, NullFtsAdapter};
use crate::id_allocator::IdAllocator;
use crate::kv::{HeedKvStore, KvStore};
use crate::layer_index::LayerIndex;
use crate::query::{compose, materialize, ContextSpec, QueryRequest};
use crate::schema::SchemaRegistry;
use crate::synapses::Synapses;
use crate::timestamp::{ChronoTimestampOracle, TimestampOracle};

/// Document identifier: an unsigned 32-bit integer allocated above
/// [`INTERNAL_BITMAP_ID_MAX`] (spec.md §3).
pub type Oid = u32;

/// IDs below this value are reserved for internal/system bitmap use and
/// are never handed out by [`id_allocator::IdAllocator`] (spec.md §3).
pub const INTERNAL_BITMAP_ID_MAX: u32 = 100_000;

fn context_paths(context: &ContextSpec) -> Vec<String> {
    match context {
        ContextSpec::Path(p) => vec![p.clone()],
        ContextSpec::Paths(ps) => ps.clone(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// spec.md §9(a): duplicate checksum collisions return the existing
    /// OID by default; `strict` opts into raising [`error::DuplicateError`]
    /// instead.
    pub strict: bool,
}

/// The top-level facade tying every component together as the crate's
/// "one big struct" entry point. Cheap to clone (every field is an
/// `Arc`), `Send + Sync`, matching spec.md §5's requirement that the
/// engine is usable from a single process without extra synchronization
/// at this layer.
#[derive(Clone)]
pub struct SynapsD {
    store: Arc<dyn KvStore>,
    options: SynapsdOptions,
    bitmaps: Arc<BitmapIndex>,
    layers: Arc<LayerIndex>,
    tree: Arc<ContextTree>,
    synapses: Arc<Synapses>,
    checksums: Arc<ChecksumIndex>,
    documents: Arc<DocumentStore>,
    directory_tree: Arc<DirectoryTree>,
    schema_registry: Arc<SchemaRegistry>,
    fts: Arc<dyn FtsAdapter>,
    timestamps: Arc<dyn TimestampOracle>,
    events: Option<crossbeam_channel::Sender<Event>>,
}

impl SynapsD {
    /// Opens (creating if absent) a workspace at `options.path` with the
    /// default collaborators: an LMDB-backed [`HeedKvStore`], a no-op FTS
    /// adapter, [`ChronoTimestampOracle`], and a bare [`SchemaRegistry`]
    /// (callers must `register` a handler, or [`schema::GenericSchema`],
    /// for every `schema` tag they intend to insert — unregistered tags
    /// raise `ValidationError::UnknownSchema`).
    pub fn open(options: SynapsdOptions) -> Result<SynapsD> {
        SynapsD::open_with(options, Arc::new(NullFtsAdapter), Arc::new(ChronoTimestampOracle), Arc::new(SchemaRegistry::new()), None)
    }

    /// Full constructor for callers that need a real FTS backend, a fixed
    /// clock for testing, a pre-populated [`SchemaRegistry`], or an event
    /// subscriber (spec.md §4.11).
    pub fn open_with(
        options: SynapsdOptions,
        fts: Arc<dyn FtsAdapter>,
        timestamps: Arc<dyn TimestampOracle>,
        schema_registry: Arc<SchemaRegistry>,
        events: Option<crossbeam_channel::Sender<Event>>,
    ) -> Result<SynapsD> {
        let store: Arc<dyn KvStore> = Arc::new(HeedKvStore::open(&options.path, options.map_size)?);

        let bitmaps = Arc::new(BitmapIndex::open(store.as_ref())?);
        let layers = Arc::new(LayerIndex::open(store.as_ref())?);
        let tree = Arc::new(ContextTree::open(store.as_ref(), layers.clone(), bitmaps.clone(), events.clone())?);
        let synapses = Arc::new(Synapses::open(store.as_ref(), bitmaps.clone(), events.clone())?);
        let checksums = Arc::new(ChecksumIndex::open(store.as_ref())?);
        let documents = Arc::new(DocumentStore::open(store.as_ref())?);
        let directory_tree = Arc::new(DirectoryTree::new(bitmaps.clone(), options.vfs_prefix.clone(), events.clone()));

        Ok(SynapsD {
            store,
            options,
            bitmaps,
            layers,
            tree,
            synapses,
            checksums,
            documents,
            directory_tree,
            schema_registry,
            fts,
            timestamps,
            events,
        })
    }

    pub fn bitmaps(&self) -> &BitmapIndex {
        &self.bitmaps
    }

    pub fn layers(&self) -> &LayerIndex {
        &self.layers
    }

    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    pub fn synapses(&self) -> &Synapses {
        &self.synapses
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn directory_tree(&self) -> &DirectoryTree {
        &self.directory_tree
    }

    pub fn schema_registry(&self) -> &SchemaRegistry {
        &self.schema_registry
    }

    fn emit(&self, event: Event) {
        if let Some(sender) = &self.events {
            let _ = sender.try_send(event);
        }
    }

    /// Inserts `document`, placing it at every path in `context` and
    /// tagging it with `features` (spec.md §4.6 steps 1-7).
    ///
    /// A checksum collision with an existing document returns that
    /// document's OID unchanged (no bitmap/FTS/Synapses mutation) unless
    /// `insert_options.strict` is set, in which case it raises
    /// [`error::DuplicateError`] (spec.md §9(a)).
    pub fn insert_document(
        &self,
        mut document: Document,
        context: Option<ContextSpec>,
        features: &[String],
        insert_options: InsertOptions,
    ) -> Result<Oid> {
        self.schema_registry.with_handler(&document.schema, |handler| handler.validate(&document.data))?;

        let checksums = self.schema_registry.with_handler(&document.schema, |handler| {
            crate::checksum::compute(handler, &document.data, &document.index_options)
        })?;

        if !checksums.is_empty() {
            if let Some(existing) = self.checksums.find_existing(&checksums)? {
                if insert_options.strict || self.options.strict_insert {
                    return Err(DuplicateError::Checksum {
                        checksum: format!("{}/{}", checksums[0].0, checksums[0].1),
                        existing,
                    }
                    .into());
                }
                info!("insert_document: checksum collision, returning existing document {existing}");
                return Ok(existing);
            }
        }

        let oid = IdAllocator::new(self.store.as_ref()).next_id()?;
        document.id = Some(oid);
        document.checksum_array = checksums.iter().map(|(algo, hex)| format!("{algo}/{hex}")).collect();

        self.documents.put(&document)?;
        self.documents.put_metadata(oid, &DocumentMetadata::new(Utc::now()))?;
        self.checksums.insert_all(&checksums, oid)?;

        let mut placement_keys: Vec<String> = features.to_vec();
        if let Some(context) = &context {
            for path in context_paths(context) {
                let outcome = self.tree.insert_path(&path);
                if !outcome.is_ok() {
                    return Err(ValidationError::InvalidPath(path).into());
                }
                placement_keys.extend(outcome.data.iter().map(|id| id.to_string()));
            }
        }
        self.synapses.create_synapses(oid, &placement_keys)?;

        let search_fields = self
            .schema_registry
            .with_handler(&document.schema, |handler| handler.extract_search_fields(&document.data, &document.index_options))
            .unwrap_or_default();
        if !search_fields.is_empty() {
            self.fts.insert(oid, &search_fields)?;
        }

        self.emit(Event::DocumentInserted { oid, checksum: document.checksum_array.first().cloned().unwrap_or_default() });
        info!("inserted document {oid} (schema `{}`)", document.schema);
        Ok(oid)
    }

    /// Re-validates and rewrites `document` (which must carry its assigned
    /// `id`). Checksums are recomputed and any stale checksum entries are
    /// replaced. Bitmap placement is untouched unless `context` is
    /// supplied, in which case the additional placement is applied —
    /// never an implicit removal (spec.md §4.6 "Update").
    pub fn update_document(&self, mut document: Document, context: Option<ContextSpec>, features: &[String]) -> Result<()> {
        let oid = document.id.ok_or_else(|| ValidationError::Other("update_document requires an assigned id".to_string()))?;
        if !self.documents.contains(oid)? {
            return Err(NotFoundError::Document(oid).into());
        }

        self.schema_registry.with_handler(&document.schema, |handler| handler.validate(&document.data))?;

        let old_checksums: Vec<(String, String)> = self
            .documents
            .get(oid)?
            .map(|old| old.checksum_array.iter().filter_map(|entry| entry.split_once('/')).map(|(a, b)| (a.to_string(), b.to_string())).collect())
            .unwrap_or_default();
        self.checksums.remove_all(&old_checksums)?;

        let new_checksums = self
            .schema_registry
            .with_handler(&document.schema, |handler| crate::checksum::compute(handler, &document.data, &document.index_options))?;
        self.checksums.insert_all(&new_checksums, oid)?;
        document.checksum_array = new_checksums.iter().map(|(algo, hex)| format!("{algo}/{hex}")).collect();

        if let Some(mut metadata) = self.documents.get_metadata(oid)? {
            metadata.touch(Utc::now());
            self.documents.put_metadata(oid, &metadata)?;
        }
        self.documents.put(&document)?;

        let search_fields = self
            .schema_registry
            .with_handler(&document.schema, |handler| handler.extract_search_fields(&document.data, &document.index_options))
            .unwrap_or_default();
        if !search_fields.is_empty() {
            self.fts.insert(oid, &search_fields)?;
        }

        let mut placement_keys: Vec<String> = features.to_vec();
        if let Some(context) = &context {
            for path in context_paths(context) {
                let outcome = self.tree.insert_path(&path);
                if !outcome.is_ok() {
                    return Err(ValidationError::InvalidPath(path).into());
                }
                placement_keys.extend(outcome.data.iter().map(|id| id.to_string()));
            }
        }
        if !placement_keys.is_empty() {
            self.synapses.create_synapses(oid, &placement_keys)?;
        }

        self.emit(Event::DocumentUpdated { oid });
        Ok(())
    }

    /// Removes `oid` from the given context/features without deleting the
    /// document itself (spec.md §4.6 "RemoveDocument"). Resolves context
    /// paths to layer ids the same way `insert_document` does.
    pub fn remove_document(&self, oid: Oid, context: Option<ContextSpec>, features: &[String]) -> Result<()> {
        let mut keys: Vec<String> = features.to_vec();
        if let Some(context) = &context {
            for path in context_paths(context) {
                keys.extend(self.tree.path_to_layer_ids(&path)?.iter().map(|id| id.to_string()));
            }
        }
        self.synapses.remove_synapses(oid, &keys)?;
        Ok(())
    }

    /// Purges `oid` from every bitmap, `Synapses`, `ChecksumIndex`, FTS,
    /// and `DocumentStore` (spec.md §4.6 "DeleteDocument", §3 invariant 6).
    /// Marks the metadata record `Freed` first so a crash mid-delete can be
    /// resumed idempotently (SPEC_FULL.md §3). Also runs a full-collection
    /// `BitmapIndex::delete` sweep after `clear_synapses`, so a bitmap
    /// membership that `oid`'s own Synapses entry never recorded — e.g.
    /// written before a crash interrupted the insert — is purged too
    /// (spec.md §5 self-healing deletion).
    pub fn delete_document(&self, oid: Oid) -> Result<()> {
        if let Some(mut metadata) = self.documents.get_metadata(oid)? {
            metadata.status = crate::document::DocumentStatus::Freed;
            self.documents.put_metadata(oid, &metadata)?;
        }

        self.synapses.clear_synapses(oid)?;
        self.bitmaps.delete(oid)?;

        if let Some(document) = self.documents.get(oid)? {
            let checksums: Vec<(String, String)> =
                document.checksum_array.iter().filter_map(|entry| entry.split_once('/')).map(|(a, b)| (a.to_string(), b.to_string())).collect();
            self.checksums.remove_all(&checksums)?;
        }

        self.fts.remove(oid)?;
        self.documents.remove(oid)?;
        self.emit(Event::DocumentDeleted { oid });
        info!("deleted document {oid}");
        Ok(())
    }

    /// Composes `request` into a result bitmap and materializes it to
    /// documents (spec.md §4.6 steps 1-5).
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<Document>> {
        let bitmap = compose(&self.bitmaps, &self.layers, &self.tree, &self.documents, self.timestamps.as_ref(), request)?;
        materialize(&self.documents, &self.schema_registry, &bitmap, &request.options)
    }

    /// Destroys `name`'s layer outright: drops its backing bitmap, every
    /// tree node referencing it (anywhere in the tree, not just one path),
    /// and finally the `LayerIndex` record itself (spec.md §3 Lifecycle,
    /// §8 scenario 5). Refuses the root layer and any locked layer, the
    /// same guards `LayerIndex::remove_layer` applies on its own.
    pub fn delete_layer(&self, name: &str) -> Result<()> {
        let layer = self.layers.get_by_name(name)?.ok_or_else(|| NotFoundError::LayerByName(name.to_string()))?;
        if layer.is_root() {
            return Err(ValidationError::RootLayer.into());
        }
        if layer.locked {
            return Err(crate::error::LockedError::Layer(layer.name.clone()).into());
        }

        self.tree.drop_layer(layer.id);
        self.bitmaps.remove_key(&layer.id.to_string())?;
        self.layers.remove_layer(name)?;

        self.emit(Event::LayerRemoved { id: layer.id, name: layer.name.clone() });
        info!("deleted layer `{}` ({})", layer.name, layer.id);
        Ok(())
    }

    pub fn backup(&self, path: &std::path::Path, compact: bool) -> Result<()> {
        self.store.backup(path, compact)
    }
}

/// Re-exported so callers building a [`query::QueryRequest`] don't need to
/// reach into the `query` module directly for the common case.
pub use query::QueryOptions as Options;
