//! Query composer: turns a `(contextSpec, featureArray, filterArray)`
//! triple into a result bitmap, then materializes it to documents
//! (spec.md §4.6, steps 1-5; §9 design note (d) is normative here).

use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::bitmap_index::BitmapIndex;
use crate::context_tree::{path_segments, ContextTree};
use crate::document::Document;
use crate::document_store::DocumentStore;
use crate::error::Result;
use crate::layer_index::LayerIndex;
use crate::schema::SchemaRegistry;
use crate::timestamp::{matching_oids, DatetimeFilter, TimestampOracle};
use crate::Oid;

/// A single path, or several independent paths OR'd together (spec.md
/// §4.6 step 1: "a single path produces one layer array; an array produces
/// multiple independent layer arrays").
#[derive(Debug, Clone)]
pub enum ContextSpec {
    Path(String),
    Paths(Vec<String>),
}

/// One entry of `filterArray` after `parseFilters` has sorted it into its
/// bitmap-filter and datetime-filter halves (spec.md §4.6 step 2).
#[derive(Debug, Clone)]
pub enum FilterTerm {
    Bitmap(String),
    Datetime(DatetimeFilter),
}

impl FilterTerm {
    pub fn parse(raw: &str) -> Result<FilterTerm> {
        if raw.starts_with("datetime:") {
            Ok(FilterTerm::Datetime(DatetimeFilter::parse(raw)?))
        } else {
            Ok(FilterTerm::Bitmap(raw.to_string()))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// When true, materialized documents are reconstituted through the
    /// `SchemaRegistry` instead of being returned as raw stored objects.
    pub parse: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub context: Option<ContextSpec>,
    pub features: Vec<String>,
    pub filters: Vec<String>,
    pub options: QueryOptions,
}

/// Splits `filterArray` into bitmap filters (appended to features for AND
/// application) and datetime filters, per spec.md §4.6 step 2.
pub fn parse_filters(raw: &[String]) -> Result<(Vec<String>, Vec<DatetimeFilter>)> {
    let mut bitmap_filters = Vec::new();
    let mut datetime_filters = Vec::new();
    for entry in raw {
        match FilterTerm::parse(entry)? {
            FilterTerm::Bitmap(key) => bitmap_filters.push(key),
            FilterTerm::Datetime(filter) => datetime_filters.push(filter),
        }
    }
    Ok((bitmap_filters, datetime_filters))
}

/// Groups `keys` by their first `/`-delimited segment (a namespace like
/// `client/os`) and takes OR within a group, AND across groups (spec.md
/// §4.6 step 3, binding per §9(d)). An empty input contributes identity:
/// `None` means "no restriction" rather than "match nothing".
fn feature_bitmap(bitmaps: &BitmapIndex, keys: &[String]) -> Result<Option<Bitmap>> {
    if keys.is_empty() {
        return Ok(None);
    }

    let mut groups: indexmap::IndexMap<&str, Vec<String>> = indexmap::IndexMap::new();
    for key in keys {
        let namespace = key.split('/').next().unwrap_or(key);
        groups.entry(namespace).or_default().push(key.clone());
    }

    let mut result: Option<Bitmap> = None;
    for members in groups.values() {
        let group_bitmap = bitmaps.or(members)?;
        match result.as_mut() {
            Some(acc) => acc.intersect_with(&group_bitmap),
            None => result = Some(group_bitmap),
        }
    }
    Ok(result)
}

/// Resolves `context` into the bitmap of OIDs placed under it (spec.md
/// §4.6 step 1). `None`/empty context means "the full universe", realized
/// here as every OID ever placed at the root layer rather than a literal
/// enumeration of `DocumentStore` — the same reading spec.md gives
/// `contextSpec = '/'` explicitly ("returns every OID ever placed at
/// root").
fn context_bitmap(bitmaps: &BitmapIndex, layers: &LayerIndex, _tree: &ContextTree, context: Option<&ContextSpec>) -> Result<Option<Bitmap>> {
    let paths: Vec<String> = match context {
        None => return Ok(None),
        Some(ContextSpec::Path(path)) => vec![path.clone()],
        Some(ContextSpec::Paths(paths)) => paths.clone(),
    };

    let mut result = Bitmap::new("context-result");
    for path in &paths {
        let segments = path_segments(path);
        if segments.is_empty() {
            // Explicit root: every OID placed at the universe layer.
            if let Some(root_bitmap) = bitmaps.get(&layers.root_id().to_string(), false)? {
                result.union_with(&root_bitmap);
            }
            continue;
        }

        let mut keys = Vec::with_capacity(segments.len());
        let mut all_resolved = true;
        for segment in &segments {
            match layers.get_by_name(segment)? {
                Some(layer) => keys.push(layer.id.to_string()),
                None => {
                    all_resolved = false;
                    break;
                }
            }
        }

        if all_resolved {
            let and_result = bitmaps.and(&keys)?;
            result.union_with(&and_result);
        }
        // An unresolved segment contributes nothing to the OR, matching
        // `BitmapIndex::and`'s short-circuit-to-empty for a missing key.
    }
    Ok(Some(result))
}

/// Evaluates every datetime filter against stored metadata and ANDs the
/// per-filter matches together (spec.md §4.6 step 4).
fn datetime_bitmap(documents: &DocumentStore, oracle: &dyn TimestampOracle, filters: &[DatetimeFilter]) -> Result<Option<Bitmap>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let all_metadata = documents.all_metadata()?;
    let mut result: Option<Bitmap> = None;
    for filter in filters {
        let mut bitmap = Bitmap::new("datetime-result");
        let matches: Vec<Oid> = matching_oids(oracle, filter, all_metadata.iter().map(|(oid, meta)| (*oid, meta)));
        bitmap.insert_many(matches)?;
        match result.as_mut() {
            Some(acc) => acc.intersect_with(&bitmap),
            None => result = Some(bitmap),
        }
    }
    Ok(result)
}

/// Composes the final result bitmap: `context AND features AND datetime`
/// (spec.md §4.6 step 5), treating every absent term as identity so a bare
/// `QueryRequest::default()` returns the full universe.
pub fn compose(
    bitmaps: &BitmapIndex,
    layers: &LayerIndex,
    tree: &ContextTree,
    documents: &DocumentStore,
    oracle: &dyn TimestampOracle,
    request: &QueryRequest,
) -> Result<Bitmap> {
    let (bitmap_filters, datetime_filters) = parse_filters(&request.filters)?;
    let mut feature_keys = request.features.clone();
    feature_keys.extend(bitmap_filters);

    let context = context_bitmap(bitmaps, layers, tree, request.context.as_ref())?;
    let features = feature_bitmap(bitmaps, &feature_keys)?;
    let datetime = datetime_bitmap(documents, oracle, &datetime_filters)?;

    let mut terms = [context, features, datetime].into_iter().flatten();
    let mut result = match terms.next() {
        Some(first) => first,
        None => return universe_bitmap(documents),
    };
    for term in terms {
        result.intersect_with(&term);
    }
    Ok(result)
}

/// Every currently active document OID, used when `context`, `features`,
/// and `filters` are all absent (spec.md §4.6 step 1: "the full universe").
fn universe_bitmap(documents: &DocumentStore) -> Result<Bitmap> {
    let mut bitmap = Bitmap::new("universe-result");
    for (oid, _) in documents.all_metadata()? {
        bitmap.insert(oid)?;
    }
    Ok(bitmap)
}

/// Materializes a result bitmap into stored documents, applying
/// `options.limit` and, when `options.parse` is set, round-tripping each
/// document's data through its registered schema handler.
pub fn materialize(
    documents: &DocumentStore,
    registry: &SchemaRegistry,
    bitmap: &Bitmap,
    options: &QueryOptions,
) -> Result<Vec<Document>> {
    let mut out = Vec::new();
    for oid in bitmap.iter() {
        if let Some(limit) = options.limit {
            if out.len() >= limit {
                break;
            }
        }
        if let Some(mut document) = documents.get(oid)? {
            if options.parse {
                let reparsed = registry.with_handler(&document.schema, |handler| {
                    let bytes = handler.to_serialized(&document.data)?;
                    handler.from_serialized(&bytes)
                })?;
                document.data = reparsed;
            }
            out.push(document);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::HeedKvStore;
    use crate::layer::LayerType;
    use crate::timestamp::ChronoTimestampOracle;
    use chrono::Utc;

    struct Harness {
        _dir: tempfile::TempDir,
        bitmaps: Arc<BitmapIndex>,
        layers: Arc<LayerIndex>,
        tree: ContextTree,
        documents: DocumentStore,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let bitmaps = Arc::new(BitmapIndex::open(&store).unwrap());
        let layers = Arc::new(LayerIndex::open(&store).unwrap());
        let tree = ContextTree::open(&store, layers.clone(), bitmaps.clone(), None).unwrap();
        let documents = DocumentStore::open(&store).unwrap();
        Harness { _dir: dir, bitmaps, layers, tree, documents }
    }

    fn place(h: &Harness, oid: Oid, path: &str) {
        let outcome = h.tree.insert_path(path);
        let keys: Vec<String> = outcome.data.iter().map(|id| id.to_string()).collect();
        h.bitmaps.tick_many(&keys, &[oid]).unwrap();
        h.documents
            .put(&Document {
                id: Some(oid),
                schema: "generic".to_string(),
                data: serde_json::json!({}),
                metadata: None,
                checksum_array: vec![],
                index_options: Default::default(),
            })
            .unwrap();
        h.documents.put_metadata(oid, &crate::document::DocumentMetadata::new(Utc::now())).unwrap();
    }

    #[test]
    fn context_path_intersects_all_segments() {
        let h = harness();
        place(&h, 100001, "/work/projectA");
        place(&h, 100002, "/work/projectB");

        let request = QueryRequest { context: Some(ContextSpec::Path("/work/projectA".to_string())), ..Default::default() };
        let oracle = ChronoTimestampOracle;
        let result = compose(&h.bitmaps, &h.layers, &h.tree, &h.documents, &oracle, &request).unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![100001]);
    }

    #[test]
    fn feature_groups_or_within_and_across_namespaces() {
        let h = harness();
        h.bitmaps.tick("client/os/linux", &[100001, 100002]).unwrap();
        h.bitmaps.tick("client/os/mac", &[100003]).unwrap();
        h.bitmaps.tick("region/eu", &[100001]).unwrap();
        h.bitmaps.tick("region/us", &[100002]).unwrap();

        let request = QueryRequest {
            features: vec!["client/os/linux".to_string(), "client/os/mac".to_string(), "region/eu".to_string()],
            ..Default::default()
        };
        let oracle = ChronoTimestampOracle;
        let result = feature_bitmap(&h.bitmaps, &request.features).unwrap().unwrap();
        // OR within `client/os` -> {1,2,3}; AND with `region/eu` -> {1}.
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![100001]);
        let _ = oracle;
    }

    #[test]
    fn empty_request_returns_full_universe() {
        let h = harness();
        place(&h, 100001, "/work");
        place(&h, 100002, "/personal");

        let request = QueryRequest::default();
        let oracle = ChronoTimestampOracle;
        let mut result = compose(&h.bitmaps, &h.layers, &h.tree, &h.documents, &oracle, &request)
            .unwrap()
            .iter()
            .collect::<Vec<_>>();
        result.sort();
        assert_eq!(result, vec![100001, 100002]);
    }

    #[test]
    fn root_context_returns_everything_placed_at_root() {
        let h = harness();
        h.tree.insert_path("/");
        let root_key = h.layers.root_id().to_string();
        h.bitmaps.tick(&root_key, &[100001]).unwrap();

        let request = QueryRequest { context: Some(ContextSpec::Path("/".to_string())), ..Default::default() };
        let oracle = ChronoTimestampOracle;
        let result = compose(&h.bitmaps, &h.layers, &h.tree, &h.documents, &oracle, &request).unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![100001]);
    }

    #[test]
    fn unresolved_context_path_contributes_nothing() {
        let h = harness();
        place(&h, 100001, "/work");

        let request = QueryRequest {
            context: Some(ContextSpec::Paths(vec!["/work".to_string(), "/nonexistent/path".to_string()])),
            ..Default::default()
        };
        let oracle = ChronoTimestampOracle;
        let result = compose(&h.bitmaps, &h.layers, &h.tree, &h.documents, &oracle, &request).unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![100001]);
    }
}
