//! ContextTree: the hierarchical view over layers (spec.md §4.4). A
//! `TreeNode` is purely structural — it holds a layer id and an ordered map
//! of children; the layer's actual payload (name, type, metadata, ...) lives
//! in `LayerIndex` and is always looked up by id. This means cloning or
//! moving a node around the tree never touches the layer it points to.

mod path;

pub use path::{normalize_path, path_segments};

use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bitmap_index::LayerBitmaps;
use crate::error::{LockedError, NotFoundError, PathOpOutcome, Result, ValidationError};
use crate::events::Event;
use crate::kv::{Dataset, KvStore};
use crate::layer::LayerType;
use crate::layer_index::LayerIndex;

const TREE_SNAPSHOT_KEY: &[u8] = b"tree";

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: Uuid,
    pub children: IndexMap<Uuid, TreeNode>,
}

impl TreeNode {
    fn new(id: Uuid) -> TreeNode {
        TreeNode { id, children: IndexMap::new() }
    }

    fn clone_subtree(&self, recursive: bool) -> TreeNode {
        if !recursive {
            return TreeNode::new(self.id);
        }
        TreeNode {
            id: self.id,
            children: self.children.iter().map(|(id, child)| (*id, child.clone_subtree(true))).collect(),
        }
    }

    fn navigate<'a>(&'a self, ids: &[Uuid]) -> Option<&'a TreeNode> {
        match ids.split_first() {
            None => Some(self),
            Some((head, rest)) => self.children.get(head).and_then(|child| child.navigate(rest)),
        }
    }

    fn navigate_mut<'a>(&'a mut self, ids: &[Uuid]) -> Option<&'a mut TreeNode> {
        match ids.split_first() {
            None => Some(self),
            Some((head, rest)) => self.children.get_mut(head).and_then(|child| child.navigate_mut(rest)),
        }
    }
}

/// The on-disk shape of a node: layer fields flattened in alongside the
/// structural id, so the whole tree can be rebuilt (and inspected) without a
/// second round trip through `LayerIndex` for every node.
#[derive(Serialize, Deserialize)]
struct PersistedNode {
    id: Uuid,
    #[serde(rename = "type")]
    kind: LayerType,
    name: String,
    label: String,
    description: String,
    color: Option<String>,
    locked: bool,
    children: Vec<PersistedNode>,
}

pub struct ContextTree {
    dataset: Box<dyn Dataset>,
    layers: Arc<LayerIndex>,
    bitmaps: Arc<dyn LayerBitmaps>,
    root: RwLock<TreeNode>,
    events: Option<crossbeam_channel::Sender<Event>>,
}

impl ContextTree {
    /// Opens the tree dataset and reconstructs the in-memory shape from the
    /// last persisted snapshot, if any. Nodes whose layer no longer exists
    /// are dropped with a warning; nodes whose stored id no longer matches
    /// `LayerIndex`'s id for that name are re-keyed to the index's id, which
    /// always wins (spec.md §4.4, "index wins on id mismatch").
    pub fn open(
        store: &dyn KvStore,
        layers: Arc<LayerIndex>,
        bitmaps: Arc<dyn LayerBitmaps>,
        events: Option<crossbeam_channel::Sender<Event>>,
    ) -> Result<ContextTree> {
        let dataset = store.dataset("tree")?;
        let root = match dataset.get(TREE_SNAPSHOT_KEY)? {
            Some(bytes) => {
                let persisted: PersistedNode = serde_json::from_slice(&bytes)?;
                rebuild(&persisted, &layers)
            }
            None => TreeNode::new(layers.root_id()),
        };

        Ok(ContextTree { dataset, layers, bitmaps, root: RwLock::new(root), events })
    }

    fn emit(&self, event: Event) {
        if let Some(sender) = &self.events {
            let _ = sender.try_send(event);
        }
    }

    fn persist(&self) -> Result<()> {
        let root = self.root.read();
        let persisted = flatten(&root, &self.layers)?;
        let bytes = serde_json::to_vec(&persisted)?;
        self.dataset.put(TREE_SNAPSHOT_KEY, &bytes)
    }

    /// Resolves `path` against both `LayerIndex` (name -> id) and the tree's
    /// actual structure, auto-creating layers (never tree positions) along
    /// the way when `auto_create` is set.
    fn resolve_ids(&self, path: &str, auto_create: bool) -> Result<Vec<Uuid>> {
        let segments = path_segments(path);
        let mut ids = Vec::with_capacity(segments.len());
        for segment in &segments {
            let id = if auto_create {
                self.layers.create_layer(LayerType::Context, segment)?.id
            } else {
                self.layers
                    .get_by_name(segment)?
                    .ok_or_else(|| NotFoundError::PathSegment { path: path.to_string(), segment: segment.clone() })?
                    .id
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// Layer ids for every segment of `path`, in order, requiring the path
    /// to already exist both as layers and as attached tree nodes.
    pub fn path_to_layer_ids(&self, path: &str) -> Result<Vec<Uuid>> {
        let ids = self.resolve_ids(path, false)?;
        let root = self.root.read();
        if root.navigate(&ids).is_none() {
            return Err(NotFoundError::PathSegment { path: path.to_string(), segment: path.to_string() }.into());
        }
        Ok(ids)
    }

    pub fn path_exists(&self, path: &str) -> bool {
        normalize_path(path) == "/" || self.path_to_layer_ids(path).is_ok()
    }

    /// Creates every missing layer and tree position along `path`, returning
    /// the resolved chain of layer ids.
    pub fn insert_path(&self, path: &str) -> PathOpOutcome<Vec<Uuid>> {
        let ids = match self.resolve_ids(path, true) {
            Ok(ids) => ids,
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };

        {
            let mut root = self.root.write();
            let mut cur = &mut *root;
            for id in &ids {
                cur = cur.children.entry(*id).or_insert_with(|| TreeNode::new(*id));
            }
        }

        if let Err(e) = self.persist() {
            return PathOpOutcome::failed(e.to_string());
        }
        self.emit(Event::TreePathInserted { path: normalize_path(path) });
        PathOpOutcome::ok(ids.clone(), ids.len())
    }

    /// Moves the node at `from` under the node at `to`, without cloning its
    /// subtree. Forbids moving the root and moving a locked layer; with
    /// `recursive`, extends the lock check to the whole subtree being moved.
    pub fn move_path(&self, from: &str, to: &str, recursive: bool) -> PathOpOutcome<()> {
        if normalize_path(from) == "/" {
            return PathOpOutcome::failed("cannot move the root path");
        }

        let from_ids = match self.resolve_ids(from, false) {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => return PathOpOutcome::failed("cannot move the root path"),
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };
        let to_ids = match self.resolve_ids(to, true) {
            Ok(ids) => ids,
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };

        let mut root = self.root.write();
        let (parent_ids, &moved_id) = (&from_ids[..from_ids.len() - 1], from_ids.last().unwrap());

        let source_parent = match root.navigate(parent_ids) {
            Some(node) => node,
            None => return PathOpOutcome::failed(format!("path `{from}` does not exist")),
        };
        let node = match source_parent.children.get(&moved_id) {
            Some(node) => node.clone(),
            None => return PathOpOutcome::failed(format!("path `{from}` does not exist")),
        };

        if self.any_locked(&node, recursive) {
            return PathOpOutcome::failed(format!("`{from}` contains a locked layer"));
        }

        if root.navigate(&to_ids).and_then(|dest| dest.children.get(&moved_id)).is_none() {
            let dest = match root.navigate_mut(&to_ids) {
                Some(node) => node,
                None => return PathOpOutcome::failed(format!("path `{to}` does not exist")),
            };
            dest.children.insert(node.id, node);
        }

        if let Some(parent) = root.navigate_mut(parent_ids) {
            parent.children.shift_remove(&moved_id);
        }
        drop(root);

        if let Err(e) = self.persist() {
            return PathOpOutcome::failed(e.to_string());
        }
        self.emit(Event::TreePathMoved { from: normalize_path(from), to: normalize_path(to) });
        PathOpOutcome::ok((), 1)
    }

    fn any_locked(&self, node: &TreeNode, recursive: bool) -> bool {
        let is_locked = |id: Uuid| self.layers.get_by_id(id).map(|l| l.locked).unwrap_or(false);
        if is_locked(node.id) {
            return true;
        }
        if recursive {
            return node.children.values().any(|child| self.any_locked(child, true));
        }
        false
    }

    /// Attaches a structural copy of the node at `from` under `to`. The copy
    /// shares layer identity by reference (only the `TreeNode` shape is
    /// duplicated); re-parenting onto a destination that already has a
    /// child with the same id is a no-op (spec.md §9(c)).
    pub fn copy_path(&self, from: &str, to: &str, recursive: bool) -> PathOpOutcome<Vec<Uuid>> {
        if normalize_path(from) == "/" {
            return PathOpOutcome::failed("cannot copy the root path");
        }

        let from_ids = match self.resolve_ids(from, false) {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => return PathOpOutcome::failed("cannot copy the root path"),
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };
        let to_ids = match self.resolve_ids(to, true) {
            Ok(ids) => ids,
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };

        let mut root = self.root.write();
        let source = match root.navigate(&from_ids) {
            Some(node) => node.clone_subtree(recursive),
            None => return PathOpOutcome::failed(format!("path `{from}` does not exist")),
        };
        let dest = match root.navigate_mut(&to_ids) {
            Some(node) => node,
            None => return PathOpOutcome::failed(format!("path `{to}` does not exist")),
        };
        dest.children.entry(source.id).or_insert(source);
        drop(root);

        if let Err(e) = self.persist() {
            return PathOpOutcome::failed(e.to_string());
        }
        self.emit(Event::TreePathCopied { from: normalize_path(from), to: normalize_path(to) });
        PathOpOutcome::ok(to_ids.clone(), to_ids.len())
    }

    /// Detaches the node at `path`. When `recursive` is false and the node
    /// has children, they are re-parented onto the grandparent instead of
    /// being dropped; otherwise the whole subtree goes with it.
    pub fn remove_path(&self, path: &str, recursive: bool) -> PathOpOutcome<()> {
        if normalize_path(path) == "/" {
            return PathOpOutcome::failed("cannot remove the root path");
        }

        let ids = match self.resolve_ids(path, false) {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => return PathOpOutcome::failed("cannot remove the root path"),
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };

        {
            let mut root = self.root.write();
            let (parent_ids, &last_id) = (&ids[..ids.len() - 1], ids.last().unwrap());
            let parent = match root.navigate_mut(parent_ids) {
                Some(node) => node,
                None => return PathOpOutcome::failed(format!("path `{path}` does not exist")),
            };
            if let Some(node) = parent.children.shift_remove(&last_id) {
                if !recursive {
                    for (child_id, child_node) in node.children {
                        parent.children.entry(child_id).or_insert(child_node);
                    }
                }
            } else {
                return PathOpOutcome::failed(format!("path `{path}` does not exist"));
            }
        }

        if let Err(e) = self.persist() {
            return PathOpOutcome::failed(e.to_string());
        }
        self.emit(Event::TreePathRemoved { path: normalize_path(path) });
        PathOpOutcome::ok((), 1)
    }

    /// Drops every tree node referencing `layer_id`, anywhere in the tree,
    /// not just at one path (spec.md §3 Lifecycle: `deleteLayer` "removes
    /// ... any tree nodes referencing it"; §8 scenario 5). Unlike
    /// `remove_path`, children of a dropped node are not re-parented — the
    /// layer itself is gone, so any node naming it cannot survive under a
    /// different ancestor either.
    pub fn drop_layer(&self, layer_id: Uuid) -> PathOpOutcome<usize> {
        let mut root = self.root.write();
        let removed = drop_matching(&mut root, layer_id);
        drop(root);

        if removed > 0 {
            if let Err(e) = self.persist() {
                return PathOpOutcome::failed(e.to_string());
            }
        }
        PathOpOutcome::ok(removed, removed)
    }

    pub fn lock_path(&self, path: &str, by: &str) -> PathOpOutcome<()> {
        let ids = match self.path_to_layer_ids(path) {
            Ok(ids) => ids,
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };
        for id in &ids {
            if let Err(e) = self.layers.lock_by_id(*id, by) {
                return PathOpOutcome::failed(e.to_string());
            }
        }
        self.emit(Event::TreePathLocked { path: normalize_path(path), by: by.to_string() });
        PathOpOutcome::ok((), ids.len())
    }

    pub fn unlock_path(&self, path: &str, by: &str) -> PathOpOutcome<()> {
        let ids = match self.path_to_layer_ids(path) {
            Ok(ids) => ids,
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };
        for id in &ids {
            if let Err(e) = self.layers.unlock_by_id(*id, by) {
                return PathOpOutcome::failed(e.to_string());
            }
        }
        self.emit(Event::TreePathUnlocked { path: normalize_path(path), by: by.to_string() });
        PathOpOutcome::ok((), ids.len())
    }

    /// Unions the leaf layer's bitmap members up into every ancestor along
    /// `path`, so membership at the leaf is visible at every coarser layer.
    pub fn merge_up(&self, path: &str) -> PathOpOutcome<Vec<String>> {
        self.fold_path(path, Direction::Up, FoldOp::Merge)
    }

    /// Unions every ancestor's bitmap members down into the leaf layer.
    pub fn merge_down(&self, path: &str) -> PathOpOutcome<Vec<String>> {
        self.fold_path(path, Direction::Down, FoldOp::Merge)
    }

    /// Removes the leaf layer's bitmap members from every ancestor.
    pub fn subtract_up(&self, path: &str) -> PathOpOutcome<Vec<String>> {
        self.fold_path(path, Direction::Up, FoldOp::Subtract)
    }

    /// Removes every ancestor's bitmap members from the leaf layer.
    pub fn subtract_down(&self, path: &str) -> PathOpOutcome<Vec<String>> {
        self.fold_path(path, Direction::Down, FoldOp::Subtract)
    }

    fn fold_path(&self, path: &str, direction: Direction, op: FoldOp) -> PathOpOutcome<Vec<String>> {
        let ids = match self.path_to_layer_ids(path) {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => return PathOpOutcome::failed("path has no layers to fold"),
            Err(e) => return PathOpOutcome::failed(e.to_string()),
        };

        let leaf = *ids.last().unwrap();
        let ancestors = &ids[..ids.len() - 1];
        let mut affected = Vec::new();

        let result = (|| -> Result<()> {
            match direction {
                Direction::Up => {
                    let members = self.bitmaps.members(leaf)?;
                    for &ancestor in ancestors {
                        match op {
                            FoldOp::Merge => self.bitmaps.union_members_into(ancestor, &members)?,
                            FoldOp::Subtract => self.bitmaps.remove_members_from(ancestor, &members)?,
                        }
                        affected.push(self.layers.get_by_id(ancestor)?.name);
                    }
                }
                Direction::Down => {
                    for &ancestor in ancestors {
                        let members = self.bitmaps.members(ancestor)?;
                        match op {
                            FoldOp::Merge => self.bitmaps.union_members_into(leaf, &members)?,
                            FoldOp::Subtract => self.bitmaps.remove_members_from(leaf, &members)?,
                        }
                    }
                    affected.push(self.layers.get_by_id(leaf)?.name);
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                let path = normalize_path(path);
                let event = match (direction, op) {
                    (Direction::Up, FoldOp::Merge) => Event::LayerMergedUp { path, affected: affected.clone() },
                    (Direction::Down, FoldOp::Merge) => Event::LayerMergedDown { path, affected: affected.clone() },
                    (Direction::Up, FoldOp::Subtract) => Event::LayerSubtractedUp { path, affected: affected.clone() },
                    (Direction::Down, FoldOp::Subtract) => Event::LayerSubtractedDown { path, affected: affected.clone() },
                };
                self.emit(event);
                PathOpOutcome::ok(affected.clone(), affected.len())
            }
            Err(e) => PathOpOutcome::failed(e.to_string()),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Up,
    Down,
}

#[derive(Clone, Copy)]
enum FoldOp {
    Merge,
    Subtract,
}

/// Recursively drops every child (at any depth) whose id equals `layer_id`,
/// subtree and all, and returns how many nodes were removed.
fn drop_matching(node: &mut TreeNode, layer_id: Uuid) -> usize {
    let before = node.children.len();
    node.children.retain(|id, _| *id != layer_id);
    let mut removed = before - node.children.len();
    for child in node.children.values_mut() {
        removed += drop_matching(child, layer_id);
    }
    removed
}

fn flatten(node: &TreeNode, layers: &LayerIndex) -> Result<PersistedNode> {
    let layer = layers.get_by_id(node.id)?;
    Ok(PersistedNode {
        id: layer.id,
        kind: layer.kind,
        name: layer.name,
        label: layer.label,
        description: layer.description,
        color: layer.color,
        locked: layer.locked,
        children: node.children.values().map(|child| flatten(child, layers)).collect::<Result<Vec<_>>>()?,
    })
}

fn rebuild(persisted: &PersistedNode, layers: &LayerIndex) -> TreeNode {
    let resolved_id = match layers.get_by_name(&persisted.name) {
        Ok(Some(layer)) => {
            if layer.id != persisted.id {
                warn!(
                    "tree snapshot id mismatch for layer `{}`: stored {}, index has {}; using index",
                    persisted.name, persisted.id, layer.id
                );
            }
            Some(layer.id)
        }
        Ok(None) => {
            warn!("tree snapshot references missing layer `{}`, dropping node", persisted.name);
            None
        }
        Err(e) => {
            warn!("failed to resolve layer `{}` while loading tree snapshot: {e}", persisted.name);
            None
        }
    };

    let mut node = match resolved_id {
        Some(id) => TreeNode::new(id),
        None => TreeNode::new(persisted.id),
    };

    for child in &persisted.children {
        let rebuilt = rebuild(child, layers);
        node.children.insert(rebuilt.id, rebuilt);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap_index::BitmapIndex;
    use crate::kv::HeedKvStore;

    fn open() -> (tempfile::TempDir, ContextTree, Arc<LayerIndex>, Arc<BitmapIndex>) {
        let dir = tempfile::tempdir().unwrap();
        let store = HeedKvStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let layers = Arc::new(LayerIndex::open(&store).unwrap());
        let bitmaps = Arc::new(BitmapIndex::open(&store).unwrap());
        let tree = ContextTree::open(&store, layers.clone(), bitmaps.clone(), None).unwrap();
        (dir, tree, layers, bitmaps)
    }

    #[test]
    fn insert_path_creates_layers_and_positions() {
        let (_dir, tree, layers, _bitmaps) = open();
        let outcome = tree.insert_path("/work/projectA");
        assert!(outcome.is_ok());
        assert_eq!(outcome.count, 2);
        assert!(tree.path_exists("/work/projectA"));
        assert!(layers.get_by_name("projectA").unwrap().is_some());
    }

    #[test]
    fn insert_path_is_idempotent() {
        let (_dir, tree, _layers, _bitmaps) = open();
        let first = tree.insert_path("/work/projectA");
        let second = tree.insert_path("/work/projectA");
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn path_to_layer_ids_fails_on_unattached_layer() {
        let (_dir, tree, layers, _bitmaps) = open();
        layers.create_layer(LayerType::Context, "orphan").unwrap();
        assert!(tree.path_to_layer_ids("/orphan").is_err());
    }

    #[test]
    fn move_path_reattaches_without_cloning_children() {
        let (_dir, tree, _layers, _bitmaps) = open();
        tree.insert_path("/work/projectA/notes");
        tree.insert_path("/archive");
        assert!(tree.move_path("/work/projectA", "/archive", true).is_ok());
        assert!(tree.path_exists("/archive/projecta/notes"));
        assert!(!tree.path_exists("/work/projecta"));
    }

    #[test]
    fn move_path_refuses_locked_layer() {
        let (_dir, tree, layers, _bitmaps) = open();
        tree.insert_path("/work/projectA");
        tree.insert_path("/archive");
        layers.lock_layer("projectA", "alice").unwrap();
        assert!(tree.move_path("/work/projectA", "/archive", false).is_err());
    }

    #[test]
    fn copy_path_is_idempotent_on_existing_child() {
        let (_dir, tree, _layers, _bitmaps) = open();
        tree.insert_path("/work/projectA");
        tree.insert_path("/archive");
        assert!(tree.copy_path("/work/projectA", "/archive", false).is_ok());
        assert!(tree.copy_path("/work/projectA", "/archive", false).is_ok());
        assert!(tree.path_exists("/archive/projecta"));
        assert!(tree.path_exists("/work/projecta"));
    }

    #[test]
    fn remove_path_non_recursive_reparents_children() {
        let (_dir, tree, _layers, _bitmaps) = open();
        tree.insert_path("/work/projectA/notes");
        assert!(tree.remove_path("/work/projectA", false).is_ok());
        assert!(tree.path_exists("/work/notes"));
        assert!(!tree.path_exists("/work/projecta"));
    }

    #[test]
    fn remove_path_recursive_drops_subtree() {
        let (_dir, tree, _layers, _bitmaps) = open();
        tree.insert_path("/work/projectA/notes");
        assert!(tree.remove_path("/work/projectA", true).is_ok());
        assert!(!tree.path_exists("/work/projecta"));
        assert!(!tree.path_exists("/work/projecta/notes"));
    }

    #[test]
    fn merge_up_unions_leaf_into_ancestors() {
        let (_dir, tree, _layers, bitmaps) = open();
        tree.insert_path("/work/projectA");
        let leaf = *tree.path_to_layer_ids("/work/projectA").unwrap().last().unwrap();
        bitmaps.union_members_into(leaf, &[100001, 100002]).unwrap();

        let outcome = tree.merge_up("/work/projectA");
        assert!(outcome.is_ok());
        assert_eq!(outcome.data, vec!["work".to_string()]);

        let work_id = tree.path_to_layer_ids("/work").unwrap()[0];
        assert_eq!(bitmaps.members(work_id).unwrap().len(), 2);
    }

    #[test]
    fn drop_layer_removes_every_node_referencing_it() {
        let (_dir, tree, layers, _bitmaps) = open();
        tree.insert_path("/work/projectA/notes");
        tree.insert_path("/personal/projectA");
        let shared = layers.get_by_name("projectA").unwrap().unwrap().id;

        let outcome = tree.drop_layer(shared);
        assert!(outcome.is_ok());
        assert_eq!(outcome.data, 2);
        assert!(!tree.path_exists("/work/projecta"));
        assert!(!tree.path_exists("/work/projecta/notes"));
        assert!(!tree.path_exists("/personal/projecta"));
        assert!(tree.path_exists("/work"));
        assert!(tree.path_exists("/personal"));
    }

    #[test]
    fn subtract_down_removes_ancestor_members_from_leaf() {
        let (_dir, tree, _layers, bitmaps) = open();
        tree.insert_path("/work/projectA");
        let ids = tree.path_to_layer_ids("/work/projectA").unwrap();
        let (work, leaf) = (ids[0], ids[1]);
        bitmaps.union_members_into(work, &[100001]).unwrap();
        bitmaps.union_members_into(leaf, &[100001, 100002]).unwrap();

        assert!(tree.subtract_down("/work/projectA").is_ok());
        assert_eq!(bitmaps.members(leaf).unwrap(), vec![100002]);
    }
}
