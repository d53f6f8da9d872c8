//! Optional event notifications (spec.md §6): a single
//! `crossbeam_channel::Sender<Event>` handed to every component that needs
//! to announce something, with sends best-effort (`try_send`, never
//! blocking the caller and never failing an operation on a full channel).

use uuid::Uuid;

use crate::Oid;

#[derive(Debug, Clone)]
pub enum Event {
    DocumentInserted { oid: Oid, checksum: String },
    DocumentUpdated { oid: Oid },
    DocumentRemoved { oid: Oid },
    DocumentDeleted { oid: Oid },
    LayerCreated { id: Uuid, name: String },
    LayerRenamed { id: Uuid, old_name: String, new_name: String },
    LayerLocked { id: Uuid, by: String },
    LayerUnlocked { id: Uuid, by: String },
    LayerRemoved { id: Uuid, name: String },
    TreePathInserted { path: String },
    TreePathMoved { from: String, to: String },
    TreePathCopied { from: String, to: String },
    TreePathRemoved { path: String },
    TreePathLocked { path: String, by: String },
    TreePathUnlocked { path: String, by: String },
    LayerMergedUp { path: String, affected: Vec<String> },
    LayerMergedDown { path: String, affected: Vec<String> },
    LayerSubtractedUp { path: String, affected: Vec<String> },
    LayerSubtractedDown { path: String, affected: Vec<String> },
    DirectoryMoved { from: String, to: String },
    DirectoryDeleted { path: String },
}
