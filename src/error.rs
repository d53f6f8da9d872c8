use std::fmt;

use crate::Oid;

/// The crate-wide result alias used by every fallible public operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the indexing engine (spec.md §7).
///
/// Structural tree operations (`insert_path`, `move_path`, `remove_path`,
/// `merge_up`/`merge_down`, ...) never return this type directly for
/// recoverable path errors; they wrap it in [`PathOpOutcome`] instead.
/// Pipeline operations (`insert_document`, `delete_document`, ...) and the
/// query composer propagate it directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("duplicate: {0}")]
    Duplicate(#[from] DuplicateError),

    #[error("locked: {0}")]
    Locked(#[from] LockedError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Error {
        Error::Internal(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown schema `{0}`")]
    UnknownSchema(String),
    #[error("oid {oid} is outside of the bitmap's allowed range [{range_min}, {range_max})")]
    OidOutOfRange { oid: Oid, range_min: u32, range_max: u32 },
    #[error("invalid path `{0}`")]
    InvalidPath(String),
    #[error("cannot mutate the root layer")]
    RootLayer,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotFoundError {
    #[error("document {0} not found")]
    Document(Oid),
    #[error("layer `{0}` not found")]
    LayerByName(String),
    #[error("layer {0} not found")]
    LayerById(uuid::Uuid),
    #[error("path segment `{segment}` not found at `{path}`")]
    PathSegment { path: String, segment: String },
    #[error("bitmap `{0}` not found")]
    Bitmap(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DuplicateError {
    #[error("checksum `{checksum}` already maps to document {existing}")]
    Checksum { checksum: String, existing: Oid },
}

#[derive(Debug, thiserror::Error)]
pub enum LockedError {
    #[error("layer `{0}` is locked")]
    Layer(String),
    #[error("path `{0}` contains a locked layer")]
    Path(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("heed error: {0}")]
    Heed(#[from] heed::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform envelope returned by structural `ContextTree` operations
/// (spec.md §7): they never throw on recoverable path errors, but do
/// propagate KV/database failures via `error`.
#[derive(Debug, Default)]
pub struct PathOpOutcome<T: Default> {
    pub data: T,
    pub count: usize,
    pub error: Option<String>,
}

impl<T: Default> PathOpOutcome<T> {
    pub fn ok(data: T, count: usize) -> Self {
        PathOpOutcome { data, count, error: None }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        PathOpOutcome { data: T::default(), count: 0, error: Some(error.to_string()) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
