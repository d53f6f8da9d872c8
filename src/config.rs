//! Engine-wide configuration (SPEC_FULL.md "Ambient Stack"): a plain,
//! builder-friendly options struct with sensible defaults, rather than a
//! config file format this crate has no business owning.

use std::path::PathBuf;

/// Default LMDB map size: generous headroom for a local document index
/// without demanding it up front (LMDB reserves the address space, not the
/// disk, for the configured size).
pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SynapsdOptions {
    /// Directory backing the LMDB environment.
    pub path: PathBuf,
    pub map_size: usize,
    /// Key prefix `DirectoryTree`'s `BitmapCollection` scopes its bitmaps
    /// under (spec.md §4.7).
    pub vfs_prefix: String,
    /// Checksum algorithms applied when a document's own `indexOptions`
    /// does not specify any.
    pub default_checksum_algorithms: Vec<String>,
    /// When true, `insertDocument` raises `DuplicateError` instead of
    /// silently returning the existing OID on a checksum collision
    /// (spec.md §9(a)).
    pub strict_insert: bool,
}

impl SynapsdOptions {
    pub fn new(path: impl Into<PathBuf>) -> SynapsdOptions {
        SynapsdOptions {
            path: path.into(),
            map_size: DEFAULT_MAP_SIZE,
            vfs_prefix: "vfs".to_string(),
            default_checksum_algorithms: vec!["sha256".to_string()],
            strict_insert: false,
        }
    }

    pub fn with_map_size(mut self, map_size: usize) -> SynapsdOptions {
        self.map_size = map_size;
        self
    }

    pub fn with_strict_insert(mut self, strict: bool) -> SynapsdOptions {
        self.strict_insert = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let options = SynapsdOptions::new("/tmp/synapsd").with_map_size(4096).with_strict_insert(true);
        assert_eq!(options.map_size, 4096);
        assert!(options.strict_insert);
        assert_eq!(options.vfs_prefix, "vfs");
    }
}
