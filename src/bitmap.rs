//! Bitmap: a typed wrapper over a 32-bit roaring bitmap (spec.md §3, §4.2).

use std::ops::Range;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::bitmap_codec;
use crate::error::{Result, ValidationError};
use crate::Oid;

/// `static` bitmaps are created implicitly by tick/tag operations and
/// persist as ordinary forward-index entries; `dynamic` is reserved for
/// bitmaps whose membership is computed on read rather than stored (not
/// produced by this crate today, but part of the type per spec.md §3 so
/// that a future computed-view bitmap can be swapped in without changing
/// the `Bitmap` wire shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitmapType {
    Static,
    Dynamic,
}

impl Default for BitmapType {
    fn default() -> Self {
        BitmapType::Static
    }
}

/// A roaring bitmap plus the metadata needed to validate writes against it.
#[derive(Debug, Clone)]
pub struct Bitmap {
    key: String,
    kind: BitmapType,
    range: Range<u32>,
    roaring: RoaringBitmap,
}

impl Bitmap {
    pub fn new(key: impl Into<String>) -> Bitmap {
        Bitmap { key: key.into(), kind: BitmapType::Static, range: 0..u32::MAX, roaring: RoaringBitmap::new() }
    }

    pub fn with_type(mut self, kind: BitmapType) -> Bitmap {
        self.kind = kind;
        self
    }

    pub fn with_range(mut self, range: Range<u32>) -> Bitmap {
        self.range = range;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> BitmapType {
        self.kind
    }

    pub fn range(&self) -> Range<u32> {
        self.range.clone()
    }

    pub fn len(&self) -> u64 {
        self.roaring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roaring.is_empty()
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.roaring.contains(oid)
    }

    pub fn iter(&self) -> impl Iterator<Item = Oid> + '_ {
        self.roaring.iter()
    }

    pub fn as_roaring(&self) -> &RoaringBitmap {
        &self.roaring
    }

    fn check_range(&self, oid: Oid) -> Result<()> {
        if self.range.contains(&oid) {
            Ok(())
        } else {
            Err(ValidationError::OidOutOfRange {
                oid,
                range_min: self.range.start,
                range_max: self.range.end,
            }
            .into())
        }
    }

    pub fn insert(&mut self, oid: Oid) -> Result<bool> {
        self.check_range(oid)?;
        Ok(self.roaring.insert(oid))
    }

    pub fn insert_many(&mut self, oids: impl IntoIterator<Item = Oid>) -> Result<()> {
        for oid in oids {
            self.insert(oid)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, oid: Oid) -> bool {
        self.roaring.remove(oid)
    }

    pub fn remove_many(&mut self, oids: impl IntoIterator<Item = Oid>) {
        for oid in oids {
            self.remove(oid);
        }
    }

    pub fn union_with(&mut self, other: &Bitmap) {
        self.roaring |= &other.roaring;
    }

    pub fn intersect_with(&mut self, other: &Bitmap) {
        self.roaring &= &other.roaring;
    }

    pub fn difference_with(&mut self, other: &Bitmap) {
        self.roaring -= &other.roaring;
    }

    pub fn symmetric_difference_with(&mut self, other: &Bitmap) {
        self.roaring ^= &other.roaring;
    }

    pub fn serialize(&self) -> Vec<u8> {
        bitmap_codec::serialize(&self.roaring)
    }

    /// Reconstructs a `Bitmap` from its persisted roaring bytes. Only the
    /// raw member set is persisted (spec.md §6); `kind` and `range` are not
    /// part of the wire format and default to `Static`/full-range on load,
    /// same as a freshly auto-created bitmap.
    pub fn deserialize(key: impl Into<String>, bytes: &[u8]) -> Result<Bitmap> {
        let roaring = bitmap_codec::deserialize_from(bytes)
            .map_err(|e| crate::error::Error::internal(e.to_string()))?;
        Ok(Bitmap { key: key.into(), kind: BitmapType::Static, range: 0..u32::MAX, roaring })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_outside_range_is_validation_error() {
        let mut bitmap = Bitmap::new("work").with_range(0..100);
        assert!(bitmap.insert(100_001).is_err());
        assert!(bitmap.insert(50).is_ok());
        assert!(bitmap.contains(50));
    }

    #[test]
    fn serialize_deserialize_is_identity() {
        let mut bitmap = Bitmap::new("work");
        bitmap.insert_many([100001, 100002, 100003]).unwrap();
        let bytes = bitmap.serialize();
        let back = Bitmap::deserialize("work", &bytes).unwrap();
        assert_eq!(bitmap.as_roaring(), back.as_roaring());
    }
}
