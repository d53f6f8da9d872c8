//! Compact (de)serialization for [`roaring::RoaringBitmap`]: bitmaps with a
//! small cardinality are cheaper to store as a flat array of native `u32`s
//! than as a roaring container with its header, so below `THRESHOLD` we use
//! the byte-order encoding and fall back to roaring's own serialization
//! above it. The two encodings are distinguishable purely by byte length,
//! so no tag byte is needed.

use std::io;
use std::mem::size_of;

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringBitmap;

/// Above this cardinality, roaring's own header-based encoding is no longer
/// larger than a flat `u32` array and is used instead.
const THRESHOLD: u64 = 7;

pub fn serialized_size(bitmap: &RoaringBitmap) -> usize {
    if bitmap.len() <= THRESHOLD {
        bitmap.len() as usize * size_of::<u32>()
    } else {
        bitmap.serialized_size()
    }
}

pub fn serialize_into(bitmap: &RoaringBitmap, out: &mut Vec<u8>) -> io::Result<()> {
    if bitmap.len() <= THRESHOLD {
        for integer in bitmap.iter() {
            out.write_u32::<NativeEndian>(integer)?;
        }
        Ok(())
    } else {
        bitmap.serialize_into(out)
    }
}

pub fn serialize(bitmap: &RoaringBitmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(serialized_size(bitmap));
    serialize_into(bitmap, &mut out).expect("writing to a Vec<u8> cannot fail");
    out
}

pub fn deserialize_from(mut bytes: &[u8]) -> io::Result<RoaringBitmap> {
    if bytes.len() <= (THRESHOLD as usize) * size_of::<u32>() && bytes.len() % size_of::<u32>() == 0
    {
        let mut bitmap = RoaringBitmap::new();
        while let Ok(integer) = bytes.read_u32::<NativeEndian>() {
            bitmap.insert(integer);
        }
        Ok(bitmap)
    } else {
        RoaringBitmap::deserialize_from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_bitmap_round_trips() {
        let mut bitmap = RoaringBitmap::new();
        for v in [1, 2, 3] {
            bitmap.insert(v);
        }
        let bytes = serialize(&bitmap);
        let back = deserialize_from(&bytes).unwrap();
        assert_eq!(bitmap, back);
    }

    #[test]
    fn large_bitmap_round_trips() {
        let mut bitmap = RoaringBitmap::new();
        for v in 0..10_000 {
            bitmap.insert(v);
        }
        let bytes = serialize(&bitmap);
        let back = deserialize_from(&bytes).unwrap();
        assert_eq!(bitmap, back);
    }

    #[test]
    fn empty_bitmap_round_trips() {
        let bitmap = RoaringBitmap::new();
        let bytes = serialize(&bitmap);
        let back = deserialize_from(&bytes).unwrap();
        assert_eq!(bitmap, back);
    }
}
