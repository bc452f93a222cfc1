//! Tail checkpoints: the persisted form of a stream's unsealed bitmap.
//!
//! Layout: `version ‖ count (u64 BE) ‖ roaring payload`. The count is
//! redundant with the bitmap and validated on decode.

use roaring::RoaringBitmap;

use crate::{frame::CODEC_V1, CodecError, CodecResult};

const HEADER_LEN: usize = 1 + 8;

/// A persisted tail bitmap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TailCheckpoint {
    bitmap: RoaringBitmap,
}

impl TailCheckpoint {
    pub fn new(bitmap: RoaringBitmap) -> Self {
        Self { bitmap }
    }

    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.bitmap
    }

    pub fn into_bitmap(self) -> RoaringBitmap {
        self.bitmap
    }

    pub fn count(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bitmap.serialized_size());
        out.push(CODEC_V1);
        out.extend_from_slice(&self.bitmap.len().to_be_bytes());
        self.bitmap
            .serialize_into(&mut out)
            .expect("codec: vec write");
        out
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        const TAG: &str = "tail";
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated(TAG));
        }
        if bytes[0] != CODEC_V1 {
            return Err(CodecError::UnsupportedVersion(TAG, bytes[0]));
        }
        let count = u64::from_be_bytes(bytes[1..9].try_into().expect("codec: field width"));
        let bitmap = RoaringBitmap::deserialize_from(&bytes[HEADER_LEN..])
            .map_err(|_| CodecError::Malformed(TAG))?;
        if bitmap.len() != count {
            return Err(CodecError::Inconsistent(TAG));
        }
        Ok(Self { bitmap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let checkpoint = TailCheckpoint::new([1u32, 2, 3, 1_000_000].into_iter().collect());
        let back = TailCheckpoint::decode(&checkpoint.encode()).unwrap();
        assert_eq!(back, checkpoint);
        assert_eq!(back.count(), 4);
    }

    #[test]
    fn count_mismatch_is_inconsistent() {
        let mut bytes = TailCheckpoint::new([5u32].into_iter().collect()).encode();
        bytes[8] = 2;
        assert!(matches!(
            TailCheckpoint::decode(&bytes),
            Err(CodecError::Inconsistent("tail"))
        ));
    }
}
