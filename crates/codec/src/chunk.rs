//! Immutable chunk blobs: a sealed slice of one stream's bitmap.
//!
//! Layout: `version ‖ min_local (u32 BE) ‖ max_local (u32 BE) ‖ count (u32
//! BE) ‖ roaring payload ‖ crc32 (u32 LE over everything preceding)`. The
//! header triple is duplicated from the bitmap so manifest refs can be
//! cross-checked without deserializing the payload.

use roaring::RoaringBitmap;

use crate::{frame::CODEC_V1, manifest::ChunkRef, CodecError, CodecResult};

const HEADER_LEN: usize = 1 + 4 + 4 + 4;
const CRC_LEN: usize = 4;

/// A decoded chunk blob.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkBlob {
    min_local: u32,
    max_local: u32,
    count: u32,
    bitmap: RoaringBitmap,
}

impl ChunkBlob {
    /// Builds a blob from a non-empty bitmap.
    pub fn from_bitmap(bitmap: RoaringBitmap) -> Option<Self> {
        let min_local = bitmap.min()?;
        let max_local = bitmap.max()?;
        let count = bitmap.len() as u32;
        Some(Self {
            min_local,
            max_local,
            count,
            bitmap,
        })
    }

    pub fn min_local(&self) -> u32 {
        self.min_local
    }

    pub fn max_local(&self) -> u32 {
        self.max_local
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.bitmap
    }

    pub fn into_bitmap(self) -> RoaringBitmap {
        self.bitmap
    }

    /// The manifest ref describing this blob at the given sequence number.
    pub fn to_ref(&self, chunk_seq: u32) -> ChunkRef {
        ChunkRef::new(chunk_seq, self.min_local, self.max_local, self.count)
    }

    /// Whether this blob's metadata matches a manifest ref.
    pub fn matches_ref(&self, chunk_ref: &ChunkRef) -> bool {
        self.min_local == chunk_ref.min_local()
            && self.max_local == chunk_ref.max_local()
            && self.count == chunk_ref.count()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bitmap.serialized_size() + CRC_LEN);
        out.push(CODEC_V1);
        out.extend_from_slice(&self.min_local.to_be_bytes());
        out.extend_from_slice(&self.max_local.to_be_bytes());
        out.extend_from_slice(&self.count.to_be_bytes());
        self.bitmap
            .serialize_into(&mut out)
            .expect("codec: vec write");
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        const TAG: &str = "chunk";
        if bytes.len() < HEADER_LEN + CRC_LEN {
            return Err(CodecError::Truncated(TAG));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
        let stored = u32::from_le_bytes(crc_bytes.try_into().expect("codec: crc width"));
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(CodecError::ChecksumMismatch(TAG, stored, computed));
        }
        if body[0] != CODEC_V1 {
            return Err(CodecError::UnsupportedVersion(TAG, body[0]));
        }
        let word = |at: usize| {
            u32::from_be_bytes(body[at..at + 4].try_into().expect("codec: field width"))
        };
        let min_local = word(1);
        let max_local = word(5);
        let count = word(9);
        let bitmap = RoaringBitmap::deserialize_from(&body[HEADER_LEN..])
            .map_err(|_| CodecError::Malformed(TAG))?;
        if bitmap.min() != Some(min_local)
            || bitmap.max() != Some(max_local)
            || bitmap.len() != count as u64
        {
            return Err(CodecError::Inconsistent(TAG));
        }
        Ok(Self {
            min_local,
            max_local,
            count,
            bitmap,
        })
    }
}
