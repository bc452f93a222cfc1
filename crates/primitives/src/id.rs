//! Identifiers for logs and index streams.
//!
//! A global log id is a `u64` assigned monotonically across the whole chain.
//! Its upper 32 bits select a shard and its lower 32 bits are the position
//! within that shard, which is what the roaring bitmaps store. Block-level
//! streams shard the same way over block numbers.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use crate::buf::{Buf20, Buf32};

/// Splits a global log id (or block number) into its shard.
pub fn shard_of(id: u64) -> u32 {
    (id >> 32) as u32
}

/// Lower 32 bits of a global log id, the value stored in stream bitmaps.
pub fn local_of(id: u64) -> u32 {
    id as u32
}

/// Reassembles a global id from shard and local parts.
pub fn make_global(shard: u32, local: u32) -> u64 {
    ((shard as u64) << 32) | local as u64
}

/// Which indexed attribute a stream covers.
///
/// The discriminants are wire-stable; they lead every encoded stream id.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Arbitrary, BorshDeserialize,
    BorshSerialize,
)]
#[repr(u8)]
#[borsh(use_discriminant = true)]
pub enum IndexKind {
    /// Log-level index over contract addresses.
    Address = 0,
    /// Log-level index over topics[1].
    Topic1 = 1,
    /// Log-level index over topics[2].
    Topic2 = 2,
    /// Log-level index over topics[3].
    Topic3 = 3,
    /// Block-level index over topics[0], always maintained.
    Topic0Block = 4,
    /// Log-level index over topics[0], enabled per signature.
    Topic0Log = 5,
}

impl IndexKind {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Address),
            1 => Some(Self::Topic1),
            2 => Some(Self::Topic2),
            3 => Some(Self::Topic3),
            4 => Some(Self::Topic0Block),
            5 => Some(Self::Topic0Log),
            _ => None,
        }
    }

    /// Log-level streams store positions of log ids; block-level streams
    /// store block numbers.
    pub fn is_block_level(self) -> bool {
        matches!(self, Self::Topic0Block)
    }

    /// Returns the log-level kind indexing the given topic position, if any.
    pub fn for_topic_pos(pos: usize) -> Option<Self> {
        match pos {
            1 => Some(Self::Topic1),
            2 => Some(Self::Topic2),
            3 => Some(Self::Topic3),
            _ => None,
        }
    }
}

/// The value a stream indexes: a 20-byte address or a 32-byte topic word.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Arbitrary)]
pub enum StreamValue {
    Address(Buf20),
    Word(Buf32),
}

impl StreamValue {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Address(a) => a.as_slice(),
            Self::Word(w) => w.as_slice(),
        }
    }
}

/// Identifies one stream: an indexed value within one shard.
///
/// Encodes as `kind (1 byte) ‖ value bytes ‖ shard (4 bytes BE)`, which is
/// the wire-stable layout used in every store key touching the stream.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Arbitrary)]
pub struct StreamId {
    kind: IndexKind,
    value: StreamValue,
    shard: u32,
}

impl StreamId {
    pub fn new(kind: IndexKind, value: StreamValue, shard: u32) -> Self {
        Self { kind, value, shard }
    }

    pub fn address(addr: Buf20, shard: u32) -> Self {
        Self::new(IndexKind::Address, StreamValue::Address(addr), shard)
    }

    pub fn topic(pos: usize, word: Buf32, shard: u32) -> Option<Self> {
        IndexKind::for_topic_pos(pos).map(|kind| Self::new(kind, StreamValue::Word(word), shard))
    }

    pub fn topic0_block(sig: Buf32, shard: u32) -> Self {
        Self::new(IndexKind::Topic0Block, StreamValue::Word(sig), shard)
    }

    pub fn topic0_log(sig: Buf32, shard: u32) -> Self {
        Self::new(IndexKind::Topic0Log, StreamValue::Word(sig), shard)
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn value(&self) -> &StreamValue {
        &self.value
    }

    pub fn shard(&self) -> u32 {
        self.shard
    }

    /// Same stream identity in an adjacent shard.
    pub fn with_shard(&self, shard: u32) -> Self {
        Self { shard, ..*self }
    }

    /// Wire encoding: `kind ‖ value ‖ shard_be`.
    pub fn encode(&self) -> Vec<u8> {
        let value = self.value.as_slice();
        let mut out = Vec::with_capacity(1 + value.len() + 4);
        out.push(self.kind.as_byte());
        out.extend_from_slice(value);
        out.extend_from_slice(&self.shard.to_be_bytes());
        out
    }

    /// Parses the wire encoding, returning the id and how many bytes it
    /// consumed.
    pub fn decode(bytes: &[u8]) -> Option<(Self, usize)> {
        let kind = IndexKind::from_byte(*bytes.first()?)?;
        let value_len = match kind {
            IndexKind::Address => Buf20::LEN,
            _ => Buf32::LEN,
        };
        let total = 1 + value_len + 4;
        if bytes.len() < total {
            return None;
        }
        let value = match kind {
            IndexKind::Address => {
                let mut arr = [0u8; 20];
                arr.copy_from_slice(&bytes[1..21]);
                StreamValue::Address(Buf20::new(arr))
            }
            _ => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes[1..33]);
                StreamValue::Word(Buf32::new(arr))
            }
        };
        let mut shard_be = [0u8; 4];
        shard_be.copy_from_slice(&bytes[1 + value_len..total]);
        Some((Self::new(kind, value, u32::from_be_bytes(shard_be)), total))
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            StreamValue::Address(a) => write!(f, "{:?}:{}:{}", self.kind, a, self.shard),
            StreamValue::Word(w) => write!(f, "{:?}:{}:{}", self.kind, w, self.shard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_id_split_roundtrip() {
        let id = 0x0000_0005_dead_beefu64;
        assert_eq!(shard_of(id), 5);
        assert_eq!(local_of(id), 0xdead_beef);
        assert_eq!(make_global(5, 0xdead_beef), id);
    }

    #[test]
    fn stream_id_encode_decode() {
        let addr = StreamId::address(Buf20::new([3; 20]), 7);
        let (back, used) = StreamId::decode(&addr.encode()).unwrap();
        assert_eq!(back, addr);
        assert_eq!(used, 25);

        let topic = StreamId::topic(2, Buf32::new([9; 32]), 0).unwrap();
        let (back, used) = StreamId::decode(&topic.encode()).unwrap();
        assert_eq!(back, topic);
        assert_eq!(used, 37);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(StreamId::decode(&[0xff; 40]).is_none());
    }
}
