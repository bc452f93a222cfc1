//! Key builders and parsers for every persisted table.
//!
//! Numeric suffixes are big-endian. Stream ids embed their own length via the
//! leading kind byte, so keys containing them parse unambiguously.

use chert_primitives::{buf::Buf32, id::StreamId};

pub const LOGS_PREFIX: &[u8] = b"logs/";
pub const BLOCK_META_PREFIX: &[u8] = b"block_meta/";
pub const BLOCK_HASH_PREFIX: &[u8] = b"block_hash_to_num/";
pub const META_STATE_KEY: &[u8] = b"meta/state";
pub const LEASE_KEY: &[u8] = b"meta/lease";
pub const MANIFEST_PREFIX: &[u8] = b"manifests/";
pub const SEGMENT_PREFIX: &[u8] = b"manifest_segments/";
pub const TAIL_PREFIX: &[u8] = b"tails/";
pub const CHUNK_PREFIX: &[u8] = b"chunks/";
pub const TOPIC0_MODE_PREFIX: &[u8] = b"topic0_mode/";
pub const TOPIC0_STATS_PREFIX: &[u8] = b"topic0_stats/";

fn concat(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + suffix.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(suffix);
    out
}

pub fn log_key(global_id: u64) -> Vec<u8> {
    concat(LOGS_PREFIX, &global_id.to_be_bytes())
}

pub fn block_meta_key(block_num: u64) -> Vec<u8> {
    concat(BLOCK_META_PREFIX, &block_num.to_be_bytes())
}

pub fn block_hash_key(block_hash: &Buf32) -> Vec<u8> {
    concat(BLOCK_HASH_PREFIX, block_hash.as_slice())
}

pub fn manifest_key(stream: &StreamId) -> Vec<u8> {
    concat(MANIFEST_PREFIX, &stream.encode())
}

pub fn segment_key(stream: &StreamId, segment_id: u32) -> Vec<u8> {
    let mut out = concat(SEGMENT_PREFIX, &stream.encode());
    out.push(b'/');
    out.extend_from_slice(&segment_id.to_be_bytes());
    out
}

pub fn tail_key(stream: &StreamId) -> Vec<u8> {
    concat(TAIL_PREFIX, &stream.encode())
}

pub fn chunk_key(stream: &StreamId, chunk_seq: u32) -> Vec<u8> {
    let mut out = concat(CHUNK_PREFIX, &stream.encode());
    out.push(b'/');
    out.extend_from_slice(&chunk_seq.to_be_bytes());
    out
}

pub fn topic0_mode_key(sig: &Buf32) -> Vec<u8> {
    concat(TOPIC0_MODE_PREFIX, sig.as_slice())
}

pub fn topic0_stats_key(sig: &Buf32) -> Vec<u8> {
    concat(TOPIC0_STATS_PREFIX, sig.as_slice())
}

/// Parses `block_meta/{num}` back to the height. Used by prefix scans.
pub fn parse_block_meta_key(key: &[u8]) -> Option<u64> {
    let suffix = key.strip_prefix(BLOCK_META_PREFIX)?;
    Some(u64::from_be_bytes(suffix.try_into().ok()?))
}

/// Parses `block_hash_to_num/{hash}` back to the hash.
pub fn parse_block_hash_key(key: &[u8]) -> Option<Buf32> {
    let suffix = key.strip_prefix(BLOCK_HASH_PREFIX)?;
    let arr: [u8; 32] = suffix.try_into().ok()?;
    Some(Buf32::new(arr))
}

/// Parses `manifests/{stream_id}`.
pub fn parse_manifest_key(key: &[u8]) -> Option<StreamId> {
    let suffix = key.strip_prefix(MANIFEST_PREFIX)?;
    let (stream, used) = StreamId::decode(suffix)?;
    (used == suffix.len()).then_some(stream)
}

/// Parses `tails/{stream_id}`.
pub fn parse_tail_key(key: &[u8]) -> Option<StreamId> {
    let suffix = key.strip_prefix(TAIL_PREFIX)?;
    let (stream, used) = StreamId::decode(suffix)?;
    (used == suffix.len()).then_some(stream)
}

fn parse_stream_suffixed(suffix: &[u8]) -> Option<(StreamId, u32)> {
    let (stream, used) = StreamId::decode(suffix)?;
    let rest = &suffix[used..];
    let rest = rest.strip_prefix(b"/")?;
    let num: [u8; 4] = rest.try_into().ok()?;
    Some((stream, u32::from_be_bytes(num)))
}

/// Parses `chunks/{stream_id}/{seq}`.
pub fn parse_chunk_key(key: &[u8]) -> Option<(StreamId, u32)> {
    parse_stream_suffixed(key.strip_prefix(CHUNK_PREFIX)?)
}

/// Parses `manifest_segments/{stream_id}/{segment_id}`.
pub fn parse_segment_key(key: &[u8]) -> Option<(StreamId, u32)> {
    parse_stream_suffixed(key.strip_prefix(SEGMENT_PREFIX)?)
}

/// Parses `topic0_mode/{sig}` / `topic0_stats/{sig}`.
pub fn parse_sig_key(prefix: &[u8], key: &[u8]) -> Option<Buf32> {
    let suffix = key.strip_prefix(prefix)?;
    let arr: [u8; 32] = suffix.try_into().ok()?;
    Some(Buf32::new(arr))
}

#[cfg(test)]
mod tests {
    use chert_primitives::buf::Buf20;

    use super::*;

    #[test]
    fn numeric_keys_sort_numerically() {
        let lo = log_key(1);
        let hi = log_key(256);
        let higher = log_key(u32::MAX as u64 + 1);
        assert!(lo < hi);
        assert!(hi < higher);
    }

    #[test]
    fn chunk_key_roundtrip() {
        let stream = StreamId::address(Buf20::new([0xab; 20]), 3);
        let key = chunk_key(&stream, 42);
        let (back, seq) = parse_chunk_key(&key).unwrap();
        assert_eq!(back, stream);
        assert_eq!(seq, 42);
    }

    #[test]
    fn manifest_key_rejects_trailing_garbage() {
        let stream = StreamId::address(Buf20::new([1; 20]), 0);
        let mut key = manifest_key(&stream);
        key.push(0);
        assert!(parse_manifest_key(&key).is_none());
    }
}
