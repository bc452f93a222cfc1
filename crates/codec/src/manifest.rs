//! Stream manifests: the CAS-updated directory of a stream's sealed chunks.
//!
//! Headers keep chunk refs inline until a page fills, then spill whole pages
//! to `manifest_segments/` and keep only per-page aggregates, so the header
//! stays small enough to CAS cheaply no matter how many chunks a stream
//! accumulates.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    frame::{decode_framed, encode_framed},
    CodecResult,
};

/// Refs per spilled segment page.
pub const SEGMENT_PAGE_REFS: usize = 256;

/// Metadata for one sealed chunk, carried in the manifest.
///
/// This is everything the planner needs to estimate overlap with a queried
/// local range without reading the blob.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct ChunkRef {
    chunk_seq: u32,
    min_local: u32,
    max_local: u32,
    count: u32,
}

impl ChunkRef {
    pub fn new(chunk_seq: u32, min_local: u32, max_local: u32, count: u32) -> Self {
        Self {
            chunk_seq,
            min_local,
            max_local,
            count,
        }
    }

    pub fn chunk_seq(&self) -> u32 {
        self.chunk_seq
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

    pub fn overlaps(&self, lo: u32, hi: u32) -> bool {
        self.min_local <= hi && lo <= self.max_local
    }
}

/// Aggregates for one spilled page of chunk refs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct SegmentRef {
    segment_id: u32,
    ref_count: u32,
    min_local: u32,
    max_local: u32,
    count: u64,
}

impl SegmentRef {
    pub fn segment_id(&self) -> u32 {
        self.segment_id
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn overlaps(&self, lo: u32, hi: u32) -> bool {
        self.min_local <= hi && lo <= self.max_local
    }
}

/// One spilled page of chunk refs, stored at
/// `manifest_segments/{stream}/{segment_id}`.
#[derive(Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct ManifestSegment {
    refs: Vec<ChunkRef>,
}

impl ManifestSegment {
    pub fn new(refs: Vec<ChunkRef>) -> Self {
        Self { refs }
    }

    pub fn refs(&self) -> &[ChunkRef] {
        &self.refs
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_framed(self)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_framed("manifest_segment", bytes)
    }
}

/// The CAS-updated manifest header for one stream.
#[derive(Clone, Debug, Default, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct ManifestHeader {
    last_chunk_seq: Option<u32>,
    segments: Vec<SegmentRef>,
    inline: Vec<ChunkRef>,
    approx_count: u64,
}

impl ManifestHeader {
    pub fn last_chunk_seq(&self) -> Option<u32> {
        self.last_chunk_seq
    }

    /// Sequence number the next sealed chunk will take.
    pub fn next_chunk_seq(&self) -> u32 {
        self.last_chunk_seq.map(|s| s + 1).unwrap_or(0)
    }

    pub fn segments(&self) -> &[SegmentRef] {
        &self.segments
    }

    pub fn inline_refs(&self) -> &[ChunkRef] {
        &self.inline
    }

    /// Total sealed entries across all chunks.
    pub fn approx_count(&self) -> u64 {
        self.approx_count
    }

    /// Highest sealed local value, the ceiling below which tail values are
    /// redundant.
    pub fn sealed_ceiling(&self) -> Option<u32> {
        self.inline
            .last()
            .map(|r| r.max_local)
            .or_else(|| self.segments.last().map(|s| s.max_local))
    }

    /// Appends the ref for a freshly sealed chunk. The caller must assign
    /// `next_chunk_seq()` to the chunk.
    pub fn append_ref(&mut self, chunk: ChunkRef) {
        debug_assert_eq!(chunk.chunk_seq, self.next_chunk_seq());
        self.last_chunk_seq = Some(chunk.chunk_seq);
        self.approx_count += chunk.count as u64;
        self.inline.push(chunk);
    }

    /// When the inline page is full, drains it into a segment to be written
    /// at the returned segment id. The header keeps only the aggregates.
    pub fn spill_full_page(&mut self) -> Option<(u32, ManifestSegment)> {
        if self.inline.len() < SEGMENT_PAGE_REFS {
            return None;
        }
        let refs: Vec<ChunkRef> = self.inline.drain(..).collect();
        let segment_id = self.segments.len() as u32;
        self.segments.push(SegmentRef {
            segment_id,
            ref_count: refs.len() as u32,
            min_local: refs.first().map(|r| r.min_local).unwrap_or(0),
            max_local: refs.last().map(|r| r.max_local).unwrap_or(0),
            count: refs.iter().map(|r| r.count as u64).sum(),
        });
        Some((segment_id, ManifestSegment::new(refs)))
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_framed(self)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_framed("manifest_header", bytes)
    }
}
