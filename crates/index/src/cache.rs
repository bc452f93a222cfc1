//! Shared read-side cache for stream state.
//!
//! Immutable data (chunk bitmaps, manifest segment pages) caches forever
//! under LRU pressure. Mutable records (manifest headers, tails, topic0
//! modes) are version-validated: every touch re-reads the small record's
//! version from the MetaStore and reuses the decoded value only when it
//! still matches, so readers never act on a decode of stale bytes.
//!
//! A stream's view loads the tail *before* the manifest. Tails only shrink
//! when a seal's manifest CAS has already landed, so a (tail, manifest) pair
//! read in that order can never be missing values on both sides.

use std::{num::NonZeroUsize, sync::Arc};

use chert_codec::{
    chunk::ChunkBlob,
    keys,
    manifest::{ChunkRef, ManifestHeader, ManifestSegment},
    tail::TailCheckpoint,
};
use chert_db::{
    traits::{BlobStore, MetaStore},
    types::Version,
};
use chert_primitives::{buf::Buf32, id::StreamId};
use lru::LruCache;
use parking_lot::Mutex;
use roaring::RoaringBitmap;

use crate::{topic0::Topic0Mode, IndexError, IndexResult};

const MANIFEST_CACHE_CAP: usize = 8192;
const TAIL_CACHE_CAP: usize = 8192;
const SEGMENT_CACHE_CAP: usize = 2048;
const CHUNK_CACHE_CAP: usize = 1024;
const MODE_CACHE_CAP: usize = 8192;

/// A consistent (manifest, tail) pair for one stream.
#[derive(Clone)]
pub struct StreamView {
    manifest: Arc<ManifestHeader>,
    tail: Arc<RoaringBitmap>,
}

impl StreamView {
    pub fn manifest(&self) -> &ManifestHeader {
        &self.manifest
    }

    pub fn tail(&self) -> &RoaringBitmap {
        &self.tail
    }

    /// Whether the stream has neither sealed chunks nor tail values.
    pub fn is_empty(&self) -> bool {
        self.manifest.last_chunk_seq().is_none() && self.tail.is_empty()
    }
}

/// LRU caches over both stores, shared by all readers.
pub struct StreamCache {
    manifests: Mutex<LruCache<StreamId, (Version, Arc<ManifestHeader>)>>,
    tails: Mutex<LruCache<StreamId, (Version, Arc<RoaringBitmap>)>>,
    segments: Mutex<LruCache<(StreamId, u32), Arc<ManifestSegment>>>,
    chunks: Mutex<LruCache<(StreamId, u32), Arc<RoaringBitmap>>>,
    modes: Mutex<LruCache<Buf32, (Version, Topic0Mode)>>,
}

impl Default for StreamCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCache {
    pub fn new() -> Self {
        let cap = |n: usize| NonZeroUsize::new(n).expect("cache: nonzero cap");
        Self {
            manifests: Mutex::new(LruCache::new(cap(MANIFEST_CACHE_CAP))),
            tails: Mutex::new(LruCache::new(cap(TAIL_CACHE_CAP))),
            segments: Mutex::new(LruCache::new(cap(SEGMENT_CACHE_CAP))),
            chunks: Mutex::new(LruCache::new(cap(CHUNK_CACHE_CAP))),
            modes: Mutex::new(LruCache::new(cap(MODE_CACHE_CAP))),
        }
    }

    /// Loads the stream's tail-then-manifest pair.
    pub fn stream_view(
        &self,
        meta: &dyn MetaStore,
        stream: &StreamId,
    ) -> IndexResult<StreamView> {
        let tail = match meta.get(&keys::tail_key(stream))? {
            Some(vv) => {
                let mut tails = self.tails.lock();
                match tails.get(stream) {
                    Some((version, bitmap)) if *version == vv.version() => Arc::clone(bitmap),
                    _ => {
                        let bitmap = Arc::new(TailCheckpoint::decode(vv.value())?.into_bitmap());
                        tails.put(*stream, (vv.version(), Arc::clone(&bitmap)));
                        bitmap
                    }
                }
            }
            None => Arc::new(RoaringBitmap::new()),
        };

        let manifest = match meta.get(&keys::manifest_key(stream))? {
            Some(vv) => {
                let mut manifests = self.manifests.lock();
                match manifests.get(stream) {
                    Some((version, header)) if *version == vv.version() => Arc::clone(header),
                    _ => {
                        let header = Arc::new(ManifestHeader::decode(vv.value())?);
                        manifests.put(*stream, (vv.version(), Arc::clone(&header)));
                        header
                    }
                }
            }
            None => Arc::new(ManifestHeader::default()),
        };

        Ok(StreamView { manifest, tail })
    }

    /// Loads a spilled manifest segment page (immutable once referenced).
    pub fn segment(
        &self,
        meta: &dyn MetaStore,
        stream: &StreamId,
        segment_id: u32,
    ) -> IndexResult<Arc<ManifestSegment>> {
        if let Some(segment) = self.segments.lock().get(&(*stream, segment_id)) {
            return Ok(Arc::clone(segment));
        }
        let vv = meta
            .get(&keys::segment_key(stream, segment_id))?
            .ok_or_else(|| IndexError::MissingSegment(stream.to_string(), segment_id))?;
        let segment = Arc::new(ManifestSegment::decode(vv.value())?);
        self.segments
            .lock()
            .put((*stream, segment_id), Arc::clone(&segment));
        Ok(segment)
    }

    /// Loads a sealed chunk's bitmap, validating it against its manifest ref.
    pub fn chunk_bitmap(
        &self,
        blobs: &dyn BlobStore,
        stream: &StreamId,
        chunk_ref: &ChunkRef,
    ) -> IndexResult<Arc<RoaringBitmap>> {
        let seq = chunk_ref.chunk_seq();
        if let Some(bitmap) = self.chunks.lock().get(&(*stream, seq)) {
            return Ok(Arc::clone(bitmap));
        }
        let bytes = blobs
            .get(&keys::chunk_key(stream, seq))?
            .ok_or_else(|| IndexError::MissingChunk(stream.to_string(), seq))?;
        let blob = ChunkBlob::decode(&bytes)?;
        if !blob.matches_ref(chunk_ref) {
            return Err(IndexError::ChunkRefMismatch(stream.to_string(), seq));
        }
        let bitmap = Arc::new(blob.into_bitmap());
        self.chunks.lock().put((*stream, seq), Arc::clone(&bitmap));
        Ok(bitmap)
    }

    /// Reads a signature's current topic0 mode, if one has been persisted.
    pub fn topic0_mode(
        &self,
        meta: &dyn MetaStore,
        sig: &Buf32,
    ) -> IndexResult<Option<Topic0Mode>> {
        match meta.get(&keys::topic0_mode_key(sig))? {
            Some(vv) => {
                let mut modes = self.modes.lock();
                match modes.get(sig) {
                    Some((version, mode)) if *version == vv.version() => Ok(Some(*mode)),
                    _ => {
                        let mode = Topic0Mode::decode(vv.value())?;
                        modes.put(*sig, (vv.version(), mode));
                        Ok(Some(mode))
                    }
                }
            }
            None => Ok(None),
        }
    }

    /// All chunk refs of a view overlapping the local range, in sequence
    /// order, resolving spilled pages as needed.
    pub fn overlapping_refs(
        &self,
        meta: &dyn MetaStore,
        stream: &StreamId,
        view: &StreamView,
        lo: u32,
        hi: u32,
    ) -> IndexResult<Vec<ChunkRef>> {
        let mut refs = Vec::new();
        for segment_ref in view.manifest().segments() {
            if !segment_ref.overlaps(lo, hi) {
                continue;
            }
            let page = self.segment(meta, stream, segment_ref.segment_id())?;
            refs.extend(page.refs().iter().filter(|r| r.overlaps(lo, hi)).copied());
        }
        refs.extend(
            view.manifest()
                .inline_refs()
                .iter()
                .filter(|r| r.overlaps(lo, hi))
                .copied(),
        );
        Ok(refs)
    }

    /// Overlap-aware cardinality estimate for one stream in a local range:
    /// the count sum of overlapping chunk refs plus tail entries in range.
    /// Chunk bodies are never read.
    pub fn estimate_in_range(
        &self,
        meta: &dyn MetaStore,
        stream: &StreamId,
        view: &StreamView,
        lo: u32,
        hi: u32,
    ) -> IndexResult<u64> {
        let refs = self.overlapping_refs(meta, stream, view, lo, hi)?;
        let sealed: u64 = refs.iter().map(|r| r.count() as u64).sum();
        Ok(sealed + view.tail().range_cardinality(lo..=hi))
    }
}
