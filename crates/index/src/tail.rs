//! Mutable per-stream tails and their checkpoints.
//!
//! The tail holds a stream's values that are not yet sealed into a chunk.
//! Appends are set inserts, so replaying a block is a no-op. Values at or
//! below the stream's sealed ceiling (the last chunk's `max_local`) are
//! dropped on load and on append, which keeps a replay after a crashed seal
//! from re-growing the tail.

use std::sync::Arc;

use chert_codec::{keys, manifest::ManifestHeader, tail::TailCheckpoint};
use chert_config::ChunkConfig;
use chert_db::{
    traits::MetaStore,
    types::{Epoch, Version},
};
use chert_primitives::id::StreamId;
use lru::LruCache;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use tracing::*;

use crate::{IndexError, IndexResult};

/// Loaded tail states kept in memory before clean ones are trimmed.
const LOADED_TAILS_CAP: usize = 65_536;

#[derive(Debug)]
struct TailState {
    bitmap: RoaringBitmap,
    dirty: bool,
    /// Version of the `tails/` key, `None` until first persisted.
    version: Option<Version>,
    /// `max_local` of the stream's last sealed chunk.
    sealed_ceiling: Option<u32>,
    /// Wall time of the last seal (or of load, for fresh streams).
    last_seal_ms: u64,
}

impl TailState {
    /// Drops values covered by sealed chunks; returns whether any were.
    fn prune_sealed(&mut self) -> bool {
        let Some(ceiling) = self.sealed_ceiling else {
            return false;
        };
        let before = self.bitmap.len();
        self.bitmap.remove_range(..=ceiling);
        self.bitmap.len() != before
    }
}

/// Owns every in-memory tail on the write path.
pub struct TailManager {
    meta: Arc<dyn MetaStore>,
    states: Mutex<LruCache<StreamId, TailState>>,
}

impl TailManager {
    pub fn new(meta: Arc<dyn MetaStore>) -> Self {
        Self {
            meta,
            states: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Loads a stream's tail from its checkpoint and sealing ceiling from its
    /// manifest, if not already resident.
    fn ensure_loaded(
        &self,
        states: &mut LruCache<StreamId, TailState>,
        stream: &StreamId,
        now_ms: u64,
    ) -> IndexResult<()> {
        if states.contains(stream) {
            return Ok(());
        }

        let (bitmap, version) = match self.meta.get(&keys::tail_key(stream))? {
            Some(vv) => {
                let checkpoint = TailCheckpoint::decode(vv.value())?;
                (checkpoint.into_bitmap(), Some(vv.version()))
            }
            None => (RoaringBitmap::new(), None),
        };
        let sealed_ceiling = match self.meta.get(&keys::manifest_key(stream))? {
            Some(vv) => ManifestHeader::decode(vv.value())?.sealed_ceiling(),
            None => None,
        };

        let mut state = TailState {
            bitmap,
            dirty: false,
            version,
            sealed_ceiling,
            last_seal_ms: now_ms,
        };
        // A checkpoint holding already-sealed values means a crash landed
        // between a seal's manifest CAS and its tail rewrite; mark dirty so
        // the next checkpoint converges the durable form.
        if state.prune_sealed() {
            state.dirty = true;
        }
        states.put(*stream, state);
        Ok(())
    }

    /// Inserts a value into a stream's tail. Returns whether the tail
    /// changed; values already sealed or already present are no-ops.
    pub fn append(&self, stream: &StreamId, local: u32, now_ms: u64) -> IndexResult<bool> {
        let mut states = self.states.lock();
        self.ensure_loaded(&mut states, stream, now_ms)?;
        let state = states.get_mut(stream).expect("tail: just loaded");
        if state.sealed_ceiling.is_some_and(|c| local <= c) {
            return Ok(false);
        }
        let inserted = state.bitmap.insert(local);
        if inserted {
            state.dirty = true;
        }
        Ok(inserted)
    }

    /// Snapshot of a stream's current tail for sealing; `None` when empty.
    pub fn seal_snapshot(&self, stream: &StreamId) -> IndexResult<Option<RoaringBitmap>> {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(stream) else {
            return Ok(None);
        };
        if state.bitmap.is_empty() {
            return Ok(None);
        }
        Ok(Some(state.bitmap.clone()))
    }

    /// Whether the seal policy fires for this stream.
    pub fn should_seal(&self, stream: &StreamId, cfg: &ChunkConfig, now_ms: u64) -> bool {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(stream) else {
            return false;
        };
        if state.bitmap.is_empty() {
            return false;
        }
        state.bitmap.len() >= cfg.target_entries
            || state.bitmap.serialized_size() as u64 >= cfg.target_bytes
            || now_ms.saturating_sub(state.last_seal_ms) >= cfg.maintenance_seal_interval_ms
    }

    /// Streams whose tails have sat unsealed past the maintenance interval.
    pub fn maintenance_due(&self, cfg: &ChunkConfig, now_ms: u64) -> Vec<StreamId> {
        let states = self.states.lock();
        states
            .iter()
            .filter(|(_, s)| {
                !s.bitmap.is_empty()
                    && now_ms.saturating_sub(s.last_seal_ms) >= cfg.maintenance_seal_interval_ms
            })
            .map(|(stream, _)| *stream)
            .collect()
    }

    /// Drops the sealed range from the tail after a successful manifest CAS.
    pub fn mark_sealed(&self, stream: &StreamId, new_ceiling: u32, now_ms: u64) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(stream) {
            state.sealed_ceiling = Some(new_ceiling);
            state.prune_sealed();
            state.dirty = true;
            state.last_seal_ms = now_ms;
        }
    }

    /// Persists one stream's tail if dirty.
    pub fn checkpoint(&self, stream: &StreamId, fence: Epoch) -> IndexResult<()> {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(stream) else {
            return Ok(());
        };
        if !state.dirty {
            return Ok(());
        }
        let encoded = TailCheckpoint::new(state.bitmap.clone()).encode();
        let key = keys::tail_key(stream);
        let mut outcome = match state.version {
            Some(v) => self.meta.put_if_version(&key, encoded.clone(), v, fence)?,
            None => self.meta.put_if_absent(&key, encoded.clone(), fence)?,
        };
        // GC may reclaim a fully-sealed tail key out from under us; a CAS
        // that lost against an *absent* key retries as a create.
        if !outcome.is_applied() && outcome.current().is_none() && state.version.is_some() {
            debug!(%stream, "tail key reclaimed, recreating");
            outcome = self.meta.put_if_absent(&key, encoded, fence)?;
        }
        match outcome.applied_version() {
            Some(v) => {
                state.version = Some(v);
                state.dirty = false;
                Ok(())
            }
            None => {
                error!(%stream, "tail checkpoint cas lost");
                Err(IndexError::TailCasLost(stream.to_string()))
            }
        }
    }

    /// Persists every dirty tail; returns how many were written.
    pub fn checkpoint_dirty(&self, fence: Epoch) -> IndexResult<usize> {
        let dirty: Vec<StreamId> = {
            let states = self.states.lock();
            states
                .iter()
                .filter(|(_, s)| s.dirty)
                .map(|(stream, _)| *stream)
                .collect()
        };
        for stream in &dirty {
            self.checkpoint(stream, fence)?;
        }
        Ok(dirty.len())
    }

    /// Evicts least-recently-touched clean states above the residency cap.
    /// Dirty states are never evicted; call after checkpoints.
    pub fn trim_clean(&self) {
        let mut states = self.states.lock();
        let mut passed_over = Vec::new();
        while states.len() > LOADED_TAILS_CAP + passed_over.len() {
            match states.pop_lru() {
                Some((stream, state)) if state.dirty => passed_over.push((stream, state)),
                Some(_) => {}
                None => break,
            }
        }
        // Dirty states go back in as most-recently used.
        for (stream, state) in passed_over {
            states.put(stream, state);
        }
    }

    /// Current tail cardinality, for tests and stats.
    pub fn tail_len(&self, stream: &StreamId) -> u64 {
        let mut states = self.states.lock();
        states.get_mut(stream).map(|s| s.bitmap.len()).unwrap_or(0)
    }
}
