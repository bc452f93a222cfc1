//! Chunk sealing: turning a tail into an immutable blob behind a manifest
//! CAS.
//!
//! The publish order is what makes crashes harmless: the blob lands first
//! (idempotent, invisible), then the manifest CAS makes it visible, then the
//! tail drops the sealed range. A crash between any two steps replays into
//! the same final state.

use std::sync::Arc;

use chert_codec::{chunk::ChunkBlob, keys, manifest::ManifestHeader};
use chert_config::ChunkConfig;
use chert_db::{
    traits::{BlobStore, MetaStore},
    types::Epoch,
    DbError,
};
use chert_primitives::id::StreamId;
use tracing::*;

use crate::{tail::TailManager, IndexError, IndexResult};

/// Manifest CAS attempts before declaring the single-writer invariant broken.
const MANIFEST_CAS_RETRIES: usize = 5;

pub struct ChunkManager {
    meta: Arc<dyn MetaStore>,
    blobs: Arc<dyn BlobStore>,
    cfg: ChunkConfig,
}

impl ChunkManager {
    pub fn new(meta: Arc<dyn MetaStore>, blobs: Arc<dyn BlobStore>, cfg: ChunkConfig) -> Self {
        Self { meta, blobs, cfg }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.cfg
    }

    /// Seals the stream's tail if the policy fires. Returns the sequence of
    /// the chunk published, if any.
    pub fn maybe_seal(
        &self,
        tails: &TailManager,
        stream: &StreamId,
        fence: Epoch,
        now_ms: u64,
    ) -> IndexResult<Option<u32>> {
        if !tails.should_seal(stream, &self.cfg, now_ms) {
            return Ok(None);
        }
        self.seal_stream(tails, stream, fence, now_ms)
    }

    /// Unconditionally seals whatever the stream's tail holds.
    pub fn seal_stream(
        &self,
        tails: &TailManager,
        stream: &StreamId,
        fence: Epoch,
        now_ms: u64,
    ) -> IndexResult<Option<u32>> {
        let Some(snapshot) = tails.seal_snapshot(stream)? else {
            return Ok(None);
        };
        let Some(blob) = ChunkBlob::from_bitmap(snapshot) else {
            return Ok(None);
        };

        let manifest_key = keys::manifest_key(stream);
        let mut current = self.meta.get(&manifest_key)?;

        for attempt in 0..MANIFEST_CAS_RETRIES {
            let (header, version) = match &current {
                Some(vv) => (ManifestHeader::decode(vv.value())?, Some(vv.version())),
                None => (ManifestHeader::default(), None),
            };

            // A replay after a crash that already published this seal: the
            // manifest ceiling has moved past the values we are holding.
            if header.sealed_ceiling().is_some_and(|c| c >= blob.max_local()) {
                debug!(%stream, "seal already published, syncing tail");
                tails.mark_sealed(stream, blob.max_local(), now_ms);
                tails.checkpoint(stream, fence)?;
                return Ok(header.last_chunk_seq());
            }

            let seq = header.next_chunk_seq();
            let chunk_key = keys::chunk_key(stream, seq);
            let encoded = blob.encode();
            match self.blobs.put(&chunk_key, &encoded) {
                Ok(()) => {}
                // The slot can hold a stale blob from a seal that crashed
                // before its manifest CAS and whose tail then kept growing.
                // The slot is not reachable from any manifest, so replace it.
                Err(DbError::BlobMismatch(_)) => {
                    warn!(%stream, seq, "replacing stale blob from crashed seal");
                    self.blobs.delete(&chunk_key)?;
                    self.blobs.put(&chunk_key, &encoded)?;
                }
                Err(e) => return Err(e.into()),
            }

            let mut next = header;
            next.append_ref(blob.to_ref(seq));
            if let Some((segment_id, segment)) = next.spill_full_page() {
                // Page contents are deterministic, so a leftover page from a
                // crashed attempt is identical and acceptable.
                let outcome = self.meta.put_if_absent(
                    &keys::segment_key(stream, segment_id),
                    segment.encode(),
                    fence,
                )?;
                if !outcome.is_applied() {
                    trace!(%stream, segment_id, "segment page already present");
                }
            }

            let outcome = match version {
                Some(v) => self
                    .meta
                    .put_if_version(&manifest_key, next.encode(), v, fence)?,
                None => self.meta.put_if_absent(&manifest_key, next.encode(), fence)?,
            };

            if outcome.is_applied() {
                debug!(%stream, seq, count = blob.count(), "sealed chunk");
                tails.mark_sealed(stream, blob.max_local(), now_ms);
                tails.checkpoint(stream, fence)?;
                return Ok(Some(seq));
            }

            warn!(%stream, attempt, "manifest cas lost, reloading");
            current = outcome.current().cloned();
            if current.is_none() {
                // Header vanished under us; reread from the store.
                current = self.meta.get(&manifest_key)?;
            }
        }

        Err(IndexError::ManifestCasExhausted(stream.to_string()))
    }
}
