//! Orphan reclamation.
//!
//! Everything reachable from a manifest header is live. Chunk blobs past a
//! stream's `last_chunk_seq`, segment pages past the header's directory,
//! and tail checkpoints fully covered by sealed chunks are garbage left by
//! crashed publishes or fenced-out writers. Backlog gauges feed the
//! guardrails: a backlog past its caps throttles ingest or fails the
//! service closed, per policy.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chert_codec::{canonical, keys, manifest::ManifestHeader, tail::TailCheckpoint};
use chert_common::shutdown::ShutdownGuard;
use chert_config::{GcConfig, GuardrailAction, GuardrailConfig};
use chert_db::traits::{BlobStore, MetaStore};
use chert_primitives::id::StreamId;
use tracing::*;

use crate::{
    lease::LeaseManager,
    status::{GcBacklog, StatusChannel},
    EngineError,
};

/// What one GC pass found and reclaimed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GcStats {
    pub orphan_chunks_deleted: u64,
    pub orphan_segments_deleted: u64,
    pub stale_tails_deleted: u64,
    pub hash_entries_pruned: u64,
    /// Garbage still present after the pass: failed best-effort deletes and
    /// in-flight slots left alone.
    pub backlog: GcBacklog,
}

pub struct GcWorker {
    meta: Arc<dyn MetaStore>,
    blobs: Arc<dyn BlobStore>,
    lease: Arc<LeaseManager>,
    status: StatusChannel,
    cfg: GcConfig,
    guardrail: GuardrailConfig,
}

impl GcWorker {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        blobs: Arc<dyn BlobStore>,
        lease: Arc<LeaseManager>,
        status: StatusChannel,
        cfg: GcConfig,
        guardrail: GuardrailConfig,
    ) -> Self {
        Self {
            meta,
            blobs,
            lease,
            status,
            cfg,
            guardrail,
        }
    }

    /// Loads every manifest header; these are the reachability roots.
    fn load_manifests(&self) -> Result<HashMap<StreamId, ManifestHeader>, EngineError> {
        let mut headers = HashMap::new();
        for entry in self.meta.list_prefix(keys::MANIFEST_PREFIX)? {
            let (key, vv) = entry?;
            let Some(stream) = keys::parse_manifest_key(&key) else {
                warn!("unparseable manifest key, skipping");
                continue;
            };
            headers.insert(stream, ManifestHeader::decode(vv.value())?);
        }
        Ok(headers)
    }

    /// One full mark-and-sweep pass.
    pub fn run_once(&self) -> Result<GcStats, EngineError> {
        let fence = self.lease.epoch();
        let manifests = self.load_manifests()?;
        let mut stats = GcStats::default();

        // Chunk blobs. The slot at `next_chunk_seq` is left alone: an
        // in-flight seal writes its blob there before the manifest CAS, and
        // the publisher itself replaces a stale leftover in that slot.
        for entry in self.blobs.list(keys::CHUNK_PREFIX)? {
            let (key, size) = entry?;
            let Some((stream, seq)) = keys::parse_chunk_key(&key) else {
                continue;
            };
            let header = manifests.get(&stream);
            let live = header.is_some_and(|h| h.last_chunk_seq().is_some_and(|last| seq <= last));
            if live {
                continue;
            }
            let next_seq = header.map(|h| h.next_chunk_seq()).unwrap_or(0);
            if seq == next_seq {
                stats.backlog.orphan_chunk_bytes += size;
                continue;
            }
            match self.blobs.delete(&key) {
                Ok(()) => {
                    stats.orphan_chunks_deleted += 1;
                    trace!(%stream, seq, "reclaimed orphan chunk");
                }
                Err(e) => {
                    warn!(%stream, seq, err = %e, "orphan chunk delete failed");
                    stats.backlog.orphan_chunk_bytes += size;
                }
            }
        }

        // Segment pages past the header directory.
        for entry in self.meta.list_prefix(keys::SEGMENT_PREFIX)? {
            let (key, vv) = entry?;
            let Some((stream, segment_id)) = keys::parse_segment_key(&key) else {
                continue;
            };
            let live = manifests
                .get(&stream)
                .is_some_and(|h| (segment_id as usize) < h.segments().len());
            if live {
                continue;
            }
            if self
                .meta
                .delete_if_version(&key, vv.version(), fence)?
                .is_applied()
            {
                stats.orphan_segments_deleted += 1;
            } else {
                stats.backlog.orphan_manifest_segments += 1;
            }
        }

        // Tail checkpoints made fully redundant by sealed chunks. The
        // writer recreates its key if it appends to the stream again.
        for entry in self.meta.list_prefix(keys::TAIL_PREFIX)? {
            let (key, vv) = entry?;
            let Some(stream) = keys::parse_tail_key(&key) else {
                continue;
            };
            let checkpoint = TailCheckpoint::decode(vv.value())?;
            let ceiling = manifests.get(&stream).and_then(|h| h.sealed_ceiling());
            let redundant = match checkpoint.bitmap().max() {
                None => manifests.contains_key(&stream),
                Some(max) => ceiling.is_some_and(|c| max <= c),
            };
            if !redundant {
                continue;
            }
            if self
                .meta
                .delete_if_version(&key, vv.version(), fence)?
                .is_applied()
            {
                stats.stale_tails_deleted += 1;
            } else {
                stats.backlog.stale_tail_keys += 1;
            }
        }

        // Optional pruning of the hash→num map below a height floor.
        if let Some(floor) = self.cfg.prune_hash_index_below {
            for entry in self.meta.list_prefix(keys::BLOCK_HASH_PREFIX)? {
                let (key, vv) = entry?;
                let block_num = canonical::decode_block_num(vv.value())?;
                if block_num >= floor {
                    continue;
                }
                if self
                    .meta
                    .delete_if_version(&key, vv.version(), fence)?
                    .is_applied()
                {
                    stats.hash_entries_pruned += 1;
                }
            }
        }

        self.publish_backlog(&stats);
        debug!(
            chunks = stats.orphan_chunks_deleted,
            segments = stats.orphan_segments_deleted,
            tails = stats.stale_tails_deleted,
            "gc pass complete"
        );
        Ok(stats)
    }

    fn publish_backlog(&self, stats: &GcStats) {
        self.status.set_gc_backlog(stats.backlog);
        let over = stats.backlog.orphan_chunk_bytes > self.cfg.max_orphan_chunk_bytes
            || stats.backlog.orphan_manifest_segments > self.cfg.max_orphan_manifest_segments
            || stats.backlog.stale_tail_keys > self.cfg.max_stale_tail_keys;
        if over {
            match self.guardrail.action {
                GuardrailAction::Throttle => self.status.throttle("gc backlog over caps"),
                GuardrailAction::FailClosed => self.status.degrade("gc backlog over caps"),
            }
        } else {
            self.status.clear_throttle();
        }
    }

    /// Periodic loop; exits on shutdown.
    pub fn run_loop(&self, shutdown: ShutdownGuard) {
        let interval = Duration::from_millis(self.cfg.interval_ms);
        loop {
            if !shutdown.sleep_interruptible(interval) {
                break;
            }
            if !self.lease.is_held() || self.status.is_degraded() {
                continue;
            }
            if let Err(e) = self.run_once() {
                warn!(err = %e, "gc pass failed");
                if e.is_fatal() {
                    self.status.degrade("gc hit fatal error");
                }
            }
        }
    }
}
