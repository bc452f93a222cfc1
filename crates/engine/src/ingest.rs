//! Single-writer per-block ingest.
//!
//! Every write before the final `meta/state` CAS is either content-identical
//! on replay (`put_if_absent` of deterministic bytes) or a set insert, so a
//! crash anywhere in the pipeline replays into the same durable state. Only
//! the final CAS makes the block visible to readers.

use std::{cmp::Ordering, collections::BTreeSet, sync::Arc, thread, time::Duration};

use chert_codec::{
    canonical, keys,
    meta::MetaState,
};
use chert_config::EngineConfig;
use chert_db::{
    traits::{BlobStore, MetaStore},
    types::{display_key, CasOutcome, Epoch},
};
use chert_index::{chunk::ChunkManager, tail::TailManager, topic0::Topic0Policy};
use chert_common::time::now_ms;
use chert_primitives::{
    block::{BlockMeta, FinalizedBlock},
    buf::Buf32,
    id::{local_of, shard_of, StreamId},
    log::LogRecord,
};
use tracing::*;

use crate::{
    lease::LeaseManager,
    status::{ServiceMode, StatusChannel},
    EngineError,
};

/// Result of offering a block to ingest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    /// The block is now visible to queries.
    Applied,
    /// The block was already ingested with the same hash; no state changed.
    AlreadyIngested,
    /// A different block appeared at an already-finalized height. The
    /// service fails closed.
    FinalityViolation,
    Rejected(RejectKind),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RejectKind {
    /// The block is not `head + 1`.
    OutOfOrder { expected: u64, got: u64 },
    /// The block does not link to the indexed head (or genesis base).
    ParentMismatch,
    /// This writer no longer holds the lease.
    LeaseLost,
    /// The service is fail-closed.
    Degraded,
    /// The backend kept failing transiently; the block can be re-offered.
    Backend,
}

pub struct IngestEngine {
    meta: Arc<dyn MetaStore>,
    tails: Arc<TailManager>,
    chunks: ChunkManager,
    topic0: Topic0Policy,
    lease: Arc<LeaseManager>,
    status: StatusChannel,
    cfg: EngineConfig,
}

impl IngestEngine {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        blobs: Arc<dyn BlobStore>,
        lease: Arc<LeaseManager>,
        status: StatusChannel,
        cfg: EngineConfig,
    ) -> Self {
        let tails = Arc::new(TailManager::new(meta.clone()));
        let chunks = ChunkManager::new(meta.clone(), blobs, cfg.chunk.clone());
        let topic0 = Topic0Policy::new(meta.clone(), cfg.topic0.clone());
        Self {
            meta,
            tails,
            chunks,
            topic0,
            lease,
            status,
            cfg,
        }
    }

    /// Shared tail manager, used by the maintenance flusher.
    pub fn tails(&self) -> &Arc<TailManager> {
        &self.tails
    }

    pub fn chunks(&self) -> &ChunkManager {
        &self.chunks
    }

    /// Runs the per-block pipeline to the visibility barrier.
    pub fn ingest_block(&self, block: &FinalizedBlock) -> Result<IngestOutcome, EngineError> {
        if self.status.is_degraded() {
            return Ok(IngestOutcome::Rejected(RejectKind::Degraded));
        }
        if !self.lease.is_held() {
            return Ok(IngestOutcome::Rejected(RejectKind::LeaseLost));
        }
        if self.status.mode() == ServiceMode::Throttled {
            thread::sleep(Duration::from_millis(self.cfg.guardrail.throttle_delay_ms));
        }
        let fence = self.lease.epoch();

        // Ordering against the authoritative state record.
        let state_vv = self
            .meta
            .get(keys::META_STATE_KEY)?
            .ok_or_else(|| EngineError::Invariant("meta/state missing".into()))?;
        let state = MetaState::decode(state_vv.value())?;
        let expected = state.expected_next_block();
        let block_num = block.block_num();

        match block_num.cmp(&expected) {
            Ordering::Equal => {}
            Ordering::Greater => {
                return Ok(IngestOutcome::Rejected(RejectKind::OutOfOrder {
                    expected,
                    got: block_num,
                }));
            }
            Ordering::Less => return self.check_replay(block),
        }

        // Parent linkage.
        let parent_ok = if block_num == 0 {
            block.parent_hash() == &self.cfg.genesis.parent_hash
        } else {
            let head_meta = self.read_block_meta(block_num - 1)?;
            block.parent_hash() == head_meta.block_hash()
        };
        if !parent_ok {
            warn!(%block_num, "parent hash does not link to indexed head");
            return Ok(IngestOutcome::Rejected(RejectKind::ParentMismatch));
        }

        let first_log_id = state.next_log_id();
        let log_count = block.logs().len() as u32;
        debug!(%block_num, logs = log_count, %first_log_id, "ingesting block");

        // Canonical tables, idempotent by deterministic keying.
        for (i, entry) in block.logs().iter().enumerate() {
            let global_id = first_log_id + i as u64;
            let record =
                LogRecord::from_entry(entry, block_num, *block.block_hash(), i as u32);
            self.put_idempotent(
                &keys::log_key(global_id),
                canonical::encode_log_record(&record),
                fence,
            )?;
        }
        let meta_record = BlockMeta::new(
            block_num,
            *block.block_hash(),
            *block.parent_hash(),
            first_log_id,
            log_count,
        );
        self.put_idempotent(
            &keys::block_meta_key(block_num),
            canonical::encode_block_meta(&meta_record),
            fence,
        )?;
        self.put_idempotent(
            &keys::block_hash_key(block.block_hash()),
            canonical::encode_block_num(block_num),
            fence,
        )?;

        // Stream appends.
        let now = now_ms();
        let mut touched = BTreeSet::new();
        let mut sigs = BTreeSet::new();
        for (i, entry) in block.logs().iter().enumerate() {
            let global_id = first_log_id + i as u64;
            let shard = shard_of(global_id);
            let local = local_of(global_id);

            let addr_stream = StreamId::address(*entry.address(), shard);
            self.tails.append(&addr_stream, local, now)?;
            touched.insert(addr_stream);

            for pos in 1..=3usize {
                if let Some(topic) = entry.topics().get(pos) {
                    let stream = StreamId::topic(pos, *topic, shard).expect("ingest: topic pos");
                    self.tails.append(&stream, local, now)?;
                    touched.insert(stream);
                }
            }

            if let Some(sig) = entry.sig() {
                sigs.insert(*sig);
                if self.topic0.log_indexing_enabled(sig, block_num)? {
                    let stream = StreamId::topic0_log(*sig, shard);
                    self.tails.append(&stream, local, now)?;
                    touched.insert(stream);
                }
            }
        }
        // One block-level append per distinct signature.
        let block_shard = shard_of(block_num);
        let block_local = local_of(block_num);
        for sig in &sigs {
            let stream = StreamId::topic0_block(*sig, block_shard);
            self.tails.append(&stream, block_local, now)?;
            touched.insert(stream);
        }

        // Seal policy over every stream this block touched.
        let mut sealed = 0u64;
        for stream in &touched {
            if self.chunks.maybe_seal(&self.tails, stream, fence, now)?.is_some() {
                sealed += 1;
            }
        }
        if sealed > 0 {
            self.status.record_seals(sealed);
        }

        // Rolling-window update for the block's signatures.
        let sig_list: Vec<Buf32> = sigs.into_iter().collect();
        self.topic0.observe_block(block_num, &sig_list, fence)?;

        // Persist every dirty tail before the block can become visible.
        let checkpoints = self.tails.checkpoint_dirty(fence)?;
        self.status.record_tail_checkpoints(checkpoints as u64);
        self.tails.trim_clean();

        // Visibility barrier. The lease is re-asserted first; the fence on
        // the CAS protects against the race anyway.
        if !self.lease.is_held() {
            return Ok(IngestOutcome::Rejected(RejectKind::LeaseLost));
        }
        let next = state.advanced(block_num, block.logs().len() as u64, fence);
        let outcome = self.meta.put_if_version(
            keys::META_STATE_KEY,
            next.encode(),
            state_vv.version(),
            fence,
        )?;
        if !outcome.is_applied() {
            error!(%block_num, "meta/state cas lost under single writer");
            return Err(EngineError::StateCasLost);
        }

        self.status.record_block(log_count as u64);
        debug!(%block_num, "block published");
        Ok(IngestOutcome::Applied)
    }

    /// A block at or below the head: idempotent replay or finality violation.
    fn check_replay(&self, block: &FinalizedBlock) -> Result<IngestOutcome, EngineError> {
        let stored = self.read_block_meta(block.block_num())?;
        if stored.block_hash() == block.block_hash() {
            debug!(block_num = block.block_num(), "replayed block, no-op");
            Ok(IngestOutcome::AlreadyIngested)
        } else {
            error!(
                block_num = block.block_num(),
                "conflicting block at finalized height"
            );
            Ok(IngestOutcome::FinalityViolation)
        }
    }

    fn read_block_meta(&self, block_num: u64) -> Result<BlockMeta, EngineError> {
        let vv = self
            .meta
            .get(&keys::block_meta_key(block_num))?
            .ok_or_else(|| {
                EngineError::Invariant(format!("block_meta {block_num} missing below head"))
            })?;
        Ok(canonical::decode_block_meta(vv.value())?)
    }

    /// `put_if_absent` that accepts byte-identical replays.
    fn put_idempotent(&self, key: &[u8], value: Vec<u8>, fence: Epoch) -> Result<(), EngineError> {
        match self.meta.put_if_absent(key, value.clone(), fence)? {
            CasOutcome::Applied(_) => Ok(()),
            CasOutcome::NotApplied(Some(current)) if current.value() == value => Ok(()),
            CasOutcome::NotApplied(_) => Err(EngineError::ReplayDivergence(display_key(key))),
        }
    }
}
