//! Startup bootstrap: no log scan, ever.
//!
//! Recovery reads `meta/state` (creating the genesis record on first boot),
//! stamps the new writer epoch into it, and sizes the topic0 catalog.
//! Stream manifests and tails load lazily on first touch; optionally the
//! largest streams are warmed into the cache up front.

use std::sync::Arc;

use chert_codec::{keys, manifest::ManifestHeader, meta::MetaState};
use chert_config::WarmupConfig;
use chert_db::traits::MetaStore;
use chert_index::cache::StreamCache;
use tracing::*;

use crate::{lease::LeaseManager, EngineError};

/// Prepares engine state after lease acquisition. Returns the state the
/// writer starts from.
pub fn bootstrap(
    meta: &Arc<dyn MetaStore>,
    cache: &StreamCache,
    lease: &LeaseManager,
    warmup: &WarmupConfig,
) -> Result<MetaState, EngineError> {
    let epoch = lease.epoch();

    let state = match meta.get(keys::META_STATE_KEY)? {
        Some(vv) => {
            let state = MetaState::decode(vv.value())?;
            if state.writer_epoch() == epoch {
                state
            } else {
                // Reflect the new holder in the state record.
                let stamped =
                    MetaState::new(state.indexed_head(), state.next_log_id(), epoch);
                let outcome = meta.put_if_version(
                    keys::META_STATE_KEY,
                    stamped.encode(),
                    vv.version(),
                    epoch,
                )?;
                if !outcome.is_applied() {
                    return Err(EngineError::StateCasLost);
                }
                stamped
            }
        }
        None => {
            let genesis = MetaState::genesis(epoch);
            let outcome = meta.put_if_absent(keys::META_STATE_KEY, genesis.encode(), epoch)?;
            if !outcome.is_applied() {
                // Lost a create race we should never be in; read what won.
                let vv = meta
                    .get(keys::META_STATE_KEY)?
                    .ok_or(EngineError::StateCasLost)?;
                MetaState::decode(vv.value())?
            } else {
                genesis
            }
        }
    };

    let sig_count = meta.list_prefix(keys::TOPIC0_STATS_PREFIX)?.count();
    info!(
        head = ?state.indexed_head(),
        next_log_id = state.next_log_id(),
        epoch,
        topic0_sigs = sig_count,
        "recovery bootstrap complete"
    );

    if warmup.streams > 0 {
        warm_top_streams(meta, cache, warmup.streams)?;
    }

    Ok(state)
}

/// Primes the cache with the largest streams by sealed entry count.
fn warm_top_streams(
    meta: &Arc<dyn MetaStore>,
    cache: &StreamCache,
    count: usize,
) -> Result<(), EngineError> {
    let mut sized = Vec::new();
    for entry in meta.list_prefix(keys::MANIFEST_PREFIX)? {
        let (key, vv) = entry?;
        let Some(stream) = keys::parse_manifest_key(&key) else {
            continue;
        };
        let header = ManifestHeader::decode(vv.value())?;
        sized.push((header.approx_count(), stream));
    }
    sized.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    let mut warmed = 0usize;
    for (_, stream) in sized.into_iter().take(count) {
        cache.stream_view(meta.as_ref(), &stream)?;
        warmed += 1;
    }
    debug!(warmed, "stream cache warmup complete");
    Ok(())
}
