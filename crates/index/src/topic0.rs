//! The topic0 hybrid policy.
//!
//! Every signature is always indexed at block granularity. Log-level
//! indexing is switched on only for signatures that have become rare, using
//! a rolling window over recent blocks with hysteresis so hot signatures
//! never thrash the switch.
//!
//! Each tracked signature keeps a bit-ring over the last `window_len`
//! blocks. Rings are advanced when the signature appears; the blocks in
//! between are absences and clear their slots lazily, with a full-window gap
//! short-circuiting to a zeroed ring. Transitions are evaluated on
//! appearance, after the window has filled: the appearance rate only decays
//! while a signature is absent, so both hysteresis edges are crossed at an
//! appearance.

use std::{num::NonZeroUsize, sync::Arc};

use borsh::{BorshDeserialize, BorshSerialize};
use chert_codec::{
    frame::{decode_framed, encode_framed},
    keys, CodecResult,
};
use chert_config::Topic0Config;
use chert_db::{
    traits::MetaStore,
    types::{Epoch, Version},
};
use chert_primitives::buf::Buf32;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::*;

use crate::{IndexError, IndexResult};

/// Signature states kept resident; evicted ones reload from the store.
const SIG_CACHE_CAP: usize = 4096;

/// Whether a signature's logs are individually indexed, and from when.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct Topic0Mode {
    log_enabled: bool,
    enabled_from_block: u64,
}

impl Topic0Mode {
    pub fn log_enabled(&self) -> bool {
        self.log_enabled
    }

    pub fn enabled_from_block(&self) -> u64 {
        self.enabled_from_block
    }

    /// Whether logs of this signature in `block_num` get log-level appends.
    pub fn applies_at(&self, block_num: u64) -> bool {
        self.log_enabled && block_num >= self.enabled_from_block
    }

    /// Whether the log-level stream covers every block in `[from, to]`.
    pub fn covers_range(&self, from: u64, _to: u64) -> bool {
        self.log_enabled && self.enabled_from_block <= from
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_framed(self)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_framed("topic0_mode", bytes)
    }
}

/// Rolling appearance window for one signature.
#[derive(Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct Topic0Stats {
    window_len: u32,
    /// Blocks in the window that contained the signature.
    population: u32,
    /// Distinct blocks the ring has observed, capped at `window_len`; gates
    /// transitions until the window has filled.
    coverage: u32,
    /// Highest block the ring reflects.
    last_block: u64,
    /// One bit per block slot, indexed by `block_num % window_len`.
    ring: Vec<u64>,
}

impl Topic0Stats {
    /// Fresh stats for a signature first seen in `block_num`.
    pub fn first_seen(window_len: u32, block_num: u64) -> Self {
        let words = (window_len as usize).div_ceil(64);
        let mut stats = Self {
            window_len,
            population: 0,
            coverage: 1,
            last_block: block_num,
            ring: vec![0; words],
        };
        stats.set_slot(block_num);
        stats.population = 1;
        stats
    }

    fn slot(&self, block_num: u64) -> (usize, u64) {
        let bit = (block_num % self.window_len as u64) as usize;
        (bit / 64, 1u64 << (bit % 64))
    }

    fn set_slot(&mut self, block_num: u64) {
        let (word, mask) = self.slot(block_num);
        self.ring[word] |= mask;
    }

    fn slot_set(&self, block_num: u64) -> bool {
        let (word, mask) = self.slot(block_num);
        self.ring[word] & mask != 0
    }

    fn clear_slot(&mut self, block_num: u64) {
        let (word, mask) = self.slot(block_num);
        if self.ring[word] & mask != 0 {
            self.ring[word] &= !mask;
            self.population -= 1;
        }
    }

    /// Advances the ring to `block_num`, where the signature appears. Blocks
    /// since `last_block` are absences.
    pub fn observe_appearance(&mut self, block_num: u64) {
        debug_assert!(block_num > self.last_block);
        let gap = block_num - self.last_block;
        if gap >= self.window_len as u64 {
            // The whole window rolled over with nothing in it.
            self.ring.fill(0);
            self.population = 0;
            self.coverage = self.window_len;
        } else {
            for b in (self.last_block + 1)..=block_num {
                self.clear_slot(b);
            }
            self.coverage = (self.coverage as u64 + gap).min(self.window_len as u64) as u32;
        }
        self.set_slot(block_num);
        self.population += 1;
        self.last_block = block_num;
    }

    pub fn window_len(&self) -> u32 {
        self.window_len
    }

    pub fn population(&self) -> u32 {
        self.population
    }

    pub fn last_block(&self) -> u64 {
        self.last_block
    }

    /// Whether the ring has a full window of history behind it.
    pub fn window_filled(&self) -> bool {
        self.coverage >= self.window_len
    }

    /// Appearance rate in parts-per-million.
    pub fn rate_ppm(&self) -> u64 {
        self.population as u64 * 1_000_000 / self.window_len as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_framed(self)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_framed("topic0_stats", bytes)
    }
}

struct SigState {
    mode: Topic0Mode,
    mode_version: Option<Version>,
    /// Set when a transition changed `mode` since it was last persisted.
    mode_dirty: bool,
    stats: Topic0Stats,
    stats_version: Option<Version>,
}

/// Tracks appearance windows and drives mode transitions on the write path.
pub struct Topic0Policy {
    meta: Arc<dyn MetaStore>,
    cfg: Topic0Config,
    sigs: Mutex<LruCache<Buf32, SigState>>,
}

impl Topic0Policy {
    pub fn new(meta: Arc<dyn MetaStore>, cfg: Topic0Config) -> Self {
        Self {
            meta,
            cfg,
            sigs: Mutex::new(LruCache::new(
                NonZeroUsize::new(SIG_CACHE_CAP).expect("topic0: nonzero cap"),
            )),
        }
    }

    /// Number of persisted signature records, loaded lazily. Used by
    /// recovery to sanity-log the catalog size without retaining it.
    pub fn catalog_size(&self) -> IndexResult<usize> {
        Ok(self.meta.list_prefix(keys::TOPIC0_STATS_PREFIX)?.count())
    }

    /// Loads a signature's persisted state into the resident cache. Returns
    /// false when the signature has never been seen.
    fn load_sig(&self, sigs: &mut LruCache<Buf32, SigState>, sig: &Buf32) -> IndexResult<bool> {
        if sigs.contains(sig) {
            return Ok(true);
        }
        let Some(vv) = self.meta.get(&keys::topic0_stats_key(sig))? else {
            return Ok(false);
        };
        let stats = Topic0Stats::decode(vv.value())?;
        let stats_version = vv.version();
        let (mode, mode_version) = match self.meta.get(&keys::topic0_mode_key(sig))? {
            Some(vv) => (Topic0Mode::decode(vv.value())?, Some(vv.version())),
            None => (Topic0Mode::default(), None),
        };
        sigs.put(
            *sig,
            SigState {
                mode,
                mode_version,
                mode_dirty: false,
                stats,
                stats_version: Some(stats_version),
            },
        );
        Ok(true)
    }

    /// Whether logs with this signature in `block_num` should also get
    /// log-level appends.
    pub fn log_indexing_enabled(&self, sig: &Buf32, block_num: u64) -> IndexResult<bool> {
        let mut sigs = self.sigs.lock();
        if !self.load_sig(&mut sigs, sig)? {
            return Ok(false);
        }
        Ok(sigs
            .get(sig)
            .map(|s| s.mode.applies_at(block_num))
            .unwrap_or(false))
    }

    /// Advances the window of every signature appearing in `block_num` and
    /// persists stats plus any mode transition.
    pub fn observe_block(
        &self,
        block_num: u64,
        sigs_in_block: &[Buf32],
        fence: Epoch,
    ) -> IndexResult<()> {
        let mut sigs = self.sigs.lock();
        for sig in sigs_in_block {
            if !self.load_sig(&mut sigs, sig)? {
                sigs.put(
                    *sig,
                    SigState {
                        mode: Topic0Mode::default(),
                        mode_version: None,
                        mode_dirty: false,
                        stats: Topic0Stats::first_seen(self.cfg.window_len, block_num),
                        stats_version: None,
                    },
                );
            }

            let state = sigs.get_mut(sig).expect("topic0: just loaded");
            if block_num > state.stats.last_block() {
                state.stats.observe_appearance(block_num);
            }
            Self::apply_transition(&self.cfg, sig, state, block_num);
            self.persist(sig, state, fence)?;
        }
        Ok(())
    }

    fn apply_transition(cfg: &Topic0Config, sig: &Buf32, state: &mut SigState, block_num: u64) {
        if !state.stats.window_filled() {
            return;
        }
        let rate_scaled = state.stats.population() as u64 * 1_000_000;
        let window = state.stats.window_len() as u64;
        if !state.mode.log_enabled() && rate_scaled < window * cfg.enable_rate_ppm as u64 {
            // The transition takes effect for the following block; the block
            // that crossed the threshold is not log-indexed.
            info!(%sig, %block_num, "enabling log-level indexing for cold signature");
            state.mode = Topic0Mode {
                log_enabled: true,
                enabled_from_block: block_num + 1,
            };
            state.mode_dirty = true;
        } else if state.mode.log_enabled() && rate_scaled > window * cfg.disable_rate_ppm as u64 {
            info!(%sig, %block_num, "disabling log-level indexing for hot signature");
            state.mode = Topic0Mode {
                log_enabled: false,
                enabled_from_block: 0,
            };
            state.mode_dirty = true;
        }
    }

    fn persist(&self, sig: &Buf32, state: &mut SigState, fence: Epoch) -> IndexResult<()> {
        let stats_key = keys::topic0_stats_key(sig);
        let encoded = state.stats.encode();
        let outcome = match state.stats_version {
            Some(v) => self.meta.put_if_version(&stats_key, encoded, v, fence)?,
            None => self.meta.put_if_absent(&stats_key, encoded, fence)?,
        };
        state.stats_version = Some(
            outcome
                .applied_version()
                .ok_or_else(|| IndexError::Topic0CasLost(sig.to_string()))?,
        );

        if state.mode_dirty {
            let mode_key = keys::topic0_mode_key(sig);
            let encoded = state.mode.encode();
            let outcome = match state.mode_version {
                Some(v) => self.meta.put_if_version(&mode_key, encoded, v, fence)?,
                None => self.meta.put_if_absent(&mode_key, encoded, fence)?,
            };
            state.mode_version = Some(
                outcome
                    .applied_version()
                    .ok_or_else(|| IndexError::Topic0CasLost(sig.to_string()))?,
            );
            state.mode_dirty = false;
        }
        Ok(())
    }

    /// The persisted mode for a signature, bypassing the resident cache.
    pub fn mode_of(&self, sig: &Buf32) -> IndexResult<Option<Topic0Mode>> {
        match self.meta.get(&keys::topic0_mode_key(sig))? {
            Some(vv) => Ok(Some(Topic0Mode::decode(vv.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use chert_db::mem::MemMetaStore;

    use super::*;

    fn sig() -> Buf32 {
        Buf32::new([0xaa; 32])
    }

    fn policy(window_len: u32) -> Topic0Policy {
        Topic0Policy::new(
            Arc::new(MemMetaStore::new()),
            Topic0Config {
                window_len,
                ..Default::default()
            },
        )
    }

    #[test]
    fn ring_tracks_population_over_gaps() {
        let mut stats = Topic0Stats::first_seen(100, 0);
        assert_eq!(stats.population(), 1);
        stats.observe_appearance(10);
        assert_eq!(stats.population(), 2);
        // Wrapping past the window clears the old slots.
        stats.observe_appearance(100);
        assert_eq!(stats.population(), 2);
        assert!(stats.slot_set(100));
        stats.observe_appearance(110);
        assert_eq!(stats.population(), 2);
    }

    #[test]
    fn full_window_gap_resets_ring() {
        let mut stats = Topic0Stats::first_seen(100, 5);
        stats.observe_appearance(5000);
        assert_eq!(stats.population(), 1);
        assert!(stats.window_filled());
    }

    #[test]
    fn stats_codec_roundtrip() {
        let mut stats = Topic0Stats::first_seen(50_000, 3);
        stats.observe_appearance(40_000);
        let back = Topic0Stats::decode(&stats.encode()).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn no_transition_before_window_fills() {
        let policy = policy(1000);
        policy.observe_block(0, &[sig()], 1).unwrap();
        policy.observe_block(500, &[sig()], 1).unwrap();
        assert_eq!(policy.mode_of(&sig()).unwrap(), None);
        assert!(!policy.log_indexing_enabled(&sig(), 501).unwrap());
    }

    #[test]
    fn enable_bound_is_strict() {
        // window 1000, enable below 0.1%: a population of exactly 1 in 1000
        // sits on the bound and must not enable.
        let policy = policy(1000);
        policy.observe_block(0, &[sig()], 1).unwrap();
        policy.observe_block(2000, &[sig()], 1).unwrap();
        let mode = policy.mode_of(&sig()).unwrap();
        assert!(mode.is_none() || !mode.unwrap().log_enabled());
        assert!(!policy.log_indexing_enabled(&sig(), 2001).unwrap());
    }

    #[test]
    fn enable_fires_strictly_below_bound() {
        let meta = Arc::new(MemMetaStore::new());
        let cfg = Topic0Config {
            window_len: 2000,
            enable_rate_ppm: 1_000,
            disable_rate_ppm: 10_000,
        };
        let policy = Topic0Policy::new(meta, cfg);
        policy.observe_block(0, &[sig()], 1).unwrap();
        // Full-window gap: population 1 of 2000 = 0.05% < 0.1%.
        policy.observe_block(10_000, &[sig()], 1).unwrap();
        let mode = policy.mode_of(&sig()).unwrap().unwrap();
        assert!(mode.log_enabled());
        assert_eq!(mode.enabled_from_block(), 10_001);
        assert!(policy.log_indexing_enabled(&sig(), 10_001).unwrap());
        assert!(!policy.log_indexing_enabled(&sig(), 10_000).unwrap());

        // Now the signature goes hot: appear in every block until the rate
        // crosses 1%.
        let mut block = 10_001;
        let mut disabled_at = None;
        for _ in 0..40 {
            policy.observe_block(block, &[sig()], 1).unwrap();
            let mode = policy.mode_of(&sig()).unwrap().unwrap();
            if !mode.log_enabled() {
                disabled_at = Some(block);
                break;
            }
            block += 1;
        }
        // 21 appearances in a 2000 window pushes past 1%.
        assert!(disabled_at.is_some());
        let mode = policy.mode_of(&sig()).unwrap().unwrap();
        assert_eq!(mode.enabled_from_block(), 0);
    }
}
