//! Engine configuration.
//!
//! Every section and field carries a default, so an empty TOML document (or
//! `EngineConfig::default()`) yields a working configuration. Durations are
//! plain millisecond integers; rates are parts-per-million so the hot paths
//! stay in integer math.

use chert_primitives::buf::Buf32;
use serde::Deserialize;

/// Chunk sealing thresholds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Seal a tail once it holds this many entries.
    pub target_entries: u64,
    /// Seal a tail once its serialized size reaches this many bytes.
    pub target_bytes: u64,
    /// Seal any dirty tail at least this often, regardless of size.
    pub maintenance_seal_interval_ms: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_entries: 1950,
            target_bytes: 64 * 1024,
            maintenance_seal_interval_ms: 10 * 60 * 1000,
        }
    }
}

/// Tail checkpointing cadence.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Checkpoint any dirty tail at least this often.
    pub flush_interval_ms: u64,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5000,
        }
    }
}

/// Rolling-window hysteresis for per-signature log-level indexing.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Topic0Config {
    /// Number of recent blocks the appearance window covers.
    pub window_len: u32,
    /// Enable log-level indexing when the appearance rate drops below this.
    pub enable_rate_ppm: u32,
    /// Disable it again when the rate climbs above this.
    pub disable_rate_ppm: u32,
}

impl Default for Topic0Config {
    fn default() -> Self {
        Self {
            window_len: 50_000,
            enable_rate_ppm: 1_000,
            disable_rate_ppm: 10_000,
        }
    }
}

/// What to do when a clause's OR-list exceeds `max_or_terms`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrOverflowAction {
    /// Fail the query.
    Error,
    /// Fall back to the block-driven scan.
    BlockScan,
}

/// Query planner guardrails.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Largest OR-list a single clause may carry.
    pub max_or_terms: usize,
    pub or_overflow_action: OrOverflowAction,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_or_terms: 128,
            or_overflow_action: OrOverflowAction::Error,
        }
    }
}

/// Orphan reclamation limits and cadence.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub interval_ms: u64,
    pub max_orphan_chunk_bytes: u64,
    pub max_orphan_manifest_segments: u64,
    pub max_stale_tail_keys: u64,
    /// When set, prune `block_hash_to_num` entries for blocks below this
    /// height.
    pub prune_hash_index_below: Option<u64>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_orphan_chunk_bytes: 256 * 1024 * 1024,
            max_orphan_manifest_segments: 4096,
            max_stale_tail_keys: 4096,
            prune_hash_index_below: None,
        }
    }
}

/// Reaction to a GC backlog past its caps.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    /// Keep ingesting at reduced rate.
    Throttle,
    /// Stop ingesting until an operator intervenes.
    FailClosed,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub action: GuardrailAction,
    /// Delay applied per block while throttled.
    pub throttle_delay_ms: u64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            action: GuardrailAction::Throttle,
            throttle_delay_ms: 250,
        }
    }
}

/// Writer lease timing.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_ms: u64,
    pub renew_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            renew_interval_ms: 3_000,
        }
    }
}

/// Behavior after a fail-closed transition.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DegradedConfig {
    /// Whether queries keep serving the last consistent snapshot.
    pub serve_reads: bool,
}

impl Default for DegradedConfig {
    fn default() -> Self {
        Self { serve_reads: true }
    }
}

/// Startup cache warmup.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Preload manifests for this many of the largest streams; 0 disables.
    pub streams: usize,
}

/// Chain base the first block must link to.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Expected `parent_hash` of block 0.
    pub parent_hash: Buf32,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunk: ChunkConfig,
    pub tail: TailConfig,
    pub topic0: Topic0Config,
    pub planner: PlannerConfig,
    pub gc: GcConfig,
    pub guardrail: GuardrailConfig,
    pub lease: LeaseConfig,
    pub degraded: DegradedConfig,
    pub warmup: WarmupConfig,
    pub genesis: GenesisConfig,
}
