//! Shared service status: mode state machine, counters, and health reports.
//!
//! Mode transitions are one-way ratchets except Throttled, which clears when
//! the GC backlog falls back under its caps. Degraded is sticky; leaving it
//! is an operator action (restart after repair), never automatic.

use std::sync::Arc;

use chert_common::time::now_ms;
use parking_lot::RwLock;
use tracing::*;

/// Overall service mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServiceMode {
    Normal,
    /// Ingest continues at reduced rate.
    Throttled,
    /// Fail-closed: ingest refused, reads per policy.
    Degraded,
}

/// GC backlog gauges, compared against the configured caps.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GcBacklog {
    pub orphan_chunk_bytes: u64,
    pub orphan_manifest_segments: u64,
    pub stale_tail_keys: u64,
}

/// Monotone activity counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct Counters {
    pub blocks_ingested: u64,
    pub logs_ingested: u64,
    pub chunks_sealed: u64,
    pub tail_checkpoints: u64,
    pub queries_served: u64,
    pub gc_runs: u64,
}

/// Snapshot returned by `health()`.
#[derive(Clone, Debug)]
pub struct HealthReport {
    pub mode: ServiceMode,
    pub lease_held: bool,
    pub gc_backlog: GcBacklog,
    pub last_ingest_ts: Option<u64>,
    pub counters: Counters,
}

#[derive(Debug)]
struct StatusInner {
    mode: ServiceMode,
    lease_held: bool,
    gc_backlog: GcBacklog,
    last_ingest_ts: Option<u64>,
    counters: Counters,
}

/// Cheap-to-clone handle publishing service state to workers and callers.
#[derive(Clone)]
pub struct StatusChannel(Arc<RwLock<StatusInner>>);

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusChannel {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(StatusInner {
            mode: ServiceMode::Normal,
            lease_held: false,
            gc_backlog: GcBacklog::default(),
            last_ingest_ts: None,
            counters: Counters::default(),
        })))
    }

    pub fn mode(&self) -> ServiceMode {
        self.0.read().mode
    }

    pub fn is_degraded(&self) -> bool {
        self.mode() == ServiceMode::Degraded
    }

    /// Fail the service closed. Sticky until operator action.
    pub fn degrade(&self, reason: &str) {
        let mut inner = self.0.write();
        if inner.mode != ServiceMode::Degraded {
            error!(%reason, "service entering degraded mode");
            inner.mode = ServiceMode::Degraded;
        }
    }

    /// Throttles ingest; ignored once degraded.
    pub fn throttle(&self, reason: &str) {
        let mut inner = self.0.write();
        if inner.mode == ServiceMode::Normal {
            warn!(%reason, "service entering throttled mode");
            inner.mode = ServiceMode::Throttled;
        }
    }

    /// Clears a throttle once pressure is gone; never clears Degraded.
    pub fn clear_throttle(&self) {
        let mut inner = self.0.write();
        if inner.mode == ServiceMode::Throttled {
            info!("service throttle cleared");
            inner.mode = ServiceMode::Normal;
        }
    }

    pub fn set_lease_held(&self, held: bool) {
        self.0.write().lease_held = held;
    }

    pub fn set_gc_backlog(&self, backlog: GcBacklog) {
        let mut inner = self.0.write();
        inner.gc_backlog = backlog;
        inner.counters.gc_runs += 1;
    }

    pub fn record_block(&self, log_count: u64) {
        let mut inner = self.0.write();
        inner.counters.blocks_ingested += 1;
        inner.counters.logs_ingested += log_count;
        inner.last_ingest_ts = Some(now_ms());
    }

    pub fn record_seals(&self, sealed: u64) {
        self.0.write().counters.chunks_sealed += sealed;
    }

    pub fn record_tail_checkpoints(&self, count: u64) {
        self.0.write().counters.tail_checkpoints += count;
    }

    pub fn record_query(&self) {
        self.0.write().counters.queries_served += 1;
    }

    pub fn report(&self) -> HealthReport {
        let inner = self.0.read();
        HealthReport {
            mode: inner.mode,
            lease_held: inner.lease_held,
            gc_backlog: inner.gc_backlog,
            last_ingest_ts: inner.last_ingest_ts,
            counters: inner.counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_is_sticky() {
        let status = StatusChannel::new();
        assert_eq!(status.mode(), ServiceMode::Normal);
        status.throttle("backlog");
        assert_eq!(status.mode(), ServiceMode::Throttled);
        status.degrade("corruption");
        assert_eq!(status.mode(), ServiceMode::Degraded);
        status.throttle("backlog");
        status.clear_throttle();
        assert_eq!(status.mode(), ServiceMode::Degraded);
    }

    #[test]
    fn counters_accumulate() {
        let status = StatusChannel::new();
        status.record_block(3);
        status.record_block(2);
        status.record_seals(1);
        let report = status.report();
        assert_eq!(report.counters.blocks_ingested, 2);
        assert_eq!(report.counters.logs_ingested, 5);
        assert_eq!(report.counters.chunks_sealed, 1);
        assert!(report.last_ingest_ts.is_some());
    }
}
