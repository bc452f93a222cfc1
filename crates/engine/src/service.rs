//! The service facade the embedding process talks to.
//!
//! Owns the single writer, the shared reader engine, the status channel,
//! and the background workers (lease renewal, GC, tail flush). All the
//! fail-closed decisions funnel through here: fatal pipeline errors degrade
//! the service, and a degraded service refuses ingest and serves reads only
//! if configured to.

use std::{sync::Arc, thread, time::Duration};

use chert_common::{
    retry::{Backoff, ExponentialBackoff},
    shutdown::{ShutdownGuard, ShutdownSignal},
    time::now_ms,
};
use chert_config::EngineConfig;
use chert_db::traits::{BlobStore, MetaStore};
use chert_index::cache::StreamCache;
use chert_primitives::{block::FinalizedBlock, filter::LogFilter, log::IndexedLog};
use chert_query::{QueryEngine, QueryError};
use parking_lot::Mutex;
use tracing::*;

use crate::{
    gc::GcWorker,
    ingest::{IngestEngine, IngestOutcome, RejectKind},
    lease::LeaseManager,
    recovery,
    status::{HealthReport, StatusChannel},
    EngineError,
};

/// Transient-failure retries per offered block.
const INGEST_TRANSIENT_RETRIES: u16 = 4;

pub struct LogIndexService {
    ingest: IngestEngine,
    /// Serializes writers; queries never take it.
    ingest_lock: Mutex<()>,
    query: QueryEngine,
    status: StatusChannel,
    lease: Arc<LeaseManager>,
    shutdown: ShutdownSignal,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    serve_reads_degraded: bool,
}

impl LogIndexService {
    /// Acquires the writer lease, runs recovery, and spawns the background
    /// workers.
    pub fn open(
        meta: Arc<dyn MetaStore>,
        blobs: Arc<dyn BlobStore>,
        cfg: EngineConfig,
    ) -> Result<Arc<Self>, EngineError> {
        let status = StatusChannel::new();
        let lease = LeaseManager::acquire(meta.clone(), cfg.lease.clone())?;
        status.set_lease_held(true);

        let cache = Arc::new(StreamCache::new());
        recovery::bootstrap(&meta, &cache, &lease, &cfg.warmup)?;

        let serve_reads_degraded = cfg.degraded.serve_reads;
        let ingest = IngestEngine::new(
            meta.clone(),
            blobs.clone(),
            lease.clone(),
            status.clone(),
            cfg.clone(),
        );
        let query = QueryEngine::new(
            meta.clone(),
            blobs.clone(),
            cache,
            cfg.planner.clone(),
        );

        let service = Arc::new(Self {
            ingest,
            ingest_lock: Mutex::new(()),
            query,
            status: status.clone(),
            lease: lease.clone(),
            shutdown: ShutdownSignal::new(),
            workers: Mutex::new(Vec::new()),
            serve_reads_degraded,
        });
        service.spawn_workers(meta, blobs, cfg);
        Ok(service)
    }

    fn spawn_workers(
        self: &Arc<Self>,
        meta: Arc<dyn MetaStore>,
        blobs: Arc<dyn BlobStore>,
        cfg: EngineConfig,
    ) {
        let mut workers = self.workers.lock();

        // Lease renewal.
        {
            let lease = self.lease.clone();
            let status = self.status.clone();
            let guard = self.shutdown.guard();
            workers.push(thread::spawn(move || {
                lease.renew_loop(guard);
                status.set_lease_held(lease.is_held());
            }));
        }

        // Orphan reclamation.
        {
            let gc = GcWorker::new(
                meta,
                blobs,
                self.lease.clone(),
                self.status.clone(),
                cfg.gc.clone(),
                cfg.guardrail.clone(),
            );
            let guard = self.shutdown.guard();
            workers.push(thread::spawn(move || gc.run_loop(guard)));
        }

        // Tail flush and maintenance seals.
        {
            let service = Arc::clone(self);
            let guard = self.shutdown.guard();
            let flush_interval = Duration::from_millis(cfg.tail.flush_interval_ms);
            workers.push(thread::spawn(move || {
                service.flush_loop(guard, flush_interval)
            }));
        }
    }

    fn flush_loop(&self, shutdown: ShutdownGuard, interval: Duration) {
        loop {
            if !shutdown.sleep_interruptible(interval) {
                break;
            }
            if !self.lease.is_held() || self.status.is_degraded() {
                continue;
            }
            let _guard = self.ingest_lock.lock();
            let fence = self.lease.epoch();
            let now = now_ms();

            // Maintenance seals first, so their tail truncations land in
            // the same checkpoint sweep.
            let due = self
                .ingest
                .tails()
                .maintenance_due(self.ingest.chunks().config(), now);
            for stream in due {
                match self
                    .ingest
                    .chunks()
                    .seal_stream(self.ingest.tails(), &stream, fence, now)
                {
                    Ok(Some(_)) => self.status.record_seals(1),
                    Ok(None) => {}
                    Err(e) => {
                        self.fail_closed_on(&EngineError::Index(e), "maintenance seal");
                        return;
                    }
                }
            }

            match self.ingest.tails().checkpoint_dirty(fence) {
                Ok(count) if count > 0 => {
                    trace!(count, "flushed dirty tails");
                    self.status.record_tail_checkpoints(count as u64);
                }
                Ok(_) => {}
                Err(e) => {
                    self.fail_closed_on(&EngineError::Index(e), "tail flush");
                    return;
                }
            }
            self.ingest.tails().trim_clean();
        }
    }

    fn fail_closed_on(&self, err: &EngineError, what: &str) {
        if err.is_fatal() {
            error!(err = %err, %what, "fatal failure, failing closed");
            self.status.degrade(what);
        } else {
            warn!(err = %err, %what, "background worker error");
        }
    }

    /// Offers one finalized block to the writer. Transient backend failures
    /// retry in place; everything fatal fails the service closed.
    pub fn ingest_finalized_block(&self, block: &FinalizedBlock) -> IngestOutcome {
        let _guard = self.ingest_lock.lock();
        let backoff = ExponentialBackoff::default();
        let mut delay_ms = backoff.base_delay_ms();
        let mut attempts = 0u16;

        loop {
            match self.ingest.ingest_block(block) {
                Ok(IngestOutcome::FinalityViolation) => {
                    self.status
                        .degrade("conflicting block at finalized height");
                    return IngestOutcome::FinalityViolation;
                }
                Ok(outcome) => return outcome,
                Err(e) if e.is_transient() && attempts < INGEST_TRANSIENT_RETRIES => {
                    attempts += 1;
                    warn!(err = %e, attempts, "transient ingest failure, retrying block");
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = backoff.next_delay_ms(delay_ms);
                }
                Err(e) if e.is_transient() => {
                    warn!(err = %e, "transient ingest failures exhausted retries");
                    return IngestOutcome::Rejected(RejectKind::Backend);
                }
                Err(EngineError::LeaseLost) | Err(EngineError::LeaseUnavailable) => {
                    self.status.set_lease_held(false);
                    return IngestOutcome::Rejected(RejectKind::LeaseLost);
                }
                Err(e) if e.is_fatal() => {
                    self.fail_closed_on(&e, "ingest pipeline");
                    return IngestOutcome::Rejected(RejectKind::Degraded);
                }
                Err(e) => {
                    warn!(err = %e, "ingest failed without degrading");
                    return IngestOutcome::Rejected(RejectKind::Backend);
                }
            }
        }
    }

    /// Serves a filter query over the finalized snapshot.
    pub fn query_finalized(&self, filter: &LogFilter) -> Result<Vec<IndexedLog>, QueryError> {
        if self.status.is_degraded() && !self.serve_reads_degraded {
            return Err(QueryError::Degraded);
        }
        self.status.record_query();
        match self.query.query(filter) {
            Err(e) if e.is_corruption() => {
                // Reads found state that contradicts a manifest: the writer
                // must stop making things worse.
                self.status.degrade("corruption observed by reader");
                Err(e)
            }
            other => other,
        }
    }

    /// Highest finalized block visible to queries, if any.
    pub fn indexed_finalized_head(&self) -> Option<u64> {
        match self.query.indexed_head() {
            Ok(head) => head,
            Err(e) => {
                warn!(err = %e, "failed to read indexed head");
                None
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        let mut report = self.status.report();
        report.lease_held = self.lease.is_held();
        report
    }

    /// Stops background workers and releases the writer role.
    pub fn close(&self) {
        self.shutdown.trigger();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        info!("log index service closed");
    }
}
