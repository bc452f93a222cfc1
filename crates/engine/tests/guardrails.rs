//! Planner OR-list guardrails and GC backlog guardrails.

mod common;

use std::sync::Arc;

use chert_codec::keys;
use chert_config::{GuardrailAction, OrOverflowAction};
use chert_db::traits::{BlobStore, MetaStore};
use chert_engine::{
    gc::GcWorker,
    lease::LeaseManager,
    status::StatusChannel,
    ServiceMode,
};
use chert_primitives::{buf::Buf20, filter::LogFilter, id::StreamId};
use chert_query::QueryError;
use chert_test_utils::chain::{addr, entry_at, ChainBuilder};

use common::{test_config, Harness};

fn populated(cfg: chert_config::EngineConfig) -> Harness {
    let h = Harness::open(cfg);
    let mut chain = ChainBuilder::new();
    for _ in 0..6 {
        let block = chain.next_block(vec![
            entry_at(addr(1), vec![], 0),
            entry_at(addr(2), vec![], 1),
            entry_at(addr(3), vec![], 2),
        ]);
        h.service.ingest_finalized_block(&block);
    }
    h
}

fn nine_addresses() -> Vec<Buf20> {
    (1..=9).map(addr).collect()
}

#[test]
fn or_overflow_errors_by_default() {
    let mut cfg = test_config();
    cfg.planner.max_or_terms = 8;
    let h = populated(cfg);

    let filter = LogFilter::range(0u64, 5u64).with_addresses(nine_addresses());
    match h.service.query_finalized(&filter) {
        Err(QueryError::TooBroad(terms, limit)) => {
            assert_eq!(terms, 9);
            assert_eq!(limit, 8);
        }
        other => panic!("expected TooBroad, got {other:?}"),
    }

    // At the limit the query is fine.
    let filter = LogFilter::range(0u64, 5u64).with_addresses((1..=8).map(addr).collect());
    assert_eq!(h.service.query_finalized(&filter).unwrap().len(), 18);
}

#[test]
fn or_overflow_block_scan_returns_exact_results() {
    let mut cfg = test_config();
    cfg.planner.max_or_terms = 8;
    cfg.planner.or_overflow_action = OrOverflowAction::BlockScan;
    let h = populated(cfg);

    let filter = LogFilter::range(0u64, 5u64).with_addresses(nine_addresses());
    let results = h.service.query_finalized(&filter).unwrap();
    // Addresses 1..=3 exist, three logs per block over six blocks.
    assert_eq!(results.len(), 18);
    assert!(results
        .iter()
        .all(|l| (1..=9).map(addr).any(|a| &a == l.record().address())));
}

#[test]
fn gc_reclaims_orphans_and_leaves_live_state() {
    let h = populated(test_config());
    let live_chunks = h.blobs.blob_count();
    assert!(live_chunks > 0, "test needs sealed chunks");

    // Plant garbage: a chunk far past any manifest's range and a segment
    // page no directory references.
    let stream = StreamId::address(addr(1), 0);
    h.blobs.put(&keys::chunk_key(&stream, 77), b"junk").unwrap();
    let fence = h.meta.observed_epoch();
    h.meta
        .put_if_absent(&keys::segment_key(&stream, 9), vec![1, 2, 3], fence)
        .unwrap();

    // Run a standalone GC pass over the same stores, taking the writer
    // role as if the service's lease had expired long ago.
    h.service.close();
    let meta: Arc<dyn MetaStore> = h.meta.clone();
    let blobs: Arc<dyn BlobStore> = h.blobs.clone();
    let far_future = chert_common::time::now_ms() + 2 * test_config().lease.ttl_ms;
    let lease =
        LeaseManager::acquire_at(meta.clone(), test_config().lease, 7, far_future).unwrap();
    let status = StatusChannel::new();
    let gc = GcWorker::new(
        meta,
        blobs,
        lease,
        status.clone(),
        test_config().gc,
        test_config().guardrail,
    );

    let stats = gc.run_once().unwrap();
    assert_eq!(stats.orphan_chunks_deleted, 1);
    assert_eq!(stats.orphan_segments_deleted, 1);
    assert_eq!(h.blobs.blob_count(), live_chunks);
    assert_eq!(status.mode(), ServiceMode::Normal);

    // A second pass finds nothing.
    let stats = gc.run_once().unwrap();
    assert_eq!(stats.orphan_chunks_deleted, 0);
    assert_eq!(stats.orphan_segments_deleted, 0);
}

#[test]
fn backlog_over_caps_throttles_or_fails_closed() {
    for (action, expected_mode) in [
        (GuardrailAction::Throttle, ServiceMode::Throttled),
        (GuardrailAction::FailClosed, ServiceMode::Degraded),
    ] {
        let meta = Arc::new(chert_db::mem::MemMetaStore::new());
        let blobs = Arc::new(chert_db::mem::MemBlobStore::new());

        // A blob sitting in the in-flight slot (seq 0, no manifest) cannot
        // be reclaimed and counts as backlog.
        let stream = StreamId::address(addr(9), 0);
        blobs.put(&keys::chunk_key(&stream, 0), b"pending").unwrap();

        let meta_dyn: Arc<dyn MetaStore> = meta.clone();
        let blobs_dyn: Arc<dyn BlobStore> = blobs.clone();
        let lease =
            LeaseManager::acquire_at(meta_dyn.clone(), test_config().lease, 7, 0).unwrap();
        let status = StatusChannel::new();
        let mut gc_cfg = test_config().gc;
        gc_cfg.max_orphan_chunk_bytes = 0;
        let mut guardrail = test_config().guardrail;
        guardrail.action = action;
        let gc = GcWorker::new(meta_dyn, blobs_dyn, lease, status.clone(), gc_cfg, guardrail);

        let stats = gc.run_once().unwrap();
        assert!(stats.backlog.orphan_chunk_bytes > 0);
        assert_eq!(status.mode(), expected_mode);
    }
}
