//! Finality violations fail the service closed.

mod common;

use chert_engine::{IngestOutcome, RejectKind, ServiceMode};
use chert_primitives::{block::FinalizedBlock, buf::Buf32, filter::LogFilter};
use chert_query::QueryError;
use chert_test_utils::chain::{addr, block_hash, entry, ChainBuilder};

use common::{test_config, Harness};

fn ingest_chain(h: &Harness, chain: &mut ChainBuilder, count: u64) {
    for _ in 0..count {
        let block = chain.next_block(vec![entry(addr(1), vec![])]);
        assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);
    }
}

#[test]
fn conflicting_block_at_finalized_height_degrades() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    ingest_chain(&h, &mut chain, 11);

    // A different hash at height 10.
    let conflicting = FinalizedBlock::new(
        10,
        Buf32::new([0x66; 32]),
        block_hash(9),
        vec![],
    );
    assert_eq!(
        h.service.ingest_finalized_block(&conflicting),
        IngestOutcome::FinalityViolation
    );
    assert_eq!(h.service.health().mode, ServiceMode::Degraded);

    // All subsequent ingests are refused, even valid ones.
    let block11 = chain.next_block(vec![]);
    assert_eq!(
        h.service.ingest_finalized_block(&block11),
        IngestOutcome::Rejected(RejectKind::Degraded)
    );

    // Reads keep serving the last consistent snapshot by default.
    let results = h
        .service
        .query_finalized(&LogFilter::range(0u64, 10u64).with_addresses(vec![addr(1)]))
        .unwrap();
    assert_eq!(results.len(), 11);
    assert_eq!(h.service.indexed_finalized_head(), Some(10));
}

#[test]
fn degraded_reads_refused_when_configured() {
    let mut cfg = test_config();
    cfg.degraded.serve_reads = false;
    let h = Harness::open(cfg);
    let mut chain = ChainBuilder::new();
    ingest_chain(&h, &mut chain, 3);

    let conflicting = FinalizedBlock::new(2, Buf32::new([0x66; 32]), block_hash(1), vec![]);
    assert_eq!(
        h.service.ingest_finalized_block(&conflicting),
        IngestOutcome::FinalityViolation
    );
    assert!(matches!(
        h.service.query_finalized(&LogFilter::range(0u64, 2u64)),
        Err(QueryError::Degraded)
    ));
}

#[test]
fn replay_with_matching_hash_stays_healthy() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    ingest_chain(&h, &mut chain, 5);

    let mut replay_chain = ChainBuilder::new();
    let replayed = replay_chain.next_block(vec![entry(addr(1), vec![])]);
    assert_eq!(
        h.service.ingest_finalized_block(&replayed),
        IngestOutcome::AlreadyIngested
    );
    assert_eq!(h.service.health().mode, ServiceMode::Normal);
}
