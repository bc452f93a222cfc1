//! Range resolution, wildcard semantics, and deadline edge cases.

mod common;

use std::time::Instant;

use chert_primitives::filter::{BlockTag, LogFilter};
use chert_query::QueryError;
use chert_test_utils::chain::{addr, entry, entry_at, word, ChainBuilder};

use common::{test_config, Harness};

fn populated() -> Harness {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    for i in 0..8u8 {
        let block = chain.next_block(vec![entry(addr(i % 2), vec![word(0), word(i % 3)])]);
        h.service.ingest_finalized_block(&block);
    }
    h
}

#[test]
fn query_before_any_ingest_is_empty() {
    let h = Harness::open(test_config());
    assert!(h
        .service
        .query_finalized(&LogFilter::range(0u64, 100u64))
        .unwrap()
        .is_empty());
    assert_eq!(h.service.indexed_finalized_head(), None);
}

#[test]
fn range_clips_to_head() {
    let h = populated();
    let results = h
        .service
        .query_finalized(&LogFilter::range(5u64, 5000u64))
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|l| l.record().block_num() >= 5));
}

#[test]
fn inverted_range_is_empty() {
    let h = populated();
    assert!(h
        .service
        .query_finalized(&LogFilter::range(6u64, 2u64))
        .unwrap()
        .is_empty());
}

#[test]
fn absent_bounds_mean_latest() {
    let h = populated();
    // No bounds at all: the single latest block.
    let results = h.service.query_finalized(&LogFilter::default()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record().block_num(), 7);

    // Explicit tags behave the same.
    let filter = LogFilter::range(BlockTag::Latest, BlockTag::Latest);
    assert_eq!(h.service.query_finalized(&filter).unwrap(), results);

    // Earliest-to-latest covers everything.
    let filter = LogFilter::range(BlockTag::Earliest, BlockTag::Latest);
    assert_eq!(h.service.query_finalized(&filter).unwrap().len(), 8);
}

#[test]
fn constrained_topic_position_requires_presence() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    // One log with a single topic, one with three.
    let block = chain.next_block(vec![
        entry_at(addr(1), vec![word(0)], 0),
        entry_at(addr(1), vec![word(0), word(5), word(6)], 1),
    ]);
    h.service.ingest_finalized_block(&block);

    let filter = LogFilter::range(0u64, 0u64).with_topic(2, vec![word(6)]);
    let results = h.service.query_finalized(&filter).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record().log_idx(), 1);
}

#[test]
fn multi_clause_intersection() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    for i in 0..6u8 {
        let block = chain.next_block(vec![entry(
            addr(i % 2),
            vec![word(0), word(i % 3)],
        )]);
        h.service.ingest_finalized_block(&block);
    }
    // address parity 0 ∧ topic1 residue 1: blocks {4} (block 1 has residue
    // 1 but parity 1, block 4 has parity 0 and residue 1).
    let filter = LogFilter::range(0u64, 5u64)
        .with_addresses(vec![addr(0)])
        .with_topic(1, vec![word(1)]);
    let results = h.service.query_finalized(&filter).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record().block_num(), 4);
}

#[test]
fn expired_deadline_cancels() {
    let h = populated();
    let mut filter = LogFilter::range(0u64, 7u64).with_addresses(vec![addr(0)]);
    filter.deadline = Some(Instant::now() - std::time::Duration::from_millis(1));
    assert!(matches!(
        h.service.query_finalized(&filter),
        Err(QueryError::DeadlineExceeded)
    ));
}

#[test]
fn empty_or_lists_are_wildcards() {
    let h = populated();
    let mut filter = LogFilter::range(0u64, 7u64);
    filter.topics[0] = Some(vec![]);
    let results = h.service.query_finalized(&filter).unwrap();
    assert_eq!(results.len(), 8);
}
