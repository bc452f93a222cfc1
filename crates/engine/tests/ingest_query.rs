//! End-to-end ingest and query behavior over the in-memory stores.

mod common;

use chert_engine::{IngestOutcome, RejectKind};
use chert_primitives::{
    buf::Buf32,
    filter::LogFilter,
    log::IndexedLog,
};
use chert_test_utils::chain::{addr, block_hash, entry, entry_at, word, ChainBuilder};

use common::{test_config, Harness};

fn assert_sorted(results: &[IndexedLog]) {
    let keys: Vec<_> = results
        .iter()
        .map(|l| (l.record().block_num(), l.record().tx_idx(), l.record().log_idx()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted, "results must be in (block, tx, log) order");
}

#[test]
fn single_block_single_log() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    let t0 = word(0);
    let t1 = word(1);
    let block = chain.next_block(vec![entry(addr(1), vec![t0, t1])]);

    assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);
    assert_eq!(h.service.indexed_finalized_head(), Some(0));

    let filter = LogFilter::range(0u64, 0u64)
        .with_addresses(vec![addr(1)])
        .with_topic(1, vec![t1]);
    let results = h.service.query_finalized(&filter).unwrap();
    assert_eq!(results.len(), 1);
    let log = results[0].record();
    assert_eq!(log.address(), &addr(1));
    assert_eq!(log.topics(), &[t0, t1]);
    assert_eq!(log.block_num(), 0);
    assert_eq!(log.block_hash(), &block_hash(0));

    // A non-matching topic value at the same position returns nothing.
    let filter = LogFilter::range(0u64, 0u64)
        .with_addresses(vec![addr(1)])
        .with_topic(1, vec![word(9)]);
    assert!(h.service.query_finalized(&filter).unwrap().is_empty());
}

#[test]
fn or_list_across_addresses_in_order() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    // Ten blocks, three logs each at addresses A, B, C. The small chunk
    // target forces several seal cycles along the way.
    for _ in 0..10 {
        let block = chain.next_block(vec![
            entry_at(addr(0xa), vec![word(0)], 0),
            entry_at(addr(0xb), vec![word(0)], 1),
            entry_at(addr(0xc), vec![word(0)], 2),
        ]);
        assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);
    }
    assert_eq!(h.service.indexed_finalized_head(), Some(9));

    let filter = LogFilter::range(0u64, 9u64).with_addresses(vec![addr(0xa), addr(0xb)]);
    let results = h.service.query_finalized(&filter).unwrap();
    assert_eq!(results.len(), 20);
    assert_sorted(&results);
    assert!(results
        .iter()
        .all(|l| [addr(0xa), addr(0xb)].contains(l.record().address())));

    // Sealing happened: some chunks exist in the blob store.
    assert!(h.blobs.blob_count() > 0);
}

#[test]
fn max_results_returns_smallest_keys() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    for _ in 0..5 {
        let block = chain.next_block(vec![
            entry_at(addr(1), vec![], 0),
            entry_at(addr(1), vec![], 1),
        ]);
        h.service.ingest_finalized_block(&block);
    }

    let all = h
        .service
        .query_finalized(&LogFilter::range(0u64, 4u64).with_addresses(vec![addr(1)]))
        .unwrap();
    assert_eq!(all.len(), 10);

    let limited = h
        .service
        .query_finalized(
            &LogFilter::range(0u64, 4u64)
                .with_addresses(vec![addr(1)])
                .with_max_results(3),
        )
        .unwrap();
    assert_eq!(limited.len(), 3);
    assert_eq!(
        limited.iter().map(|l| l.global_id()).collect::<Vec<_>>(),
        all.iter().take(3).map(|l| l.global_id()).collect::<Vec<_>>()
    );
}

#[test]
fn wildcard_query_scans_blocks() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    for i in 0..4u8 {
        let block = chain.next_block(vec![entry(addr(i), vec![word(i)])]);
        h.service.ingest_finalized_block(&block);
    }
    let results = h.service.query_finalized(&LogFilter::range(0u64, 3u64)).unwrap();
    assert_eq!(results.len(), 4);
    assert_sorted(&results);
}

#[test]
fn replay_and_ordering_rejections() {
    let h = Harness::open(test_config());
    let mut chain = ChainBuilder::new();
    let blocks: Vec<_> = (0..6).map(|_| chain.next_block(vec![entry(addr(1), vec![])])).collect();
    for block in &blocks {
        assert_eq!(h.service.ingest_finalized_block(block), IngestOutcome::Applied);
    }

    // Exact replay of an old block is a no-op.
    assert_eq!(
        h.service.ingest_finalized_block(&blocks[2]),
        IngestOutcome::AlreadyIngested
    );
    assert_eq!(h.service.indexed_finalized_head(), Some(5));

    // Skipping ahead is rejected.
    let mut ahead = ChainBuilder::new();
    let _ = ahead.empty_blocks(9);
    let block9 = ahead.next_block(vec![]);
    assert_eq!(
        h.service.ingest_finalized_block(&block9),
        IngestOutcome::Rejected(RejectKind::OutOfOrder {
            expected: 6,
            got: 9
        })
    );

    // Correct height but broken parent linkage is rejected.
    let bad_parent = chert_primitives::block::FinalizedBlock::new(
        6,
        block_hash(6),
        Buf32::new([0xee; 32]),
        vec![],
    );
    assert_eq!(
        h.service.ingest_finalized_block(&bad_parent),
        IngestOutcome::Rejected(RejectKind::ParentMismatch)
    );

    // The chain continues fine afterwards.
    let block6 = chain.next_block(vec![]);
    assert_eq!(h.service.ingest_finalized_block(&block6), IngestOutcome::Applied);
}

#[test]
fn channel_worker_drains_blocks_in_order() {
    let h = Harness::open(test_config());
    let (block_tx, block_rx) = tokio::sync::mpsc::channel(16);
    let shutdown = chert_common::shutdown::ShutdownSignal::new();

    let service = h.service.clone();
    let guard = shutdown.guard();
    let worker = std::thread::spawn(move || {
        chert_engine::worker::ingest_worker_task(service, block_rx, guard)
    });

    let mut chain = ChainBuilder::new();
    for _ in 0..3 {
        let block = chain.next_block(vec![entry(addr(1), vec![word(1)])]);
        block_tx.blocking_send(block).unwrap();
    }
    drop(block_tx);
    worker.join().unwrap().unwrap();

    assert_eq!(h.service.indexed_finalized_head(), Some(2));
    let results = h
        .service
        .query_finalized(&LogFilter::range(0u64, 2u64).with_addresses(vec![addr(1)]))
        .unwrap();
    assert_eq!(results.len(), 3);
}

#[test]
fn second_writer_refused_while_lease_live() {
    let h = Harness::open(test_config());
    let second =
        chert_engine::LogIndexService::open(h.meta.clone(), h.blobs.clone(), test_config());
    assert!(second.is_err());
}

#[test]
fn restart_resumes_from_persisted_state() {
    // A short ttl lets the reopened instance take the lease over.
    let mut cfg = test_config();
    cfg.lease.ttl_ms = 1;

    let h = Harness::open(cfg.clone());
    let mut chain = ChainBuilder::new();
    for _ in 0..4 {
        let block = chain.next_block(vec![entry(addr(7), vec![word(3)])]);
        assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);
    }
    h.service.close();
    drop(h.service);
    std::thread::sleep(std::time::Duration::from_millis(5));

    let service = common::open_over(h.meta.clone(), h.blobs.clone(), cfg);
    assert_eq!(service.indexed_finalized_head(), Some(3));

    // The writer picks up exactly where the last instance stopped.
    let block4 = chain.next_block(vec![entry(addr(7), vec![word(3)])]);
    assert_eq!(service.ingest_finalized_block(&block4), IngestOutcome::Applied);
    let results = service
        .query_finalized(&LogFilter::range(0u64, 4u64).with_addresses(vec![addr(7)]))
        .unwrap();
    assert_eq!(results.len(), 5);
    assert_sorted(&results);
}
