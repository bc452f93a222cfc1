//! Topic0 hybrid policy end to end: a rare signature gains log-level
//! indexing, a hot one loses it, and queries stay exact through both
//! transitions.

mod common;

use chert_codec::keys;
use chert_db::traits::MetaStore;
use chert_engine::IngestOutcome;
use chert_index::topic0::Topic0Mode;
use chert_primitives::filter::LogFilter;
use chert_test_utils::chain::{addr, entry, word, ChainBuilder};

use common::{test_config, Harness};

const WINDOW: u32 = 2000;

fn mode_of(h: &Harness, sig: &chert_primitives::buf::Buf32) -> Option<Topic0Mode> {
    h.meta
        .get(&keys::topic0_mode_key(sig))
        .unwrap()
        .map(|vv| Topic0Mode::decode(vv.value()).unwrap())
}

#[test]
fn rare_sig_enables_then_hot_sig_disables() {
    let mut cfg = test_config();
    cfg.topic0.window_len = WINDOW;
    let h = Harness::open(cfg);
    let mut chain = ChainBuilder::new();
    let rare = word(0x0f);

    // First appearance at block 0; the window has no history yet, so no
    // transition fires.
    let block = chain.next_block(vec![entry(addr(1), vec![rare, word(1)])]);
    assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);
    assert!(mode_of(&h, &rare).is_none());

    // A full window of absence, then one appearance: rate 1/2000 = 0.05%,
    // strictly under the 0.1% enable bound.
    for block in chain.empty_blocks(5000) {
        assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);
    }
    let enable_block = chain.next_num();
    let block = chain.next_block(vec![entry(addr(1), vec![rare, word(2)])]);
    assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);

    let mode = mode_of(&h, &rare).expect("mode persisted after transition");
    assert!(mode.log_enabled());
    assert_eq!(mode.enabled_from_block(), enable_block + 1);

    // While enabled, appearances land in the log-level stream too; queries
    // over the covered range stay exact either way.
    let mut appeared_at = Vec::new();
    for _ in 0..40 {
        let num = chain.next_num();
        let block = chain.next_block(vec![entry(addr(2), vec![rare])]);
        assert_eq!(h.service.ingest_finalized_block(&block), IngestOutcome::Applied);
        appeared_at.push(num);
        if mode_of(&h, &rare).is_some_and(|m| !m.log_enabled()) {
            break;
        }
    }

    // The hot streak pushed the rate past 1%: disabled again.
    let final_mode = mode_of(&h, &rare).unwrap();
    assert!(!final_mode.log_enabled());
    assert_eq!(final_mode.enabled_from_block(), 0);

    // Exactness across the enable/disable boundary: every block where the
    // sig appeared is found, nothing else is.
    let head = h.service.indexed_finalized_head().unwrap();
    let results = h
        .service
        .query_finalized(&LogFilter::range(0u64, head).with_topic(0, vec![rare]))
        .unwrap();
    let mut expected_blocks = vec![0u64, enable_block];
    expected_blocks.extend(&appeared_at);
    let found: Vec<u64> = results.iter().map(|l| l.record().block_num()).collect();
    assert_eq!(found, expected_blocks);
}

#[test]
fn covered_range_uses_log_level_and_stays_exact() {
    let mut cfg = test_config();
    cfg.topic0.window_len = WINDOW;
    let h = Harness::open(cfg);
    let mut chain = ChainBuilder::new();
    let rare = word(0x1f);

    let block = chain.next_block(vec![entry(addr(1), vec![rare])]);
    h.service.ingest_finalized_block(&block);
    for block in chain.empty_blocks(5000) {
        h.service.ingest_finalized_block(&block);
    }
    let enabled_at = chain.next_num();
    let block = chain.next_block(vec![entry(addr(1), vec![rare])]);
    h.service.ingest_finalized_block(&block);

    // Two more appearances inside the enabled era.
    let mut era_blocks = vec![];
    for _ in 0..2 {
        for b in chain.empty_blocks(10) {
            h.service.ingest_finalized_block(&b);
        }
        era_blocks.push(chain.next_num());
        let block = chain.next_block(vec![entry(addr(1), vec![rare])]);
        h.service.ingest_finalized_block(&block);
    }

    // Range entirely above `enabled_from_block`: served by the log-level
    // stream. The pre-enable appearance must not leak in.
    let head = h.service.indexed_finalized_head().unwrap();
    let results = h
        .service
        .query_finalized(
            &LogFilter::range(enabled_at + 1, head).with_topic(0, vec![rare]),
        )
        .unwrap();
    let found: Vec<u64> = results.iter().map(|l| l.record().block_num()).collect();
    assert_eq!(found, era_blocks);

    // Range straddling the boundary still finds everything via the
    // block-level fallback.
    let results = h
        .service
        .query_finalized(&LogFilter::range(0u64, head).with_topic(0, vec![rare]))
        .unwrap();
    let mut all_blocks = vec![0, enabled_at];
    all_blocks.extend(&era_blocks);
    let found: Vec<u64> = results.iter().map(|l| l.record().block_num()).collect();
    assert_eq!(found, all_blocks);
}
