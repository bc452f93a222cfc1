//! Block-driven scan: the fallback for topic0-only queries and guardrailed
//! OR overflows.
//!
//! The candidate block set comes from the topic0 block bitmaps when the
//! filter constrains topic0, otherwise it is the whole queried range. Each
//! candidate block's logs are walked off `block_meta` and exact-filtered.

use std::time::Instant;

use chert_codec::{canonical, keys};
use chert_db::traits::{BlobStore, MetaStore};
use chert_index::cache::StreamCache;
use chert_primitives::{filter::LogFilter, log::IndexedLog};
use tracing::*;

use crate::{exec::Executor, plan::QueryPlan, QueryError};

pub struct BlockScanner<'a> {
    meta: &'a dyn MetaStore,
    executor: Executor<'a>,
}

impl<'a> BlockScanner<'a> {
    pub fn new(meta: &'a dyn MetaStore, blobs: &'a dyn BlobStore, cache: &'a StreamCache) -> Self {
        Self {
            meta,
            executor: Executor::new(meta, blobs, cache),
        }
    }

    fn check_deadline(deadline: Option<Instant>) -> Result<(), QueryError> {
        match deadline {
            Some(d) if Instant::now() >= d => Err(QueryError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    pub fn run(&self, plan: &QueryPlan, filter: &LogFilter) -> Result<Vec<IndexedLog>, QueryError> {
        let window = &plan.window;

        // Candidate blocks, ascending.
        let blocks: Vec<u64> = match &plan.block_clause {
            Some(clause) => {
                let membership = self.executor.block_membership(clause, window)?;
                membership
                    .iter_blocks()
                    .filter(|b| (window.first_block..=window.last_block).contains(b))
                    .collect()
            }
            None => (window.first_block..=window.last_block).collect(),
        };
        debug!(candidate_blocks = blocks.len(), "running block scan");

        let mut results = Vec::new();
        for block_num in blocks {
            Self::check_deadline(filter.deadline)?;
            let vv = self
                .meta
                .get(&keys::block_meta_key(block_num))?
                .ok_or_else(|| {
                    QueryError::Corrupt(format!("block_meta {block_num} missing below head"))
                })?;
            let meta = canonical::decode_block_meta(vv.value())?;

            for global_id in meta.first_log_id()..meta.end_log_id() {
                Self::check_deadline(filter.deadline)?;
                let Some(vv) = self.meta.get(&keys::log_key(global_id))? else {
                    return Err(QueryError::Corrupt(format!(
                        "log {global_id} missing below next_log_id"
                    )));
                };
                let record = canonical::decode_log_record(vv.value())?;
                if !filter.matches(&record) {
                    continue;
                }
                results.push(IndexedLog::new(global_id, record));
                if results.len() >= plan.max_results {
                    return Ok(results);
                }
            }
        }
        Ok(results)
    }
}
