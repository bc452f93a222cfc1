//! Query planning: range resolution, clause construction, selectivity
//! estimates, and guardrails.

use chert_codec::{canonical, keys, meta::MetaState};
use chert_config::{OrOverflowAction, PlannerConfig};
use chert_db::traits::MetaStore;
use chert_index::cache::StreamCache;
use chert_primitives::{
    block::BlockMeta,
    buf::Buf32,
    filter::{BlockTag, LogFilter},
    id::{local_of, shard_of, IndexKind, StreamId, StreamValue},
};
use tracing::*;

use crate::QueryError;

/// The resolved block and log-id window of a query.
#[derive(Copy, Clone, Debug)]
pub struct RangeWindow {
    pub first_block: u64,
    pub last_block: u64,
    /// Inclusive global log id bounds.
    pub first_log_id: u64,
    pub last_log_id: u64,
}

impl RangeWindow {
    /// Log-level shards the window spans.
    pub fn log_shards(&self) -> std::ops::RangeInclusive<u32> {
        shard_of(self.first_log_id)..=shard_of(self.last_log_id)
    }

    /// Local bounds of the window within one log shard.
    pub fn local_bounds(&self, shard: u32) -> (u32, u32) {
        let lo = if shard == shard_of(self.first_log_id) {
            local_of(self.first_log_id)
        } else {
            0
        };
        let hi = if shard == shard_of(self.last_log_id) {
            local_of(self.last_log_id)
        } else {
            u32::MAX
        };
        (lo, hi)
    }

    /// Block-level shards the window spans.
    pub fn block_shards(&self) -> std::ops::RangeInclusive<u32> {
        shard_of(self.first_block)..=shard_of(self.last_block)
    }

    /// Local bounds of the window within one block shard.
    pub fn block_local_bounds(&self, shard: u32) -> (u32, u32) {
        let lo = if shard == shard_of(self.first_block) {
            local_of(self.first_block)
        } else {
            0
        };
        let hi = if shard == shard_of(self.last_block) {
            local_of(self.last_block)
        } else {
            u32::MAX
        };
        (lo, hi)
    }
}

/// One log-level clause: the candidate must appear in one of the value
/// streams of this kind.
#[derive(Clone, Debug)]
pub struct LogClause {
    pub kind: IndexKind,
    pub values: Vec<StreamValue>,
    pub estimate: u64,
}

impl LogClause {
    pub fn stream(&self, value: &StreamValue, shard: u32) -> StreamId {
        StreamId::new(self.kind, *value, shard)
    }
}

/// A topic0 constraint applied late at block granularity.
#[derive(Clone, Debug)]
pub struct BlockClause {
    pub sigs: Vec<Buf32>,
}

/// How the executor will run the query.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// Intersect log-level stream bitmaps, then late-filter and point-read.
    Bitmap,
    /// Walk candidate blocks and exact-filter their logs.
    BlockScan,
}

/// A fully planned query, ready to execute against the snapshot it was
/// planned under.
pub struct QueryPlan {
    pub snapshot: MetaState,
    pub window: RangeWindow,
    pub strategy: Strategy,
    /// Log-level clauses in ascending estimate order.
    pub log_clauses: Vec<LogClause>,
    pub block_clause: Option<BlockClause>,
    pub max_results: usize,
}

pub struct Planner<'a> {
    meta: &'a dyn MetaStore,
    cache: &'a StreamCache,
    cfg: &'a PlannerConfig,
}

impl<'a> Planner<'a> {
    pub fn new(meta: &'a dyn MetaStore, cache: &'a StreamCache, cfg: &'a PlannerConfig) -> Self {
        Self { meta, cache, cfg }
    }

    /// Reads the current `meta/state` snapshot every query executes under.
    pub fn snapshot(&self) -> Result<Option<MetaState>, QueryError> {
        match self.meta.get(keys::META_STATE_KEY)? {
            Some(vv) => Ok(Some(MetaState::decode(vv.value())?)),
            None => Ok(None),
        }
    }

    pub fn read_block_meta(&self, block_num: u64) -> Result<BlockMeta, QueryError> {
        let vv = self
            .meta
            .get(&keys::block_meta_key(block_num))?
            .ok_or_else(|| {
                QueryError::Corrupt(format!("block_meta {block_num} missing below head"))
            })?;
        Ok(canonical::decode_block_meta(vv.value())?)
    }

    /// Plans a filter. `Ok(None)` means the result is trivially empty.
    pub fn plan(
        &self,
        filter: &LogFilter,
        snapshot: MetaState,
    ) -> Result<Option<QueryPlan>, QueryError> {
        let head = snapshot.indexed_head();

        // blockHash is exclusive with the range bounds.
        let (first_block, last_block) = if let Some(hash) = &filter.block_hash {
            if filter.from_block.is_some() || filter.to_block.is_some() {
                return Err(QueryError::InvalidParams(
                    "blockHash cannot be combined with fromBlock/toBlock",
                ));
            }
            let num = self.resolve_block_hash(hash, head)?;
            (num, num)
        } else {
            let Some(head) = head else {
                return Ok(None);
            };
            let from = filter.from_block.unwrap_or(BlockTag::Latest).resolve(head);
            let to = filter
                .to_block
                .unwrap_or(BlockTag::Latest)
                .resolve(head)
                .min(head);
            if from > to {
                return Ok(None);
            }
            (from, to)
        };

        // Map the block range onto the inclusive global log id window.
        let first_meta = self.read_block_meta(first_block)?;
        let last_meta = self.read_block_meta(last_block)?;
        let first_log_id = first_meta.first_log_id();
        let end_log_id = last_meta.end_log_id();
        if end_log_id <= first_log_id {
            // No logs anywhere in the range.
            return Ok(None);
        }
        let window = RangeWindow {
            first_block,
            last_block,
            first_log_id,
            last_log_id: end_log_id - 1,
        };

        let mut strategy = Strategy::Bitmap;
        let mut log_clauses = Vec::new();
        let mut block_clause = None;

        let mut guardrail = |len: usize| -> Result<(), QueryError> {
            if len > self.cfg.max_or_terms {
                match self.cfg.or_overflow_action {
                    OrOverflowAction::Error => {
                        return Err(QueryError::TooBroad(len, self.cfg.max_or_terms))
                    }
                    OrOverflowAction::BlockScan => strategy = Strategy::BlockScan,
                }
            }
            Ok(())
        };

        if !filter.address.is_empty() {
            guardrail(filter.address.len())?;
            log_clauses.push(LogClause {
                kind: IndexKind::Address,
                values: filter
                    .address
                    .iter()
                    .map(|a| StreamValue::Address(*a))
                    .collect(),
                estimate: 0,
            });
        }

        for pos in 1..4 {
            let Some(values) = &filter.topics[pos] else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            guardrail(values.len())?;
            log_clauses.push(LogClause {
                kind: IndexKind::for_topic_pos(pos).expect("plan: topic kind"),
                values: values.iter().map(|w| StreamValue::Word(*w)).collect(),
                estimate: 0,
            });
        }

        if let Some(sigs) = &filter.topics[0] {
            if !sigs.is_empty() {
                guardrail(sigs.len())?;
                // topic0 runs log-level only when every OR value has log
                // coverage for the whole window; the block-level index is
                // always a correct fallback.
                let mut covered = true;
                for sig in sigs {
                    let mode = self.cache.topic0_mode(self.meta, sig)?;
                    if !mode.is_some_and(|m| m.covers_range(first_block, last_block)) {
                        covered = false;
                        break;
                    }
                }
                if covered {
                    log_clauses.push(LogClause {
                        kind: IndexKind::Topic0Log,
                        values: sigs.iter().map(|w| StreamValue::Word(*w)).collect(),
                        estimate: 0,
                    });
                } else {
                    block_clause = Some(BlockClause { sigs: sigs.clone() });
                }
            }
        }

        // A query with no log-level clause has no bitmap to drive the
        // executor; it walks blocks instead.
        if log_clauses.is_empty() {
            strategy = Strategy::BlockScan;
        }

        // A scan is driven by the topic0 block bitmaps whenever the filter
        // constrains topic0, even if the clause also planned log-level.
        if strategy == Strategy::BlockScan && block_clause.is_none() {
            if let Some(sigs) = &filter.topics[0] {
                if !sigs.is_empty() {
                    block_clause = Some(BlockClause { sigs: sigs.clone() });
                }
            }
        }

        if strategy == Strategy::Bitmap {
            for clause in &mut log_clauses {
                clause.estimate = self.estimate_clause(clause, &window)?;
            }
            log_clauses.sort_by_key(|c| c.estimate);
            trace!(
                clauses = log_clauses.len(),
                best = log_clauses.first().map(|c| c.estimate),
                "planned bitmap query"
            );
        }

        Ok(Some(QueryPlan {
            snapshot,
            window,
            strategy,
            log_clauses,
            block_clause,
            max_results: filter.max_results.unwrap_or(usize::MAX),
        }))
    }

    fn resolve_block_hash(
        &self,
        hash: &Buf32,
        head: Option<u64>,
    ) -> Result<u64, QueryError> {
        let Some(head) = head else {
            return Err(QueryError::BlockNotFound);
        };
        let Some(vv) = self.meta.get(&keys::block_hash_key(hash))? else {
            return Err(QueryError::BlockNotFound);
        };
        let num = canonical::decode_block_num(vv.value())?;
        if num > head {
            return Err(QueryError::BlockNotFound);
        }
        let meta = self.read_block_meta(num)?;
        if meta.block_hash() != hash {
            return Err(QueryError::BlockNotFound);
        }
        Ok(num)
    }

    /// Sums the overlap-aware estimate of a clause across its OR values and
    /// shards, from manifest metadata and tail counts only.
    fn estimate_clause(
        &self,
        clause: &LogClause,
        window: &RangeWindow,
    ) -> Result<u64, QueryError> {
        let mut total = 0u64;
        for value in &clause.values {
            for shard in window.log_shards() {
                let stream = clause.stream(value, shard);
                let view = self.cache.stream_view(self.meta, &stream)?;
                if view.is_empty() {
                    continue;
                }
                let (lo, hi) = window.local_bounds(shard);
                total += self
                    .cache
                    .estimate_in_range(self.meta, &stream, &view, lo, hi)?;
            }
        }
        Ok(total)
    }
}
