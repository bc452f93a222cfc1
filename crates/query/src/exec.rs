//! Bitmap execution: selectivity-ordered intersection, late block-level
//! filtering, and point reads with early stop.

use std::time::Instant;

use chert_codec::{canonical, keys};
use chert_db::traits::{BlobStore, MetaStore};
use chert_index::cache::StreamCache;
use chert_primitives::{
    filter::LogFilter,
    id::{make_global, shard_of, StreamId},
    log::IndexedLog,
};
use roaring::RoaringBitmap;
use tracing::*;

use crate::{
    plan::{BlockClause, LogClause, QueryPlan, RangeWindow},
    QueryError,
};

/// Maps candidate global log ids back to their block numbers via the block
/// metas of the queried range. Lookup is a binary search over the block
/// boundaries, so late filtering costs per surviving candidate, not per
/// block log.
pub struct BlockBoundaries {
    /// `(first_log_id, block_num)` ascending in both components.
    bounds: Vec<(u64, u64)>,
}

impl BlockBoundaries {
    pub fn new(bounds: Vec<(u64, u64)>) -> Self {
        debug_assert!(bounds.windows(2).all(|w| w[0].0 <= w[1].0));
        Self { bounds }
    }

    /// The block containing this log id.
    pub fn block_of(&self, global_id: u64) -> Option<u64> {
        let idx = self.bounds.partition_point(|(first, _)| *first <= global_id);
        idx.checked_sub(1).map(|i| self.bounds[i].1)
    }
}

/// The block membership set of a [`BlockClause`], one bitmap per block
/// shard.
pub struct BlockMembership {
    shards: Vec<(u32, RoaringBitmap)>,
}

impl BlockMembership {
    pub fn contains(&self, block_num: u64) -> bool {
        let shard = shard_of(block_num);
        self.shards
            .iter()
            .find(|(s, _)| *s == shard)
            .is_some_and(|(_, bitmap)| bitmap.contains(block_num as u32))
    }

    /// Ascending block numbers in the membership set, for scan driving.
    pub fn iter_blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.shards
            .iter()
            .flat_map(|(shard, bitmap)| bitmap.iter().map(|local| make_global(*shard, local)))
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|(_, b)| b.is_empty())
    }
}

pub struct Executor<'a> {
    meta: &'a dyn MetaStore,
    blobs: &'a dyn BlobStore,
    cache: &'a StreamCache,
}

impl<'a> Executor<'a> {
    pub fn new(meta: &'a dyn MetaStore, blobs: &'a dyn BlobStore, cache: &'a StreamCache) -> Self {
        Self { meta, blobs, cache }
    }

    fn check_deadline(deadline: Option<Instant>) -> Result<(), QueryError> {
        match deadline {
            Some(d) if Instant::now() >= d => Err(QueryError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Unions one clause's streams within a shard, clamped to the shard's
    /// local window.
    fn clause_bitmap(
        &self,
        clause: &LogClause,
        window: &RangeWindow,
        shard: u32,
    ) -> Result<RoaringBitmap, QueryError> {
        let (lo, hi) = window.local_bounds(shard);
        let mut union = RoaringBitmap::new();
        for value in &clause.values {
            let stream = clause.stream(value, shard);
            let view = self.cache.stream_view(self.meta, &stream)?;
            if view.is_empty() {
                continue;
            }
            for chunk_ref in self
                .cache
                .overlapping_refs(self.meta, &stream, &view, lo, hi)?
            {
                let bitmap = self.cache.chunk_bitmap(self.blobs, &stream, &chunk_ref)?;
                union |= bitmap.as_ref();
            }
            union |= view.tail();
        }
        clamp(&mut union, lo, hi);
        Ok(union)
    }

    /// Builds the block membership set for a block-level topic0 clause.
    pub fn block_membership(
        &self,
        clause: &BlockClause,
        window: &RangeWindow,
    ) -> Result<BlockMembership, QueryError> {
        let mut shards = Vec::new();
        for shard in window.block_shards() {
            let (lo, hi) = window.block_local_bounds(shard);
            let mut union = RoaringBitmap::new();
            for sig in &clause.sigs {
                let stream = StreamId::topic0_block(*sig, shard);
                let view = self.cache.stream_view(self.meta, &stream)?;
                if view.is_empty() {
                    continue;
                }
                for chunk_ref in self
                    .cache
                    .overlapping_refs(self.meta, &stream, &view, lo, hi)?
                {
                    let bitmap = self.cache.chunk_bitmap(self.blobs, &stream, &chunk_ref)?;
                    union |= bitmap.as_ref();
                }
                union |= view.tail();
            }
            clamp(&mut union, lo, hi);
            shards.push((shard, union));
        }
        Ok(BlockMembership { shards })
    }

    /// Builds the boundary table for late filtering.
    pub fn block_boundaries(
        &self,
        window: &RangeWindow,
    ) -> Result<BlockBoundaries, QueryError> {
        let mut bounds = Vec::with_capacity((window.last_block - window.first_block + 1) as usize);
        for block_num in window.first_block..=window.last_block {
            let vv = self
                .meta
                .get(&keys::block_meta_key(block_num))?
                .ok_or_else(|| {
                    QueryError::Corrupt(format!("block_meta {block_num} missing below head"))
                })?;
            let meta = canonical::decode_block_meta(vv.value())?;
            bounds.push((meta.first_log_id(), block_num));
        }
        Ok(BlockBoundaries::new(bounds))
    }

    /// Runs the bitmap strategy of a plan.
    pub fn run(&self, plan: &QueryPlan, filter: &LogFilter) -> Result<Vec<IndexedLog>, QueryError> {
        debug_assert!(!plan.log_clauses.is_empty());

        // The late block filter and its id→block table are built once, only
        // when a block-level clause survives planning.
        let late = match &plan.block_clause {
            Some(clause) => {
                let membership = self.block_membership(clause, &plan.window)?;
                if membership.is_empty() {
                    return Ok(Vec::new());
                }
                Some((membership, self.block_boundaries(&plan.window)?))
            }
            None => None,
        };

        let mut results = Vec::new();
        for shard in plan.window.log_shards() {
            Self::check_deadline(filter.deadline)?;

            let (first, rest) = plan
                .log_clauses
                .split_first()
                .expect("exec: clause checked");
            let mut candidates = self.clause_bitmap(first, &plan.window, shard)?;
            for clause in rest {
                if candidates.is_empty() {
                    break;
                }
                Self::check_deadline(filter.deadline)?;
                candidates &= self.clause_bitmap(clause, &plan.window, shard)?;
            }

            for local in candidates {
                Self::check_deadline(filter.deadline)?;
                let global_id = make_global(shard, local);

                if let Some((membership, boundaries)) = &late {
                    let block = boundaries.block_of(global_id).ok_or_else(|| {
                        QueryError::Corrupt(format!("log {global_id} outside block boundaries"))
                    })?;
                    if !membership.contains(block) {
                        continue;
                    }
                }

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
                    debug!(count = results.len(), "max_results reached, stopping early");
                    return Ok(results);
                }
            }
        }
        Ok(results)
    }
}

/// Restricts a bitmap to `[lo, hi]`.
pub(crate) fn clamp(bitmap: &mut RoaringBitmap, lo: u32, hi: u32) {
    if lo > 0 {
        bitmap.remove_range(..lo);
    }
    if hi < u32::MAX {
        bitmap.remove_range(hi + 1..);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_binary_search() {
        // Blocks at first ids 0, 3, 3, 10 (block 1 is empty).
        let bounds = BlockBoundaries::new(vec![(0, 0), (3, 1), (3, 2), (10, 3)]);
        assert_eq!(bounds.block_of(0), Some(0));
        assert_eq!(bounds.block_of(2), Some(0));
        // Ties resolve to the later (non-empty) block.
        assert_eq!(bounds.block_of(3), Some(2));
        assert_eq!(bounds.block_of(9), Some(2));
        assert_eq!(bounds.block_of(11), Some(3));
    }

    #[test]
    fn clamp_trims_both_ends() {
        let mut bitmap: RoaringBitmap = (0..100u32).collect();
        clamp(&mut bitmap, 10, 19);
        assert_eq!(bitmap.len(), 10);
        assert_eq!(bitmap.min(), Some(10));
        assert_eq!(bitmap.max(), Some(19));
    }

    #[test]
    fn clamp_full_range_is_noop() {
        let mut bitmap: RoaringBitmap = [0u32, u32::MAX].into_iter().collect();
        clamp(&mut bitmap, 0, u32::MAX);
        assert_eq!(bitmap.len(), 2);
    }
}
