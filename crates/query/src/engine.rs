//! The query engine facade: snapshot, plan, execute.

use std::sync::Arc;

use chert_config::PlannerConfig;
use chert_db::traits::{BlobStore, MetaStore};
use chert_index::cache::StreamCache;
use chert_primitives::{filter::LogFilter, log::IndexedLog};
use tracing::*;

use crate::{
    exec::Executor,
    plan::{Planner, Strategy},
    scan::BlockScanner,
    QueryError,
};

/// Serves filter queries over the finalized snapshot. Cheap to share across
/// reader tasks; holds no mutable state beyond the shared cache.
pub struct QueryEngine {
    meta: Arc<dyn MetaStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<StreamCache>,
    planner_cfg: PlannerConfig,
}

impl QueryEngine {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<StreamCache>,
        planner_cfg: PlannerConfig,
    ) -> Self {
        Self {
            meta,
            blobs,
            cache,
            planner_cfg,
        }
    }

    /// The head every result of a following `query` call is bounded by.
    pub fn indexed_head(&self) -> Result<Option<u64>, QueryError> {
        let planner = Planner::new(self.meta.as_ref(), &self.cache, &self.planner_cfg);
        Ok(planner.snapshot()?.and_then(|s| s.indexed_head()))
    }

    /// Plans and executes a filter against the current snapshot.
    pub fn query(&self, filter: &LogFilter) -> Result<Vec<IndexedLog>, QueryError> {
        let planner = Planner::new(self.meta.as_ref(), &self.cache, &self.planner_cfg);
        let Some(snapshot) = planner.snapshot()? else {
            // Nothing ever ingested.
            if filter.block_hash.is_some() {
                return Err(QueryError::BlockNotFound);
            }
            return Ok(Vec::new());
        };

        let Some(plan) = planner.plan(filter, snapshot)? else {
            return Ok(Vec::new());
        };

        let results = match plan.strategy {
            Strategy::Bitmap => {
                let executor =
                    Executor::new(self.meta.as_ref(), self.blobs.as_ref(), &self.cache);
                executor.run(&plan, filter)?
            }
            Strategy::BlockScan => {
                let scanner =
                    BlockScanner::new(self.meta.as_ref(), self.blobs.as_ref(), &self.cache);
                scanner.run(&plan, filter)?
            }
        };
        trace!(results = results.len(), "query complete");
        Ok(results)
    }
}
