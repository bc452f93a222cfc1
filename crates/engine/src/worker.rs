//! Channel-fed ingest worker.
//!
//! The upstream finality follower pushes blocks into the channel; this task
//! drains it in order on a blocking thread. It exits on shutdown, on a
//! closed channel, or when the service fails closed.

use std::sync::Arc;

use chert_common::shutdown::ShutdownGuard;
use chert_primitives::block::FinalizedBlock;
use tokio::sync::mpsc;
use tracing::*;

use crate::{
    ingest::{IngestOutcome, RejectKind},
    service::LogIndexService,
};

/// Drains finalized blocks into the service. Run on a dedicated thread;
/// returns an error when the writer cannot continue.
pub fn ingest_worker_task(
    service: Arc<LogIndexService>,
    mut block_rx: mpsc::Receiver<FinalizedBlock>,
    shutdown: ShutdownGuard,
) -> anyhow::Result<()> {
    while let Some(block) = block_rx.blocking_recv() {
        let block_num = block.block_num();
        match service.ingest_finalized_block(&block) {
            IngestOutcome::Applied => trace!(%block_num, "block applied"),
            IngestOutcome::AlreadyIngested => {
                debug!(%block_num, "duplicate block from upstream, ignored");
            }
            IngestOutcome::FinalityViolation => {
                error!(%block_num, "finality violation, stopping ingest worker");
                anyhow::bail!("finality violation at block {block_num}");
            }
            IngestOutcome::Rejected(RejectKind::Degraded) => {
                error!(%block_num, "service degraded, stopping ingest worker");
                anyhow::bail!("service degraded at block {block_num}");
            }
            IngestOutcome::Rejected(RejectKind::LeaseLost) => {
                error!(%block_num, "writer lease lost, stopping ingest worker");
                anyhow::bail!("writer lease lost at block {block_num}");
            }
            IngestOutcome::Rejected(kind) => {
                warn!(%block_num, ?kind, "block rejected");
            }
        }

        if shutdown.should_shutdown() {
            break;
        }
    }

    info!("ingest worker exiting");
    Ok(())
}
