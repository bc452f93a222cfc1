//! Block-level types: the ingest input and the stored per-block metadata.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{buf::Buf32, log::LogEntry};

/// A finalized canonical block as fed to ingest, in strict height order.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct FinalizedBlock {
    block_num: u64,
    block_hash: Buf32,
    parent_hash: Buf32,
    logs: Vec<LogEntry>,
}

impl FinalizedBlock {
    pub fn new(block_num: u64, block_hash: Buf32, parent_hash: Buf32, logs: Vec<LogEntry>) -> Self {
        Self {
            block_num,
            block_hash,
            parent_hash,
            logs,
        }
    }

    pub fn block_num(&self) -> u64 {
        self.block_num
    }

    pub fn block_hash(&self) -> &Buf32 {
        &self.block_hash
    }

    pub fn parent_hash(&self) -> &Buf32 {
        &self.parent_hash
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }
}

/// Stored metadata for a finalized block, keyed by height.
///
/// `[first_log_id, first_log_id + log_count)` is exactly the global id range
/// assigned to the block's logs.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize, Deserialize,
    Serialize,
)]
pub struct BlockMeta {
    block_num: u64,
    block_hash: Buf32,
    parent_hash: Buf32,
    first_log_id: u64,
    log_count: u32,
}

impl BlockMeta {
    pub fn new(
        block_num: u64,
        block_hash: Buf32,
        parent_hash: Buf32,
        first_log_id: u64,
        log_count: u32,
    ) -> Self {
        Self {
            block_num,
            block_hash,
            parent_hash,
            first_log_id,
            log_count,
        }
    }

    pub fn block_num(&self) -> u64 {
        self.block_num
    }

    pub fn block_hash(&self) -> &Buf32 {
        &self.block_hash
    }

    pub fn parent_hash(&self) -> &Buf32 {
        &self.parent_hash
    }

    pub fn first_log_id(&self) -> u64 {
        self.first_log_id
    }

    pub fn log_count(&self) -> u32 {
        self.log_count
    }

    /// Global id one past the block's last log.
    pub fn end_log_id(&self) -> u64 {
        self.first_log_id + self.log_count as u64
    }
}
