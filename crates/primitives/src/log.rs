//! Log records as ingested and as stored.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::buf::{Buf20, Buf32};

/// Highest number of topics an Ethereum-style log carries.
pub const MAX_TOPICS: usize = 4;

/// A log as handed to ingest, before a global id or block position is
/// assigned.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize)]
pub struct LogEntry {
    address: Buf20,
    topics: Vec<Buf32>,
    data: Vec<u8>,
    tx_idx: u32,
}

impl LogEntry {
    pub fn new(address: Buf20, topics: Vec<Buf32>, data: Vec<u8>, tx_idx: u32) -> Self {
        debug_assert!(topics.len() <= MAX_TOPICS);
        Self {
            address,
            topics,
            data,
            tx_idx,
        }
    }

    pub fn address(&self) -> &Buf20 {
        &self.address
    }

    pub fn topics(&self) -> &[Buf32] {
        &self.topics
    }

    /// The event signature hash, when the log has any topics.
    pub fn sig(&self) -> Option<&Buf32> {
        self.topics.first()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn tx_idx(&self) -> u32 {
        self.tx_idx
    }
}

/// The canonical stored form of a log, keyed by global log id.
#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize, Deserialize,
    Serialize,
)]
pub struct LogRecord {
    address: Buf20,
    topics: Vec<Buf32>,
    data: Vec<u8>,
    block_num: u64,
    tx_idx: u32,
    log_idx: u32,
    block_hash: Buf32,
}

impl LogRecord {
    pub fn new(
        address: Buf20,
        topics: Vec<Buf32>,
        data: Vec<u8>,
        block_num: u64,
        tx_idx: u32,
        log_idx: u32,
        block_hash: Buf32,
    ) -> Self {
        Self {
            address,
            topics,
            data,
            block_num,
            tx_idx,
            log_idx,
            block_hash,
        }
    }

    /// Builds the stored record for an entry at a position within a block.
    pub fn from_entry(entry: &LogEntry, block_num: u64, block_hash: Buf32, log_idx: u32) -> Self {
        Self::new(
            *entry.address(),
            entry.topics().to_vec(),
            entry.data().to_vec(),
            block_num,
            entry.tx_idx(),
            log_idx,
            block_hash,
        )
    }

    pub fn address(&self) -> &Buf20 {
        &self.address
    }

    pub fn topics(&self) -> &[Buf32] {
        &self.topics
    }

    pub fn sig(&self) -> Option<&Buf32> {
        self.topics.first()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn block_num(&self) -> u64 {
        self.block_num
    }

    pub fn tx_idx(&self) -> u32 {
        self.tx_idx
    }

    pub fn log_idx(&self) -> u32 {
        self.log_idx
    }

    pub fn block_hash(&self) -> &Buf32 {
        &self.block_hash
    }
}

/// A stored log together with the global id it was assigned.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct IndexedLog {
    global_id: u64,
    record: LogRecord,
}

impl IndexedLog {
    pub fn new(global_id: u64, record: LogRecord) -> Self {
        Self { global_id, record }
    }

    pub fn global_id(&self) -> u64 {
        self.global_id
    }

    pub fn record(&self) -> &LogRecord {
        &self.record
    }

    pub fn into_record(self) -> LogRecord {
        self.record
    }
}
