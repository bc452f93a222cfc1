//! Deterministic block/log builders for end-to-end tests.

use chert_primitives::{
    block::FinalizedBlock,
    buf::{Buf20, Buf32},
    log::LogEntry,
};

/// A recognizable address derived from a small tag.
pub fn addr(tag: u8) -> Buf20 {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xad;
    bytes[19] = tag;
    Buf20::new(bytes)
}

/// A recognizable 32-byte topic word derived from a small tag.
pub fn word(tag: u8) -> Buf32 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x70;
    bytes[31] = tag;
    Buf32::new(bytes)
}

/// The deterministic hash of block `n` in a built chain.
pub fn block_hash(n: u64) -> Buf32 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xb1;
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    // A second mixed copy so adjacent hashes differ in more than one byte.
    bytes[8..16].copy_from_slice(&(n.wrapping_mul(0x9e37_79b9_7f4a_7c15)).to_le_bytes());
    Buf32::new(bytes)
}

/// A log entry with defaulted data and tx position.
pub fn entry(address: Buf20, topics: Vec<Buf32>) -> LogEntry {
    LogEntry::new(address, topics, vec![0xda, 0x7a], 0)
}

/// A log entry at an explicit transaction index.
pub fn entry_at(address: Buf20, topics: Vec<Buf32>, tx_idx: u32) -> LogEntry {
    LogEntry::new(address, topics, vec![0xda, 0x7a], tx_idx)
}

/// Produces a canonical chain one block at a time, with parent hashes
/// linked and heights assigned sequentially from 0.
pub struct ChainBuilder {
    next_num: u64,
    parent_hash: Buf32,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBuilder {
    /// A chain rooted at the zero genesis base.
    pub fn new() -> Self {
        Self {
            next_num: 0,
            parent_hash: Buf32::zero(),
        }
    }

    pub fn next_num(&self) -> u64 {
        self.next_num
    }

    /// Builds the next canonical block carrying the given logs.
    pub fn next_block(&mut self, logs: Vec<LogEntry>) -> FinalizedBlock {
        let num = self.next_num;
        let hash = block_hash(num);
        let block = FinalizedBlock::new(num, hash, self.parent_hash, logs);
        self.next_num += 1;
        self.parent_hash = hash;
        block
    }

    /// Builds `count` consecutive empty blocks.
    pub fn empty_blocks(&mut self, count: u64) -> Vec<FinalizedBlock> {
        (0..count).map(|_| self.next_block(vec![])).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_parents() {
        let mut chain = ChainBuilder::new();
        let b0 = chain.next_block(vec![]);
        let b1 = chain.next_block(vec![]);
        assert_eq!(b0.block_num(), 0);
        assert_eq!(b0.parent_hash(), &Buf32::zero());
        assert_eq!(b1.parent_hash(), b0.block_hash());
        assert_ne!(b0.block_hash(), b1.block_hash());
    }
}
