//! The `meta/state` record (the visibility barrier) and the writer lease.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    frame::{decode_framed, encode_framed},
    CodecResult,
};

/// The single record whose CAS publishes a newly ingested block.
///
/// `indexed_head` is `None` until the first block lands. `next_log_id` is the
/// first unassigned global log id.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct MetaState {
    indexed_head: Option<u64>,
    next_log_id: u64,
    writer_epoch: u64,
}

impl MetaState {
    pub fn genesis(writer_epoch: u64) -> Self {
        Self {
            indexed_head: None,
            next_log_id: 0,
            writer_epoch,
        }
    }

    pub fn new(indexed_head: Option<u64>, next_log_id: u64, writer_epoch: u64) -> Self {
        Self {
            indexed_head,
            next_log_id,
            writer_epoch,
        }
    }

    pub fn indexed_head(&self) -> Option<u64> {
        self.indexed_head
    }

    pub fn next_log_id(&self) -> u64 {
        self.next_log_id
    }

    pub fn writer_epoch(&self) -> u64 {
        self.writer_epoch
    }

    /// The height the next ingested block must carry.
    pub fn expected_next_block(&self) -> u64 {
        match self.indexed_head {
            Some(h) => h + 1,
            None => 0,
        }
    }

    /// State after publishing a block with `log_count` logs.
    pub fn advanced(&self, block_num: u64, log_count: u64, writer_epoch: u64) -> Self {
        Self {
            indexed_head: Some(block_num),
            next_log_id: self.next_log_id + log_count,
            writer_epoch,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_framed(self)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_framed("meta_state", bytes)
    }
}

/// The writer lease record, CAS-contended by would-be writers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct LeaseRecord {
    holder: u64,
    epoch: u64,
    expires_at_ms: u64,
}

impl LeaseRecord {
    pub fn new(holder: u64, epoch: u64, expires_at_ms: u64) -> Self {
        Self {
            holder,
            epoch,
            expires_at_ms,
        }
    }

    pub fn holder(&self) -> u64 {
        self.holder
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Same holder and epoch, extended expiry.
    pub fn renewed(&self, expires_at_ms: u64) -> Self {
        Self {
            expires_at_ms,
            ..*self
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_framed(self)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_framed("lease", bytes)
    }
}

#[cfg(test)]
mod tests {
    use crate::CodecError;

    use super::*;

    #[test]
    fn meta_state_roundtrip() {
        let state = MetaState::new(Some(10), 1234, 3);
        let back = MetaState::decode(&state.encode()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn genesis_expects_block_zero() {
        let state = MetaState::genesis(1);
        assert_eq!(state.expected_next_block(), 0);
        let advanced = state.advanced(0, 7, 1);
        assert_eq!(advanced.indexed_head(), Some(0));
        assert_eq!(advanced.next_log_id(), 7);
        assert_eq!(advanced.expected_next_block(), 1);
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = MetaState::genesis(0).encode();
        bytes[0] = 9;
        assert!(matches!(
            MetaState::decode(&bytes),
            Err(CodecError::UnsupportedVersion("meta_state", 9))
        ));
    }
}
