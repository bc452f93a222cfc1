//! Query filters, mirroring the `eth_getLogs` parameter shape.

use std::time::Instant;

use crate::{
    buf::{Buf20, Buf32},
    log::{LogRecord, MAX_TOPICS},
};

/// A block bound in a filter, either a concrete height or a named tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockTag {
    Earliest,
    Latest,
    Number(u64),
}

impl BlockTag {
    /// Resolves against the indexed finalized head.
    pub fn resolve(&self, head: u64) -> u64 {
        match self {
            Self::Earliest => 0,
            Self::Latest => head,
            Self::Number(n) => *n,
        }
    }
}

impl From<u64> for BlockTag {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

/// One positional topic constraint: `None` is a wildcard, otherwise the log's
/// topic at that position must equal one of the listed values.
pub type TopicFilter = Option<Vec<Buf32>>;

/// An `eth_getLogs`-equivalent filter over the finalized range.
///
/// Absent block bounds resolve to `latest`. An empty address list or an empty
/// OR-list behaves as a wildcard. `block_hash` is exclusive with the range
/// bounds.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub from_block: Option<BlockTag>,
    pub to_block: Option<BlockTag>,
    pub block_hash: Option<Buf32>,
    pub address: Vec<Buf20>,
    pub topics: [TopicFilter; MAX_TOPICS],
    pub max_results: Option<usize>,
    /// Best-effort deadline; checked between executor steps.
    pub deadline: Option<Instant>,
}

impl LogFilter {
    pub fn range(from: impl Into<BlockTag>, to: impl Into<BlockTag>) -> Self {
        Self {
            from_block: Some(from.into()),
            to_block: Some(to.into()),
            ..Default::default()
        }
    }

    pub fn at_hash(block_hash: Buf32) -> Self {
        Self {
            block_hash: Some(block_hash),
            ..Default::default()
        }
    }

    pub fn with_addresses(mut self, addrs: Vec<Buf20>) -> Self {
        self.address = addrs;
        self
    }

    pub fn with_topic(mut self, pos: usize, values: Vec<Buf32>) -> Self {
        assert!(pos < MAX_TOPICS);
        self.topics[pos] = Some(values);
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Whether a stored log satisfies the address and topic constraints.
    ///
    /// This is the exact predicate; the bitmap phases only narrow candidates.
    pub fn matches(&self, record: &LogRecord) -> bool {
        if !self.address.is_empty() && !self.address.contains(record.address()) {
            return false;
        }
        for (pos, constraint) in self.topics.iter().enumerate() {
            let Some(values) = constraint else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            match record.topics().get(pos) {
                Some(topic) if values.contains(topic) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: Buf20, topics: Vec<Buf32>) -> LogRecord {
        LogRecord::new(address, topics, vec![], 0, 0, 0, Buf32::zero())
    }

    #[test]
    fn wildcard_matches_everything() {
        let rec = record(Buf20::new([1; 20]), vec![Buf32::new([2; 32])]);
        assert!(LogFilter::default().matches(&rec));
    }

    #[test]
    fn address_or_list() {
        let a = Buf20::new([1; 20]);
        let b = Buf20::new([2; 20]);
        let filter = LogFilter::default().with_addresses(vec![a, b]);
        assert!(filter.matches(&record(a, vec![])));
        assert!(filter.matches(&record(b, vec![])));
        assert!(!filter.matches(&record(Buf20::new([3; 20]), vec![])));
    }

    #[test]
    fn topic_position_must_exist() {
        let t1 = Buf32::new([5; 32]);
        let filter = LogFilter::default().with_topic(1, vec![t1]);
        // Log with no topic at position 1 cannot match a constrained slot.
        assert!(!filter.matches(&record(Buf20::zero(), vec![Buf32::zero()])));
        assert!(filter.matches(&record(Buf20::zero(), vec![Buf32::zero(), t1])));
    }

    #[test]
    fn empty_or_list_is_wildcard() {
        let filter = LogFilter::default().with_topic(0, vec![]);
        assert!(filter.matches(&record(Buf20::zero(), vec![])));
    }
}
