pub use crate::{
    block::{BlockMeta, FinalizedBlock},
    buf::{Buf20, Buf32},
    filter::{BlockTag, LogFilter, TopicFilter},
    id::{local_of, make_global, shard_of, IndexKind, StreamId, StreamValue},
    log::{IndexedLog, LogEntry, LogRecord, MAX_TOPICS},
};
