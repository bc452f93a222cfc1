//! Wire-stable encoding for everything the index persists.
//!
//! Every value begins with a version byte; bodies are borsh except where the
//! layout embeds a raw roaring bitmap. Chunk blobs carry a trailing CRC32.
//! Numeric key suffixes are big-endian so that lexical key order matches
//! numeric order.

pub mod canonical;
pub mod chunk;
pub mod errors;
pub mod frame;
pub mod keys;
pub mod manifest;
pub mod meta;
pub mod tail;

pub use errors::CodecError;

/// Result type used across the codec layer.
pub type CodecResult<T> = Result<T, CodecError>;
