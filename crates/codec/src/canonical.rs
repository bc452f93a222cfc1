//! Codecs for the canonical tables: logs, block meta, and the hash→num map.

use chert_primitives::{block::BlockMeta, log::LogRecord};

use crate::{
    frame::{decode_framed, encode_framed},
    CodecResult,
};

pub fn encode_log_record(record: &LogRecord) -> Vec<u8> {
    encode_framed(record)
}

pub fn decode_log_record(bytes: &[u8]) -> CodecResult<LogRecord> {
    decode_framed("log_record", bytes)
}

pub fn encode_block_meta(meta: &BlockMeta) -> Vec<u8> {
    encode_framed(meta)
}

pub fn decode_block_meta(bytes: &[u8]) -> CodecResult<BlockMeta> {
    decode_framed("block_meta", bytes)
}

pub fn encode_block_num(block_num: u64) -> Vec<u8> {
    encode_framed(&block_num)
}

pub fn decode_block_num(bytes: &[u8]) -> CodecResult<u64> {
    decode_framed("block_num", bytes)
}
