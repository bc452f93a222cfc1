//! Version-byte framing shared by all borsh-bodied values.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{CodecError, CodecResult};

/// Current codec version for all value types.
pub const CODEC_V1: u8 = 1;

/// Encodes a version byte followed by the borsh body.
pub fn encode_framed<T: BorshSerialize>(value: &T) -> Vec<u8> {
    let mut out = vec![CODEC_V1];
    // Serializing into a Vec cannot fail.
    borsh::to_writer(&mut out, value).expect("codec: vec write");
    out
}

/// Decodes a framed value, validating the version byte and that the body is
/// consumed exactly.
pub fn decode_framed<T: BorshDeserialize>(tag: &'static str, bytes: &[u8]) -> CodecResult<T> {
    let (&version, body) = bytes.split_first().ok_or(CodecError::Truncated(tag))?;
    if version != CODEC_V1 {
        return Err(CodecError::UnsupportedVersion(tag, version));
    }
    T::try_from_slice(body).map_err(|_| CodecError::Malformed(tag))
}
