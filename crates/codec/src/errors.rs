use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported {0} codec version {1}")]
    UnsupportedVersion(&'static str, u8),

    #[error("{0} payload truncated")]
    Truncated(&'static str),

    #[error("malformed {0} payload")]
    Malformed(&'static str),

    /// (type, stored, computed)
    #[error("{0} checksum mismatch (stored {1:#010x}, computed {2:#010x})")]
    ChecksumMismatch(&'static str, u32, u32),

    /// Decoded metadata disagrees with the framing fields.
    #[error("{0} self-description mismatch")]
    Inconsistent(&'static str),
}
