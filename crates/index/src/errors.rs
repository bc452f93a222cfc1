use chert_codec::CodecError;
use chert_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("db: {0}")]
    Db(#[from] DbError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// A tail checkpoint CAS lost; under the single-writer invariant this
    /// means a fencing failure.
    #[error("tail checkpoint cas lost for stream {0}")]
    TailCasLost(String),

    /// Manifest CAS kept losing past the retry budget.
    #[error("manifest cas exhausted retries for stream {0}")]
    ManifestCasExhausted(String),

    /// A topic0 mode/stats CAS lost.
    #[error("topic0 state cas lost for sig {0}")]
    Topic0CasLost(String),

    /// A manifest references a chunk the blob store does not have.
    #[error("chunk {1} of stream {0} missing from blob store")]
    MissingChunk(String, u32),

    /// A manifest header's directory references a segment page that is gone.
    #[error("manifest segment {1} of stream {0} missing")]
    MissingSegment(String, u32),

    /// A chunk decoded fine but disagrees with its manifest ref.
    #[error("chunk {1} of stream {0} does not match its manifest ref")]
    ChunkRefMismatch(String, u32),
}

impl IndexError {
    /// Whether this error indicates on-disk state is no longer trustworthy.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Codec(_)
                | Self::MissingChunk(..)
                | Self::MissingSegment(..)
                | Self::ChunkRefMismatch(..)
        )
    }

    /// Whether this error means the single-writer invariant broke.
    pub fn is_writer_conflict(&self) -> bool {
        matches!(
            self,
            Self::TailCasLost(_) | Self::ManifestCasExhausted(_) | Self::Topic0CasLost(_)
        ) || matches!(self, Self::Db(DbError::FenceRejected { .. }))
    }
}
