use chert_codec::CodecError;
use chert_db::DbError;
use chert_index::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("db: {0}")]
    Db(#[from] DbError),

    #[error("index: {0}")]
    Index(#[from] IndexError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// A replayed canonical write found different bytes already stored.
    #[error("canonical record {0} diverged on replay")]
    ReplayDivergence(String),

    /// The `meta/state` CAS lost, meaning a second writer got past fencing.
    #[error("meta state cas lost")]
    StateCasLost,

    /// Durable state contradicts a structural invariant.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Another writer holds an unexpired lease.
    #[error("writer lease held elsewhere")]
    LeaseUnavailable,

    #[error("writer lease lost")]
    LeaseLost,

    #[error("service degraded")]
    Degraded,
}

impl EngineError {
    /// Whether retrying the same block can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Db(e) => e.is_transient(),
            Self::Index(IndexError::Db(e)) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether this failure must fail the service closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Db(e) => !e.is_transient(),
            Self::Index(e) => e.is_corruption() || e.is_writer_conflict(),
            Self::Codec(_) | Self::ReplayDivergence(_) | Self::StateCasLost | Self::Invariant(_) => {
                true
            }
            Self::LeaseUnavailable | Self::LeaseLost | Self::Degraded => false,
        }
    }
}
