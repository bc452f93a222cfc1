use chert_db::DbError;
use chert_index::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid params: {0}")]
    InvalidParams(&'static str),

    #[error("block not found")]
    BlockNotFound,

    /// An OR-list exceeded the planner guardrail with the `Error` action.
    #[error("query too broad: {0} or-terms over limit {1}")]
    TooBroad(usize, usize),

    /// The service is fail-closed and configured to refuse reads.
    #[error("index degraded")]
    Degraded,

    /// The service is shedding load.
    #[error("throttled")]
    Throttled,

    /// Persisted state contradicts itself; the service should degrade.
    #[error("corrupt index state: {0}")]
    Corrupt(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

impl From<DbError> for QueryError {
    fn from(err: DbError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<IndexError> for QueryError {
    fn from(err: IndexError) -> Self {
        if err.is_corruption() {
            Self::Corrupt(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<chert_codec::CodecError> for QueryError {
    fn from(err: chert_codec::CodecError) -> Self {
        Self::Corrupt(err.to_string())
    }
}
