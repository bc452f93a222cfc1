use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A mutating op carried an epoch older than the store has observed.
    #[error("fence epoch {given} stale (store has seen {current})")]
    FenceRejected { given: u64, current: u64 },

    /// An immutable blob key was rewritten with different bytes.
    #[error("blob {0} rewritten with different content")]
    BlobMismatch(String),

    /// The backend failed in a way worth retrying.
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl DbError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
