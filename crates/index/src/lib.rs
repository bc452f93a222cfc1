//! Stream state management: mutable tails, sealed chunks, CAS-published
//! manifests, the shared read cache, and the topic0 hybrid policy.

pub mod cache;
pub mod chunk;
pub mod errors;
pub mod tail;
pub mod topic0;

pub use errors::IndexError;

pub type IndexResult<T> = Result<T, errors::IndexError>;
