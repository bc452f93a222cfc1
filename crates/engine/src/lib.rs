//! The write path and service shell: single-writer ingest with the
//! `meta/state` CAS visibility barrier, lease-based fencing, orphan GC,
//! lazy recovery, and the public facade the embedding service calls.

pub mod errors;
pub mod gc;
pub mod ingest;
pub mod lease;
pub mod recovery;
pub mod service;
pub mod status;
pub mod worker;

pub use errors::EngineError;
pub use ingest::{IngestOutcome, RejectKind};
pub use service::LogIndexService;
pub use status::{HealthReport, ServiceMode};
