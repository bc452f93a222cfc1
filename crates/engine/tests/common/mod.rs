//! Shared harness for engine integration tests.

use std::sync::Arc;

use chert_config::EngineConfig;
use chert_db::{
    mem::{MemBlobStore, MemMetaStore},
    traits::{BlobStore, MetaStore},
};
use chert_engine::LogIndexService;

/// Config with background cadences pushed out far enough that worker
/// threads never interfere with a test, and chunk sealing small enough to
/// exercise the publish path constantly.
pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.chunk.target_entries = 4;
    cfg.chunk.maintenance_seal_interval_ms = 3_600_000;
    cfg.tail.flush_interval_ms = 3_600_000;
    cfg.gc.interval_ms = 3_600_000;
    cfg.lease.ttl_ms = 3_600_000;
    cfg.lease.renew_interval_ms = 3_600_000;
    cfg.guardrail.throttle_delay_ms = 1;
    cfg
}

pub struct Harness {
    pub meta: Arc<MemMetaStore>,
    pub blobs: Arc<MemBlobStore>,
    pub service: Arc<LogIndexService>,
}

impl Harness {
    pub fn open(cfg: EngineConfig) -> Self {
        let meta = Arc::new(MemMetaStore::new());
        let blobs = Arc::new(MemBlobStore::new());
        let service = open_over(meta.clone(), blobs.clone(), cfg);
        Self {
            meta,
            blobs,
            service,
        }
    }
}

pub fn open_over(
    meta: Arc<MemMetaStore>,
    blobs: Arc<MemBlobStore>,
    cfg: EngineConfig,
) -> Arc<LogIndexService> {
    let meta_dyn: Arc<dyn MetaStore> = meta;
    let blobs_dyn: Arc<dyn BlobStore> = blobs;
    LogIndexService::open(meta_dyn, blobs_dyn, cfg).expect("open service")
}
