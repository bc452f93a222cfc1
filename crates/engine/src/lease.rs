//! The writer lease: a renewable record in the MetaStore whose epoch fences
//! every write.
//!
//! Acquisition bumps the epoch via CAS; the store's fence ratchet then
//! rejects anything still carrying the old epoch. Losing the lease flips a
//! shared flag the ingest path asserts before and during every block.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use chert_codec::{keys, meta::LeaseRecord};
use chert_common::{shutdown::ShutdownGuard, time::now_ms};
use chert_config::LeaseConfig;
use chert_db::{traits::MetaStore, types::Version};
use parking_lot::Mutex;
use rand::Rng;
use tracing::*;

use crate::EngineError;

pub struct LeaseManager {
    meta: Arc<dyn MetaStore>,
    cfg: LeaseConfig,
    holder_id: u64,
    epoch: AtomicU64,
    held: AtomicBool,
    version: Mutex<Version>,
}

impl LeaseManager {
    /// Acquires the lease, bumping the writer epoch. Fails with
    /// [`EngineError::LeaseUnavailable`] while another holder's lease is
    /// live.
    pub fn acquire(meta: Arc<dyn MetaStore>, cfg: LeaseConfig) -> Result<Arc<Self>, EngineError> {
        let holder_id = rand::thread_rng().gen();
        Self::acquire_at(meta, cfg, holder_id, now_ms())
    }

    /// Clock-injected acquisition, used directly by tests.
    pub fn acquire_at(
        meta: Arc<dyn MetaStore>,
        cfg: LeaseConfig,
        holder_id: u64,
        now: u64,
    ) -> Result<Arc<Self>, EngineError> {
        let expires = now + cfg.ttl_ms;
        let (record, version) = match meta.get(keys::LEASE_KEY)? {
            None => {
                let record = LeaseRecord::new(holder_id, 1, expires);
                let outcome = meta.put_if_absent(keys::LEASE_KEY, record.encode(), record.epoch())?;
                let Some(version) = outcome.applied_version() else {
                    return Err(EngineError::LeaseUnavailable);
                };
                (record, version)
            }
            Some(vv) => {
                let current = LeaseRecord::decode(vv.value())?;
                if !current.is_expired_at(now) && current.holder() != holder_id {
                    return Err(EngineError::LeaseUnavailable);
                }
                let record = LeaseRecord::new(holder_id, current.epoch() + 1, expires);
                let outcome = meta.put_if_version(
                    keys::LEASE_KEY,
                    record.encode(),
                    vv.version(),
                    record.epoch(),
                )?;
                let Some(version) = outcome.applied_version() else {
                    return Err(EngineError::LeaseUnavailable);
                };
                (record, version)
            }
        };

        info!(epoch = record.epoch(), "writer lease acquired");
        Ok(Arc::new(Self {
            meta,
            cfg,
            holder_id,
            epoch: AtomicU64::new(record.epoch()),
            held: AtomicBool::new(true),
            version: Mutex::new(version),
        }))
    }

    /// The fence every write from this writer carries.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Extends the lease expiry. A lost CAS means another writer took over.
    pub fn renew(&self) -> Result<(), EngineError> {
        self.renew_at(now_ms())
    }

    pub fn renew_at(&self, now: u64) -> Result<(), EngineError> {
        if !self.is_held() {
            return Err(EngineError::LeaseLost);
        }
        let mut version = self.version.lock();
        let record = LeaseRecord::new(self.holder_id, self.epoch(), now + self.cfg.ttl_ms);
        let outcome = match self
            .meta
            .put_if_version(keys::LEASE_KEY, record.encode(), *version, self.epoch())
        {
            Ok(outcome) => outcome,
            // A newer epoch already ratcheted the store: we are fenced out.
            Err(chert_db::DbError::FenceRejected { .. }) => {
                warn!("lease renewal fence-rejected, writer fenced out");
                self.held.store(false, Ordering::Release);
                return Err(EngineError::LeaseLost);
            }
            Err(e) => return Err(e.into()),
        };
        match outcome.applied_version() {
            Some(v) => {
                *version = v;
                Ok(())
            }
            None => {
                warn!("lease renewal lost, writer fenced out");
                self.held.store(false, Ordering::Release);
                Err(EngineError::LeaseLost)
            }
        }
    }

    /// Marks the lease lost locally (e.g. after a fence rejection).
    pub fn mark_lost(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Background renewal loop; exits on shutdown or loss.
    pub fn renew_loop(self: &Arc<Self>, shutdown: ShutdownGuard) {
        let interval = std::time::Duration::from_millis(self.cfg.renew_interval_ms);
        loop {
            if !shutdown.sleep_interruptible(interval) {
                break;
            }
            match self.renew() {
                Ok(()) => trace!("lease renewed"),
                Err(e) => {
                    error!(err = %e, "lease renewal failed, stopping renewer");
                    self.mark_lost();
                    break;
                }
            }
        }
    }
}
