//! In-memory reference implementations of the store contracts.
//!
//! These implement the exact CAS, fencing, and idempotent-blob semantics the
//! contracts require, so the whole engine can run against them in tests and
//! in embedders that want a volatile index.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{
    traits::{BlobKeyIter, BlobStore, MetaStore, PrefixIter},
    types::{display_key, CasOutcome, Epoch, Version, VersionedValue},
    DbError, DbResult,
};

#[derive(Default)]
struct MetaInner {
    map: BTreeMap<Vec<u8>, VersionedValue>,
    /// Highest epoch any mutation has carried; stale fences are rejected.
    observed_epoch: Epoch,
    next_version: Version,
}

impl MetaInner {
    fn check_fence(&mut self, fence: Epoch) -> DbResult<()> {
        if fence < self.observed_epoch {
            return Err(DbError::FenceRejected {
                given: fence,
                current: self.observed_epoch,
            });
        }
        self.observed_epoch = fence;
        Ok(())
    }

    fn bump_version(&mut self) -> Version {
        self.next_version += 1;
        self.next_version
    }
}

/// BTreeMap-backed [`MetaStore`].
#[derive(Default)]
pub struct MemMetaStore {
    inner: RwLock<MetaInner>,
}

impl MemMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest fence any mutation has carried, for assertions in tests.
    pub fn observed_epoch(&self) -> Epoch {
        self.inner.read().observed_epoch
    }

    /// Full key→value snapshot (versions excluded), for state comparison in
    /// tests.
    pub fn dump(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.inner
            .read()
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.value().to_vec()))
            .collect()
    }
}

impl MetaStore for MemMetaStore {
    fn get(&self, key: &[u8]) -> DbResult<Option<VersionedValue>> {
        Ok(self.inner.read().map.get(key).cloned())
    }

    fn put_if_absent(&self, key: &[u8], value: Vec<u8>, fence: Epoch) -> DbResult<CasOutcome> {
        let mut inner = self.inner.write();
        inner.check_fence(fence)?;
        if let Some(existing) = inner.map.get(key) {
            return Ok(CasOutcome::NotApplied(Some(existing.clone())));
        }
        let version = inner.bump_version();
        inner
            .map
            .insert(key.to_vec(), VersionedValue::new(value, version));
        Ok(CasOutcome::Applied(version))
    }

    fn put_if_version(
        &self,
        key: &[u8],
        value: Vec<u8>,
        expected: Version,
        fence: Epoch,
    ) -> DbResult<CasOutcome> {
        let mut inner = self.inner.write();
        inner.check_fence(fence)?;
        match inner.map.get(key) {
            Some(existing) if existing.version() == expected => {
                let version = inner.bump_version();
                inner
                    .map
                    .insert(key.to_vec(), VersionedValue::new(value, version));
                Ok(CasOutcome::Applied(version))
            }
            other => Ok(CasOutcome::NotApplied(other.cloned())),
        }
    }

    fn delete_if_version(
        &self,
        key: &[u8],
        expected: Version,
        fence: Epoch,
    ) -> DbResult<CasOutcome> {
        let mut inner = self.inner.write();
        inner.check_fence(fence)?;
        match inner.map.get(key) {
            Some(existing) if existing.version() == expected => {
                inner.map.remove(key);
                let version = inner.bump_version();
                Ok(CasOutcome::Applied(version))
            }
            other => Ok(CasOutcome::NotApplied(other.cloned())),
        }
    }

    fn list_prefix(&self, prefix: &[u8]) -> DbResult<PrefixIter> {
        let inner = self.inner.read();
        let entries: Vec<_> = inner
            .map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Ok(Box::new(entries.into_iter()))
    }
}

/// BTreeMap-backed [`BlobStore`].
#[derive(Default)]
pub struct MemBlobStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs, for assertions in tests.
    pub fn blob_count(&self) -> usize {
        self.map.read().len()
    }

    /// Full key→bytes snapshot, for state comparison in tests.
    pub fn dump(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.map.read().clone()
    }
}

impl BlobStore for MemBlobStore {
    fn put(&self, key: &[u8], bytes: &[u8]) -> DbResult<()> {
        let mut map = self.map.write();
        match map.get(key) {
            Some(existing) if existing == bytes => Ok(()),
            Some(_) => Err(DbError::BlobMismatch(display_key(key))),
            None => {
                map.insert(key.to_vec(), bytes.to_vec());
                Ok(())
            }
        }
    }

    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &[u8]) -> DbResult<BlobKeyIter> {
        let map = self.map.read();
        let entries: Vec<_> = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Ok((k.clone(), v.len() as u64)))
            .collect();
        Ok(Box::new(entries.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_if_absent_only_once() {
        let store = MemMetaStore::new();
        let first = store.put_if_absent(b"k", vec![1], 0).unwrap();
        assert!(first.is_applied());
        let second = store.put_if_absent(b"k", vec![2], 0).unwrap();
        assert!(!second.is_applied());
        assert_eq!(second.current().unwrap().value(), &[1]);
    }

    #[test]
    fn put_if_version_requires_exact_version() {
        let store = MemMetaStore::new();
        let v1 = store
            .put_if_absent(b"k", vec![1], 0)
            .unwrap()
            .applied_version()
            .unwrap();
        assert!(store
            .put_if_version(b"k", vec![2], v1, 0)
            .unwrap()
            .is_applied());
        // Replaying the same expected version loses.
        let stale = store.put_if_version(b"k", vec![3], v1, 0).unwrap();
        assert!(!stale.is_applied());
        assert_eq!(stale.current().unwrap().value(), &[2]);
    }

    #[test]
    fn stale_fence_rejected_and_no_mutation() {
        let store = MemMetaStore::new();
        store.put_if_absent(b"k", vec![1], 5).unwrap();
        let err = store.put_if_absent(b"other", vec![2], 4).unwrap_err();
        assert!(matches!(
            err,
            DbError::FenceRejected {
                given: 4,
                current: 5
            }
        ));
        assert!(store.get(b"other").unwrap().is_none());
    }

    #[test]
    fn list_prefix_is_ordered_and_bounded() {
        let store = MemMetaStore::new();
        store.put_if_absent(b"a/2", vec![], 0).unwrap();
        store.put_if_absent(b"a/1", vec![], 0).unwrap();
        store.put_if_absent(b"b/1", vec![], 0).unwrap();
        let keys: Vec<_> = store
            .list_prefix(b"a/")
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec()]);
    }

    #[test]
    fn blob_rewrite_must_match() {
        let store = MemBlobStore::new();
        store.put(b"c", &[1, 2]).unwrap();
        store.put(b"c", &[1, 2]).unwrap();
        assert!(matches!(
            store.put(b"c", &[3]),
            Err(DbError::BlobMismatch(_))
        ));
        store.delete(b"c").unwrap();
        store.delete(b"c").unwrap();
        assert_eq!(store.blob_count(), 0);
    }
}
