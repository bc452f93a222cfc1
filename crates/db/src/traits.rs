//! The two store contracts the index core consumes.
//!
//! The MetaStore holds small mutable records behind true per-key CAS; the
//! BlobStore holds large immutable payloads under deterministic keys. Both
//! must reject mutations carrying a stale fence; a successful mutation with
//! a newer fence ratchets the store's observed epoch forward. If a backend
//! lacks these semantics natively, the adapter must supply them with a
//! gateway.

use crate::{
    types::{CasOutcome, Epoch, Version, VersionedValue},
    DbResult,
};

/// Iterator over a key prefix, in lexical key order.
pub type PrefixIter = Box<dyn Iterator<Item = DbResult<(Vec<u8>, VersionedValue)>> + Send>;

/// Small mutable records with per-key CAS and prefix listing.
pub trait MetaStore: Send + Sync {
    /// Reads a key, returning the value and its current version.
    fn get(&self, key: &[u8]) -> DbResult<Option<VersionedValue>>;

    /// Creates a key only if absent.
    fn put_if_absent(&self, key: &[u8], value: Vec<u8>, fence: Epoch) -> DbResult<CasOutcome>;

    /// Replaces a key only if it is at the expected version.
    fn put_if_version(
        &self,
        key: &[u8],
        value: Vec<u8>,
        expected: Version,
        fence: Epoch,
    ) -> DbResult<CasOutcome>;

    /// Deletes a key only if it is at the expected version.
    fn delete_if_version(&self, key: &[u8], expected: Version, fence: Epoch)
        -> DbResult<CasOutcome>;

    /// Lists all keys under a prefix in lexical order.
    fn list_prefix(&self, prefix: &[u8]) -> DbResult<PrefixIter>;
}

/// Iterator over blob keys under a prefix, with payload sizes.
pub type BlobKeyIter = Box<dyn Iterator<Item = DbResult<(Vec<u8>, u64)>> + Send>;

/// Large immutable payloads under deterministic keys.
pub trait BlobStore: Send + Sync {
    /// Writes a blob. Idempotent: rewriting a key with identical bytes is a
    /// no-op; rewriting with different bytes is a hard error.
    fn put(&self, key: &[u8], bytes: &[u8]) -> DbResult<()>;

    /// Reads a blob if present.
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Best-effort delete; absence counts as success.
    fn delete(&self, key: &[u8]) -> DbResult<()>;

    /// Lists keys under a prefix with their sizes, in lexical order. Used
    /// by reclamation scans only.
    fn list(&self, prefix: &[u8]) -> DbResult<BlobKeyIter>;
}

impl<S: MetaStore + ?Sized> MetaStore for std::sync::Arc<S> {
    fn get(&self, key: &[u8]) -> DbResult<Option<VersionedValue>> {
        (**self).get(key)
    }

    fn put_if_absent(&self, key: &[u8], value: Vec<u8>, fence: Epoch) -> DbResult<CasOutcome> {
        (**self).put_if_absent(key, value, fence)
    }

    fn put_if_version(
        &self,
        key: &[u8],
        value: Vec<u8>,
        expected: Version,
        fence: Epoch,
    ) -> DbResult<CasOutcome> {
        (**self).put_if_version(key, value, expected, fence)
    }

    fn delete_if_version(
        &self,
        key: &[u8],
        expected: Version,
        fence: Epoch,
    ) -> DbResult<CasOutcome> {
        (**self).delete_if_version(key, expected, fence)
    }

    fn list_prefix(&self, prefix: &[u8]) -> DbResult<PrefixIter> {
        (**self).list_prefix(prefix)
    }
}

impl<S: BlobStore + ?Sized> BlobStore for std::sync::Arc<S> {
    fn put(&self, key: &[u8], bytes: &[u8]) -> DbResult<()> {
        (**self).put(key, bytes)
    }

    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn delete(&self, key: &[u8]) -> DbResult<()> {
        (**self).delete(key)
    }

    fn list(&self, prefix: &[u8]) -> DbResult<BlobKeyIter> {
        (**self).list(prefix)
    }
}
