//! Value and result types shared by the store contracts.

/// Monotone per-key version assigned by the MetaStore on every write.
pub type Version = u64;

/// Writer epoch used as a fence on every mutating op.
pub type Epoch = u64;

/// A value together with the version it was read or written at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionedValue {
    value: Vec<u8>,
    version: Version,
}

impl VersionedValue {
    pub fn new(value: Vec<u8>, version: Version) -> Self {
        Self { value, version }
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn into_value(self) -> Vec<u8> {
        self.value
    }
}

/// Outcome of a compare-and-swap on the MetaStore.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CasOutcome {
    /// The write landed; the key is now at this version.
    Applied(Version),
    /// The precondition failed; carries the current state of the key, or
    /// `None` if the key is absent.
    NotApplied(Option<VersionedValue>),
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The version the write landed at, if it did.
    pub fn applied_version(&self) -> Option<Version> {
        match self {
            Self::Applied(v) => Some(*v),
            Self::NotApplied(_) => None,
        }
    }

    /// The loser's view of the key, when the write did not land.
    pub fn current(&self) -> Option<&VersionedValue> {
        match self {
            Self::Applied(_) => None,
            Self::NotApplied(cur) => cur.as_ref(),
        }
    }
}

/// Renders a store key for diagnostics; keys mix text prefixes with raw
/// bytes, so non-printable bytes are hex-escaped.
pub fn display_key(key: &[u8]) -> String {
    let mut out = String::with_capacity(key.len());
    for &b in key {
        if b.is_ascii_graphic() {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02x}"));
        }
    }
    out
}
