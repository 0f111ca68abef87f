// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content digests, stable type identifiers, and reference handles.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A SHA-256 content address, encoded as 64 lowercase hex characters.
///
/// # Examples
///
/// ```
/// use weave_core::Digest;
///
/// let d = Digest::of_bytes(b"hello");
/// assert_eq!(d.as_str().len(), 64);
/// assert_eq!(d, Digest::of_bytes(b"hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Hash raw bytes into a digest.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// The full 64-character hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight hex characters, for log lines and display.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == 64
            && s.chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(CoreError::InvalidDigest {
                literal: s.to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// TypeKey
// ---------------------------------------------------------------------------

/// Stable identifier of a registered resource type.
///
/// The digest is derived from the registered name string alone, so two
/// processes that register the same name agree on the identifier without
/// coordination. Equality, ordering, and hashing all use the digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeKey {
    /// Human-readable fully qualified name, e.g. `"weave.ValueCell"`.
    pub name: String,
    /// SHA-256 of the name string.
    pub digest: Digest,
}

impl TypeKey {
    /// Derive the stable key for a type name.
    #[must_use]
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let digest = Digest::of_bytes(name.as_bytes());
        Self { name, digest }
    }

    /// Check that the digest actually matches the name.
    ///
    /// Packed forms carry both halves; a disagreeing pair is rejected at
    /// unpack time rather than allowed to alias another type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Malformed`] on a mismatched pair.
    pub fn verify(&self) -> Result<(), CoreError> {
        if Digest::of_bytes(self.name.as_bytes()) == self.digest {
            Ok(())
        } else {
            Err(CoreError::Malformed {
                reason: format!("type key digest does not match name `{}`", self.name),
            })
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl PartialOrd for TypeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.digest.cmp(&other.digest)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.digest.short())
    }
}

// ---------------------------------------------------------------------------
// Ref
// ---------------------------------------------------------------------------

/// A reference to a committed resource: the target's type plus its digest.
///
/// A `Ref` is a pointer with identity in addition to its digest. Cloning
/// shares the identity, so a store's `modify` can rebind every clone of one
/// handle at once while leaving other handles that happen to carry the same
/// digest untouched. The referenced content itself is immutable for the
/// lifetime of a digest.
///
/// Equality, ordering, and hashing use a snapshot of the current target;
/// do not rebind a `Ref` that is in use as a map key.
#[derive(Debug, Clone)]
pub struct Ref {
    target: Arc<RwLock<RefTarget>>,
}

#[derive(Debug, Clone)]
struct RefTarget {
    type_key: TypeKey,
    digest: Digest,
}

impl Ref {
    /// Create a reference to `digest`, typed as `type_key`.
    #[must_use]
    pub fn new(type_key: TypeKey, digest: Digest) -> Self {
        Self {
            target: Arc::new(RwLock::new(RefTarget { type_key, digest })),
        }
    }

    /// The type of the referenced resource.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        self.read().type_key.clone()
    }

    /// The current target digest.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.read().digest.clone()
    }

    /// Point this identity (and every clone of it) at a new digest.
    ///
    /// This is the primitive behind a store's `modify` scope; it does not
    /// touch other `Ref` identities that carry the same prior digest.
    pub fn rebind(&self, digest: Digest) {
        self.target.write().expect("ref lock poisoned").digest = digest;
    }

    /// A fresh identity with the same current target.
    ///
    /// The detached handle is unaffected by later `rebind`s of `self`.
    #[must_use]
    pub fn detach(&self) -> Ref {
        let t = self.read();
        Ref::new(t.type_key.clone(), t.digest.clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RefTarget> {
        self.target.read().expect("ref lock poisoned")
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        let a = self.read();
        let b = other.read();
        a.digest == b.digest && a.type_key == b.type_key
    }
}

impl Eq for Ref {}

impl Hash for Ref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let t = self.read();
        t.type_key.hash(state);
        t.digest.hash(state);
    }
}

impl PartialOrd for Ref {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ref {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.read();
        let b = other.read();
        a.digest
            .cmp(&b.digest)
            .then_with(|| a.type_key.cmp(&b.type_key))
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.read();
        write!(f, "{}@{}", t.type_key.name, t.digest.short())
    }
}
