// SPDX-License-Identifier: MIT OR Apache-2.0
//! The backend plug-in contract and the in-memory backend.

use crate::StoreError;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use weave_core::{Digest, Packed};

/// Storage plug-in surface: an associative set of packed resources keyed
/// by digest.
///
/// Implementations must be idempotent for equal content, atomic per
/// digest, and safe under concurrent commits of equal content. Distinct
/// content never shares a digest (that is the hash's job); backends may
/// assume a digest's content never changes.
pub trait Backend: fmt::Debug + Send + Sync {
    /// File `packed` under `digest`. A no-op when the digest is present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on storage failure.
    fn commit(&self, digest: &Digest, packed: &Packed) -> Result<(), StoreError>;

    /// Returns `true` if the digest is present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on storage failure.
    fn has(&self, digest: &Digest) -> Result<bool, StoreError>;

    /// Fetch the packed resource under `digest`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on storage failure.
    fn get(&self, digest: &Digest) -> Result<Option<Packed>, StoreError>;
}

/// Backend that keeps every packed resource in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<Digest, Packed>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct digests held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().expect("backend lock poisoned").len()
    }

    /// Returns `true` if nothing has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Backend for MemoryBackend {
    fn commit(&self, digest: &Digest, packed: &Packed) -> Result<(), StoreError> {
        let mut objects = self.objects.write().expect("backend lock poisoned");
        objects
            .entry(digest.clone())
            .or_insert_with(|| packed.clone());
        Ok(())
    }

    fn has(&self, digest: &Digest) -> Result<bool, StoreError> {
        Ok(self
            .objects
            .read()
            .expect("backend lock poisoned")
            .contains_key(digest))
    }

    fn get(&self, digest: &Digest) -> Result<Option<Packed>, StoreError> {
        Ok(self
            .objects
            .read()
            .expect("backend lock poisoned")
            .get(digest)
            .cloned())
    }
}
