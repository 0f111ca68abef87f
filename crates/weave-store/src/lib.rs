// SPDX-License-Identifier: MIT OR Apache-2.0
//! weave-store
//!
//! Content-addressed storage for Weave resources.
//!
//! A [`Store`] layers commit/checkout over one [`Backend`] and one
//! [`Registry`]. Committing packs a resource, hashes the canonical bytes,
//! and files the packed form under its digest; checkout reverses the trip
//! through the registry. Both are deterministic and idempotent, so a
//! digest names the same content for its whole lifetime and re-commits
//! are no-ops.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The backend plug-in contract and the in-memory backend.
pub mod backend;
/// The one-file-per-digest filesystem backend.
pub mod file;
/// The ambient active-store stack.
pub mod scope;

pub use backend::{Backend, MemoryBackend};
pub use file::FileBackend;
pub use scope::{StoreScope, active, checkout, commit};

// Re-export the core model so consumers can depend on weave-store alone.
pub use weave_core::{
    Digest, Packed, Ref, Registry, Resource, ResourceType, TypeKey, Value, ValueCell,
};

use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use weave_core::{CoreError, pack_resource, unpack_as, unpack_resource};

/// Errors surfaced by stores and backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Checkout of a digest the backend does not hold.
    #[error("resource {digest} not found in store")]
    NotFound {
        /// The absent digest.
        digest: Digest,
    },

    /// A scoped operation ran outside any store scope.
    #[error("no active store in this context")]
    NoActiveStore,

    /// The backend failed to read or write.
    #[error("backend I/O failed: {context}")]
    Io {
        /// What the backend was doing.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A resource-model error during pack or unpack.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// A content-addressed store: one backend plus the registry used to
/// reconstruct resources on checkout.
///
/// Cloning is cheap and shares the backend, so a store can be handed to
/// engines and adapters freely.
///
/// # Examples
///
/// ```
/// use weave_store::Store;
/// use weave_core::ValueCell;
///
/// let store = Store::in_memory();
/// let r = store.commit(&ValueCell::new(42i64)).unwrap();
/// let again = store.commit(&ValueCell::new(42i64)).unwrap();
/// assert_eq!(r.digest(), again.digest());
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    backend: Box<dyn Backend>,
    registry: Registry,
}

impl Store {
    /// A store over a fresh in-memory backend and builtin registry.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new(), Registry::with_builtins())
    }

    /// A store over a fresh in-memory backend and the given registry.
    #[must_use]
    pub fn in_memory_with(registry: Registry) -> Self {
        Self::new(MemoryBackend::new(), registry)
    }

    /// A store over the file backend rooted at `root`, with the builtin
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the root directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::new(
            FileBackend::open(root)?,
            Registry::with_builtins(),
        ))
    }

    /// A store over an arbitrary backend.
    #[must_use]
    pub fn new(backend: impl Backend + 'static, registry: Registry) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(backend),
                registry,
            }),
        }
    }

    /// The registry this store reconstructs resources with.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Pack, hash, and file a resource; returns its reference.
    ///
    /// Committing equivalent resources returns equal references, and
    /// re-committing present content is a no-op.
    ///
    /// # Errors
    ///
    /// Returns packing failures and backend I/O failures.
    pub fn commit(&self, resource: &dyn Resource) -> Result<Ref, StoreError> {
        let packed = pack_resource(resource)?;
        let digest = packed.digest()?;
        self.inner.backend.commit(&digest, &packed)?;
        debug!(target: "weave.store", kind = %packed.type_key, digest = %digest.short(), "commit");
        Ok(Ref::new(packed.type_key, digest))
    }

    /// Commit a bare value, wrapping it in a [`ValueCell`] unless it is
    /// already a resource.
    ///
    /// # Errors
    ///
    /// Same as [`Store::commit`].
    pub fn commit_value(&self, value: &Value) -> Result<Ref, StoreError> {
        match value {
            Value::Resource(r) => self.commit(r.as_ref()),
            other => self.commit(&ValueCell::new(other.clone())),
        }
    }

    /// Fetch and reconstruct the resource a reference names.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an absent digest and
    /// [`CoreError::UnknownType`] for unregistered types.
    pub fn checkout(&self, r: &Ref) -> Result<Arc<dyn Resource>, StoreError> {
        let packed = self.fetch(r)?;
        Ok(unpack_resource(&packed, &self.inner.registry)?)
    }

    /// Fetch and reconstruct a concrete resource type.
    ///
    /// # Errors
    ///
    /// As [`Store::checkout`], plus [`CoreError::WrongType`] when the
    /// stored resource is not a `T`.
    pub fn checkout_as<T: ResourceType>(&self, r: &Ref) -> Result<T, StoreError> {
        let packed = self.fetch(r)?;
        Ok(unpack_as::<T>(&packed, &self.inner.registry)?)
    }

    /// Fetch a committed value, unwrapping a [`ValueCell`] if that is what
    /// the reference names.
    ///
    /// # Errors
    ///
    /// Same as [`Store::checkout`].
    pub fn checkout_value(&self, r: &Ref) -> Result<Value, StoreError> {
        if r.type_key() == ValueCell::type_key() {
            Ok(self.checkout_as::<ValueCell>(r)?.value)
        } else {
            Ok(Value::Resource(self.checkout(r)?))
        }
    }

    /// Fetch the packed wire form a reference names, without
    /// reconstructing it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an absent digest.
    pub fn checkout_packed(&self, r: &Ref) -> Result<Packed, StoreError> {
        self.fetch(r)
    }

    /// Returns `true` if the referenced digest is present.
    ///
    /// # Errors
    ///
    /// Returns backend I/O failures.
    pub fn has(&self, r: &Ref) -> Result<bool, StoreError> {
        self.inner.backend.has(&r.digest())
    }

    /// Check out a mutable copy, run `mutate`, and on success re-commit
    /// and rebind `r`'s identity to the new digest.
    ///
    /// On error the original digest is preserved and the error propagates.
    /// Other references that carry the same prior digest are unaffected.
    ///
    /// # Errors
    ///
    /// Returns checkout/commit failures, or whatever `mutate` returns.
    pub fn modify<T, F>(&self, r: &Ref, mutate: F) -> Result<(), StoreError>
    where
        T: ResourceType,
        F: FnOnce(&mut T) -> Result<(), StoreError>,
    {
        let mut resource = self.checkout_as::<T>(r)?;
        mutate(&mut resource)?;
        let committed = self.commit(&resource)?;
        debug!(
            target: "weave.store",
            from = %r.digest().short(),
            to = %committed.digest().short(),
            "modify rebinds ref"
        );
        r.rebind(committed.digest());
        Ok(())
    }

    /// Enter this store's scope; see [`scope`].
    #[must_use]
    pub fn enter(&self) -> StoreScope {
        scope::enter(self.clone())
    }

    fn fetch(&self, r: &Ref) -> Result<Packed, StoreError> {
        let digest = r.digest();
        self.inner
            .backend
            .get(&digest)?
            .ok_or(StoreError::NotFound { digest })
    }
}
