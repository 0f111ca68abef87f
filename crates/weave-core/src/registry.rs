// SPDX-License-Identifier: MIT OR Apache-2.0
//! Type registration and constructor lookup.

use crate::CoreError;
use crate::digest::{Digest, TypeKey};
use crate::resource::{FieldMap, Resource, ResourceType, ValueCell};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Reconstructs a resource instance from a field map.
pub type Constructor = Arc<dyn Fn(FieldMap) -> Result<Arc<dyn Resource>, CoreError> + Send + Sync>;

struct Entry {
    key: TypeKey,
    ctor: Constructor,
}

/// Maps stable type identifiers to resource constructors.
///
/// Cloning is cheap and shares the underlying table, so a registry can be
/// handed to stores, engines, and adapters freely. A name may be bound at
/// most once per registry.
///
/// # Examples
///
/// ```
/// use weave_core::{Registry, ValueCell, ResourceType};
///
/// let registry = Registry::with_builtins();
/// assert!(registry.contains(&ValueCell::type_key()));
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<Digest, Entry>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .registered()
            .into_iter()
            .map(|k| k.name)
            .collect();
        f.debug_struct("Registry").field("types", &names).finish()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the builtin [`ValueCell`] type.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.ensure::<ValueCell>();
        registry
    }

    /// Bind a resource type's name to its constructor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeAlreadyRegistered`] if the name is already
    /// bound in this registry.
    pub fn register<T: ResourceType + 'static>(&self) -> Result<TypeKey, CoreError> {
        let key = T::type_key();
        let mut table = self.inner.write().expect("registry lock poisoned");
        if table.contains_key(&key.digest) {
            return Err(CoreError::TypeAlreadyRegistered {
                name: key.name.clone(),
            });
        }
        table.insert(
            key.digest.clone(),
            Entry {
                key: key.clone(),
                ctor: Arc::new(|fields| Ok(Arc::new(T::from_fields(fields)?) as Arc<dyn Resource>)),
            },
        );
        Ok(key)
    }

    /// Bind a resource type if it is not bound yet; the existing binding wins.
    pub fn ensure<T: ResourceType + 'static>(&self) -> TypeKey {
        let key = T::type_key();
        let mut table = self.inner.write().expect("registry lock poisoned");
        table.entry(key.digest.clone()).or_insert_with(|| Entry {
            key: key.clone(),
            ctor: Arc::new(|fields| Ok(Arc::new(T::from_fields(fields)?) as Arc<dyn Resource>)),
        });
        key
    }

    /// Look up the constructor for a type identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] when the identifier is not bound.
    pub fn lookup(&self, key: &TypeKey) -> Result<Constructor, CoreError> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .get(&key.digest)
            .map(|entry| entry.ctor.clone())
            .ok_or_else(|| CoreError::UnknownType {
                name: key.name.clone(),
                digest: key.digest.to_string(),
            })
    }

    /// Returns `true` if the identifier is bound in this registry.
    #[must_use]
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .contains_key(&key.digest)
    }

    /// All bound type keys, sorted by digest.
    #[must_use]
    pub fn registered(&self) -> Vec<TypeKey> {
        let mut keys: Vec<TypeKey> = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }
}
