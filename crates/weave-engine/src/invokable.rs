// SPDX-License-Identifier: MIT OR Apache-2.0
//! The invokable contracts and the call-level error channel.

use crate::concurrent::TaskFrame;
use crate::frame::Frame;
use crate::journal::{InputRequest, Raised};
use crate::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use weave_core::{CoreError, Digest, FieldMap, Ref, Registry, Resource, ResourceType, TypeKey, Value, unpack_value};
use weave_store::{Store, StoreError};

/// A resource that can be called.
///
/// An invokable is plain committed data plus behavior: the engine commits
/// the instance, runs `call` with a [`Frame`] for journaled sub-calls, and
/// records the outcome. Declared input/output types, when present, are
/// enforced at call and invoke time.
pub trait Invokable: Resource {
    /// The instance as a plain resource, for committing.
    ///
    /// Implementations return `self`.
    fn as_resource(&self) -> &dyn Resource;

    /// Declared input resource type, if any.
    fn input_type(&self) -> Option<TypeKey> {
        None
    }

    /// Declared output resource type, if any.
    fn output_type(&self) -> Option<TypeKey> {
        None
    }

    /// Run the invokable's body.
    ///
    /// Nested invokable calls must go through `cx` so the engine can
    /// journal them; suspension and failures travel through [`CallError`].
    ///
    /// # Errors
    ///
    /// Whatever the body raises, plus [`CallError`] conversions from the
    /// frame's own operations.
    fn call(&self, cx: &mut Frame<'_>, input: Value) -> Result<Value, CallError>;
}

/// The cooperative-async variant of [`Invokable`].
///
/// The contract is identical except that the body may suspend at await
/// points and may run sub-invocations concurrently, provided all of them
/// complete before the body returns.
#[async_trait]
pub trait AsyncInvokable: Resource {
    /// The instance as a plain resource, for committing.
    fn as_resource(&self) -> &dyn Resource;

    /// Declared input resource type, if any.
    fn input_type(&self) -> Option<TypeKey> {
        None
    }

    /// Declared output resource type, if any.
    fn output_type(&self) -> Option<TypeKey> {
        None
    }

    /// Run the invokable's body on the cooperative scheduler.
    ///
    /// # Errors
    ///
    /// As [`Invokable::call`].
    async fn call(&self, cx: TaskFrame, input: Value) -> Result<Value, CallError>;
}

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

/// What a `call` body raised.
#[derive(Debug)]
pub enum CallErrorKind {
    /// A cooperative suspension: the body wants an input it does not have.
    Input(InputRequest),
    /// A user-level failure, journaled as a [`Raised`] resource.
    Raised(Raised),
    /// An engine-infrastructure failure; never journaled, always re-raised.
    Engine(EngineError),
}

/// Error channel for invokable bodies.
///
/// The engine journals `Input` and `Raised` kinds into the invocation tree
/// and lets `Engine` kinds abort the whole invocation. The propagation
/// flag records whether the error originated in the current body or
/// arrived from a child call; the journal's `raised_here` is derived from
/// it.
#[derive(Debug)]
pub struct CallError {
    kind: CallErrorKind,
    propagated: bool,
}

impl CallError {
    /// Raise a user-level error with a short machine kind and a message.
    #[must_use]
    pub fn raise(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Raised(Raised::new(kind, message)),
            propagated: false,
        }
    }

    pub(crate) fn from_kind(kind: CallErrorKind, propagated: bool) -> Self {
        Self { kind, propagated }
    }

    /// The raised payload.
    #[must_use]
    pub fn kind(&self) -> &CallErrorKind {
        &self.kind
    }

    /// Returns `true` for an input-request suspension.
    #[must_use]
    pub fn is_input_request(&self) -> bool {
        matches!(self.kind, CallErrorKind::Input(_))
    }

    /// Returns `true` if the error arrived from a child call rather than
    /// originating in the current body.
    #[must_use]
    pub fn propagated_from_child(&self) -> bool {
        self.propagated
    }

    pub(crate) fn into_parts(self) -> (CallErrorKind, bool) {
        (self.kind, self.propagated)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CallErrorKind::Input(request) => {
                write!(f, "input requested: {}", request.requested)
            }
            CallErrorKind::Raised(raised) => write!(f, "{raised}"),
            CallErrorKind::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CallErrorKind::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for CallError {
    fn from(err: EngineError) -> Self {
        Self::from_kind(CallErrorKind::Engine(err), false)
    }
}

// A store failure inside a body is a user-level failure: it is captured
// into the journal like any other raised error.
impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        Self::from_kind(
            CallErrorKind::Raised(Raised::new("store", err.to_string())),
            false,
        )
    }
}

impl From<CoreError> for CallError {
    fn from(err: CoreError) -> Self {
        Self::from_kind(
            CallErrorKind::Raised(Raised::new("resource", err.to_string())),
            false,
        )
    }
}

// ---------------------------------------------------------------------------
// InvokableSet
// ---------------------------------------------------------------------------

type SyncCtor = Arc<dyn Fn(FieldMap) -> Result<Arc<dyn Invokable>, CoreError> + Send + Sync>;
type AsyncCtor = Arc<dyn Fn(FieldMap) -> Result<Arc<dyn AsyncInvokable>, CoreError> + Send + Sync>;

#[derive(Default)]
struct SetInner {
    sync_ctors: HashMap<Digest, SyncCtor>,
    async_ctors: HashMap<Digest, AsyncCtor>,
}

/// Named constructors for reconstructing invokables from their committed
/// form, used by replay (for the root) and by adapters (for routing).
///
/// Registering an invokable type also ensures its resource type is bound
/// in the given registry.
#[derive(Clone, Default)]
pub struct InvokableSet {
    inner: Arc<RwLock<SetInner>>,
}

impl fmt::Debug for InvokableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("invokable set lock poisoned");
        f.debug_struct("InvokableSet")
            .field("sync", &inner.sync_ctors.len())
            .field("async", &inner.async_ctors.len())
            .finish()
    }
}

impl InvokableSet {
    /// Bind a synchronous invokable type.
    pub fn register<T>(&self, registry: &Registry) -> TypeKey
    where
        T: Invokable + ResourceType + 'static,
    {
        let key = registry.ensure::<T>();
        self.inner
            .write()
            .expect("invokable set lock poisoned")
            .sync_ctors
            .insert(
                key.digest.clone(),
                Arc::new(|fields| Ok(Arc::new(T::from_fields(fields)?) as Arc<dyn Invokable>)),
            );
        key
    }

    /// Bind a cooperative-async invokable type.
    pub fn register_async<T>(&self, registry: &Registry) -> TypeKey
    where
        T: AsyncInvokable + ResourceType + 'static,
    {
        let key = registry.ensure::<T>();
        self.inner
            .write()
            .expect("invokable set lock poisoned")
            .async_ctors
            .insert(
                key.digest.clone(),
                Arc::new(|fields| {
                    Ok(Arc::new(T::from_fields(fields)?) as Arc<dyn AsyncInvokable>)
                }),
            );
        key
    }

    pub(crate) fn resolve(
        &self,
        store: &Store,
        r: &Ref,
    ) -> Result<Arc<dyn Invokable>, EngineError> {
        let key = r.type_key();
        let ctor = self
            .inner
            .read()
            .expect("invokable set lock poisoned")
            .sync_ctors
            .get(&key.digest)
            .cloned()
            .ok_or(EngineError::UnknownInvokable {
                name: key.name.clone(),
            })?;
        Ok(ctor(checkout_fields(store, r)?)?)
    }

    pub(crate) fn resolve_async(
        &self,
        store: &Store,
        r: &Ref,
    ) -> Result<Arc<dyn AsyncInvokable>, EngineError> {
        let key = r.type_key();
        let ctor = self
            .inner
            .read()
            .expect("invokable set lock poisoned")
            .async_ctors
            .get(&key.digest)
            .cloned()
            .ok_or(EngineError::UnknownInvokable {
                name: key.name.clone(),
            })?;
        Ok(ctor(checkout_fields(store, r)?)?)
    }
}

fn checkout_fields(store: &Store, r: &Ref) -> Result<FieldMap, EngineError> {
    let packed = store.checkout_packed(r)?;
    let mut fields = FieldMap::new();
    for (name, value) in &packed.fields {
        fields.insert(name.clone(), unpack_value(value, store.registry())?);
    }
    Ok(fields)
}
