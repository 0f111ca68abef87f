// SPDX-License-Identifier: MIT OR Apache-2.0
//! weave-engine
//!
//! Journaled execution of invokables.
//!
//! An [`Engine`] wraps one store. [`Engine::invoke`] runs an
//! [`Invokable`], recording the tree of nested calls as an
//! [`Invocation`]: every child call's request, its output or raised
//! error, and its children, ordered by call completion. The journal can
//! be [rewound](Invocation::rewind) and [replayed](Invocation::replay),
//! re-using recorded outputs wherever the re-executed call sequence
//! matches the record, and an [`InvocationGenerator`] drives replay
//! through interactive input requests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The cooperative-async engine.
pub mod concurrent;
/// The synchronous invocation frame.
pub mod frame;
/// Pull-style driver over input requests.
pub mod generator;
/// The invokable contracts.
pub mod invokable;
/// Journal resources, the invocation tree, rewind, and replay.
pub mod journal;

pub use concurrent::{TaskFrame, gather};
pub use frame::Frame;
pub use generator::InvocationGenerator;
pub use invokable::{AsyncInvokable, CallError, CallErrorKind, Invokable, InvokableSet};
pub use journal::{
    InputRequest, Invocation, InvocationRecord, Node, Outcome, Raised, ReplayOverride, Request,
    Response,
};

use std::sync::Arc;
use weave_core::{CoreError, Ref, ResourceType, TypeKey, Value};
use weave_store::{Store, StoreError};

/// Errors surfaced by the invocation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Replay detected a divergence between the recorded and current call
    /// sequence.
    #[error("replay diverged: expected {expected} but got {got}")]
    Replay {
        /// The recorded call signature.
        expected: String,
        /// The re-executed call signature.
        got: String,
    },

    /// An async child was still pending when its parent returned.
    #[error("a sub-invocation was still pending when its parent call returned")]
    IncompleteSubinvocation,

    /// A declared input or output type was violated.
    #[error("invokable {invokable} expected {expected} as {direction}, found {found}")]
    InvokableType {
        /// The invokable whose declaration was violated.
        invokable: String,
        /// `"input"` or `"output"`.
        direction: &'static str,
        /// The declared type name.
        expected: String,
        /// What actually arrived.
        found: String,
    },

    /// The generator was iterated with an unanswered input request.
    #[error("an input request is pending; call set_input before iterating")]
    InputRequired,

    /// `set_input` was called with no request pending.
    #[error("no input request is pending")]
    NoPendingRequest,

    /// Replay needed an invokable type that was never registered.
    #[error("no invokable registered for type {name}")]
    UnknownInvokable {
        /// The missing type name.
        name: String,
    },

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A resource-model operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// The invocation engine: one store plus the invokable constructors
/// needed to re-enter committed journals.
///
/// Cloning is cheap and shares both.
#[derive(Debug, Clone)]
pub struct Engine {
    store: Store,
    invokables: InvokableSet,
}

impl Engine {
    /// Create an engine over a store, binding the journal's builtin
    /// resource types into the store's registry.
    #[must_use]
    pub fn new(store: Store) -> Self {
        let registry = store.registry();
        registry.ensure::<Request>();
        registry.ensure::<Response>();
        registry.ensure::<InvocationRecord>();
        registry.ensure::<InputRequest>();
        registry.ensure::<Raised>();
        Self {
            store,
            invokables: InvokableSet::default(),
        }
    }

    /// The engine's store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The invokable constructor table.
    #[must_use]
    pub fn invokables(&self) -> &InvokableSet {
        &self.invokables
    }

    /// Register a synchronous invokable type, so replay can reconstruct
    /// committed instances of it.
    pub fn register<T>(&self) -> TypeKey
    where
        T: Invokable + ResourceType + 'static,
    {
        self.invokables.register::<T>(self.store.registry())
    }

    /// Register a cooperative-async invokable type.
    pub fn register_async<T>(&self) -> TypeKey
    where
        T: AsyncInvokable + ResourceType + 'static,
    {
        self.invokables.register_async::<T>(self.store.registry())
    }

    /// Journaled execution of `invokable`.
    ///
    /// Returns the journal in all user-visible cases; inspect
    /// [`Invocation::outcome`] for `Completed`, `Suspended`, or `Failed`.
    /// Only engine-infrastructure failures surface as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvokableType`] on declared-type
    /// violations and store failures from journaling.
    pub fn invoke(&self, invokable: &dyn Invokable, input: Value) -> Result<Invocation, EngineError> {
        let overrides = ReplayOverride::default();
        frame::run_root(self, invokable, input, Vec::new(), &overrides)
    }

    pub(crate) fn resolve_invokable(&self, r: &Ref) -> Result<Arc<dyn Invokable>, EngineError> {
        self.invokables.resolve(&self.store, r)
    }

    pub(crate) fn resolve_async_invokable(
        &self,
        r: &Ref,
    ) -> Result<Arc<dyn AsyncInvokable>, EngineError> {
        self.invokables.resolve_async(&self.store, r)
    }
}
