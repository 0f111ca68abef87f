// SPDX-License-Identifier: MIT OR Apache-2.0
//! weave
//!
//! Facade over the Weave workspace: structurally-typed resources in a
//! content-addressed store, plus a journaled invocation engine whose
//! executions can be inspected, rewound, mutated, and replayed.
//!
//! Most users want the member crates directly:
//!
//! - [`weave_core`] — values, resources, canonical packing, digests;
//! - [`weave_store`] — backends, commit/checkout, store scopes;
//! - [`weave_engine`] — invokables, journals, rewind and replay;
//! - [`weave_host`] — the HTTP adapter.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use {weave_core, weave_engine, weave_host, weave_store};

pub use weave_core::{Digest, Ref, Registry, Resource, ResourceType, TypeKey, Value, ValueCell};
pub use weave_engine::{
    AsyncInvokable, CallError, Engine, Frame, Invocation, InvocationGenerator, Invokable, Outcome,
    TaskFrame,
};
pub use weave_store::Store;
