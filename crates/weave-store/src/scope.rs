// SPDX-License-Identifier: MIT OR Apache-2.0
//! The ambient active-store stack.
//!
//! Commit and checkout sites that do not want to thread a [`Store`]
//! explicitly can target the innermost entered store of the current
//! thread. The stack is strictly per thread of control: executors that
//! migrate work across OS threads must pass the store explicitly (it is
//! `Clone + Send + Sync`) and enter it where the work runs.

use crate::{Store, StoreError};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use weave_core::{Ref, Resource, Value};

thread_local! {
    static ACTIVE: RefCell<Vec<Store>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard for one entry on the active-store stack.
///
/// Dropping the guard pops the entry. Guards are not `Send`; a scope
/// belongs to the thread that opened it.
#[must_use = "the store scope ends when this guard is dropped"]
#[derive(Debug)]
pub struct StoreScope {
    // !Send + !Sync: the guard must drop on the thread that pushed.
    _not_send: PhantomData<*const ()>,
}

pub(crate) fn enter(store: Store) -> StoreScope {
    ACTIVE.with(|stack| stack.borrow_mut().push(store));
    StoreScope {
        _not_send: PhantomData,
    }
}

impl Drop for StoreScope {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The innermost active store of the current thread.
///
/// # Errors
///
/// Returns [`StoreError::NoActiveStore`] when no scope is entered.
///
/// # Examples
///
/// ```
/// use weave_store::{Store, active};
///
/// let store = Store::in_memory();
/// assert!(active().is_err());
/// let _scope = store.enter();
/// assert!(active().is_ok());
/// ```
pub fn active() -> Result<Store, StoreError> {
    ACTIVE.with(|stack| stack.borrow().last().cloned().ok_or(StoreError::NoActiveStore))
}

/// Commit a resource to the active store.
///
/// # Errors
///
/// Returns [`StoreError::NoActiveStore`] outside any scope, then commit
/// failures.
pub fn commit(resource: &dyn Resource) -> Result<Ref, StoreError> {
    active()?.commit(resource)
}

/// Check out a value from the active store.
///
/// # Errors
///
/// Returns [`StoreError::NoActiveStore`] outside any scope, then checkout
/// failures.
pub fn checkout(r: &Ref) -> Result<Value, StoreError> {
    active()?.checkout_value(r)
}

/// Commit a bare value to the active store.
///
/// # Errors
///
/// Same as [`commit`].
pub fn commit_value(value: &Value) -> Result<Ref, StoreError> {
    active()?.commit_value(value)
}

/// The resource form of [`checkout`], when the caller needs the trait
/// object rather than a value.
///
/// # Errors
///
/// Same as [`checkout`].
pub fn checkout_resource(r: &Ref) -> Result<Arc<dyn Resource>, StoreError> {
    active()?.checkout(r)
}
