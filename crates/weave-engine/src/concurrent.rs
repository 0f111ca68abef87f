// SPDX-License-Identifier: MIT OR Apache-2.0
//! The cooperative-async engine.
//!
//! Same journal, two extra rules: children are recorded in completion
//! order even when several are in flight at once, and every child started
//! by a body must complete before that body returns. A child future that
//! is still alive when its parent returns fails the invocation with
//! [`EngineError::IncompleteSubinvocation`].

use crate::frame::{
    check_declared, commit_value_opt, describe_call, describe_return, digest_of, seal_node,
};
use crate::invokable::{AsyncInvokable, CallError, CallErrorKind};
use crate::journal::{InputRequest, Invocation, Node, ReplayOverride};
use crate::{Engine, EngineError};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use weave_core::{Ref, TypeKey, Value};
use weave_store::Store;

#[derive(Default)]
struct TaskState {
    /// Recorded children available for replay matching; consumed slots
    /// become `None`.
    recorded: Vec<Option<Node>>,
    /// Rebuilt children, pushed at completion.
    children: Vec<Node>,
    /// Child futures created and not yet finished or dropped.
    in_flight: usize,
}

struct TaskInner {
    engine: Engine,
    overrides: ReplayOverride,
    state: Mutex<TaskState>,
}

/// Execution context handed to a cooperative-async invokable body.
///
/// Clones share one frame, so a body can start several children (e.g.
/// via [`gather`]) and await them in any order; the journal records them
/// in the order their calls complete.
#[derive(Clone)]
pub struct TaskFrame {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for TaskFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("TaskFrame")
            .field("children", &state.children.len())
            .field("in_flight", &state.in_flight)
            .finish()
    }
}

/// Decrements the in-flight count when a child future finishes or is
/// dropped.
struct InFlight {
    frame: TaskFrame,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.frame.state().in_flight -= 1;
    }
}

impl TaskFrame {
    fn new(engine: Engine, recorded: Vec<Node>, overrides: ReplayOverride) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                engine,
                overrides,
                state: Mutex::new(TaskState {
                    recorded: recorded.into_iter().map(Some).collect(),
                    children: Vec::new(),
                    in_flight: 0,
                }),
            }),
        }
    }

    /// The engine this frame executes under.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// The store every journal edge is committed to.
    #[must_use]
    pub fn store(&self) -> &Store {
        self.inner.engine.store()
    }

    /// Invoke `invokable` as a journaled child of the current call.
    ///
    /// The returned future is `'static` and counts as in flight from the
    /// moment it is created, so a child handed to a task spawner and
    /// abandoned is detected when the parent returns. Awaiting it inline
    /// behaves exactly like the synchronous frame.
    ///
    /// # Errors
    ///
    /// As the synchronous [`Frame::call`](crate::Frame::call), with replay
    /// matching over the first unconsumed recorded child whose digests
    /// match (children are completion-ordered, so matching cannot be
    /// positional under concurrency).
    pub fn call(
        &self,
        invokable: Arc<dyn AsyncInvokable>,
        input: Value,
    ) -> impl Future<Output = Result<Value, CallError>> + Send + 'static {
        let frame = self.clone();
        frame.state().in_flight += 1;
        let guard = InFlight {
            frame: frame.clone(),
        };
        async move {
            let _guard = guard;
            frame.call_inner(invokable, input).await
        }
    }

    /// Ask for an input of type `requested`; see
    /// [`Frame::request_input`](crate::Frame::request_input).
    ///
    /// # Errors
    ///
    /// Returns the input request as a suspension unless an override
    /// answers it.
    pub fn request_input(
        &self,
        requested: TypeKey,
        for_resource: Option<Ref>,
        context: Value,
    ) -> Result<Value, CallError> {
        let request = InputRequest {
            requested,
            for_resource,
            context,
        };
        let request_ref = self.store().commit(&request).map_err(EngineError::Store)?;
        if let Some(answer) = self.inner.overrides.resolve(&request_ref.digest()) {
            return Ok(answer);
        }
        Err(CallError::from_kind(CallErrorKind::Input(request), false))
    }

    async fn call_inner(
        self,
        invokable: Arc<dyn AsyncInvokable>,
        input: Value,
    ) -> Result<Value, CallError> {
        check_declared(
            invokable.input_type(),
            &input,
            "input",
            invokable.type_name(),
        )?;
        let store = self.store().clone();
        let invokable_ref = store
            .commit(invokable.as_resource())
            .map_err(EngineError::Store)?;
        let input_ref = commit_value_opt(&store, &input).map_err(EngineError::Store)?;

        let matched = {
            let mut state = self.state();
            let mut found = None;
            for slot in state.recorded.iter_mut() {
                let matches = slot.as_ref().is_some_and(|rec| {
                    rec.invokable.digest() == invokable_ref.digest()
                        && digest_of(&rec.input) == digest_of(&input_ref)
                });
                if matches {
                    found = slot.take();
                    break;
                }
            }
            if found.is_none() {
                if let Some(expected) = state.recorded.iter().flatten().next() {
                    return Err(EngineError::Replay {
                        expected: describe_call(&expected.invokable, expected.input.as_ref()),
                        got: describe_call(&invokable_ref, input_ref.as_ref()),
                    }
                    .into());
                }
            }
            found
        };

        if let Some(recorded) = matched {
            match recorded.response.as_ref().and_then(|r| r.output.clone()) {
                Some(output_ref) => {
                    let value = store.checkout_value(&output_ref).map_err(EngineError::Store)?;
                    self.state().children.push(recorded);
                    Ok(value)
                }
                None => {
                    self.run_child(invokable, input, invokable_ref, input_ref, recorded.children)
                        .await
                }
            }
        } else {
            self.run_child(invokable, input, invokable_ref, input_ref, Vec::new())
                .await
        }
    }

    async fn run_child(
        &self,
        invokable: Arc<dyn AsyncInvokable>,
        input: Value,
        invokable_ref: Ref,
        input_ref: Option<Ref>,
        recorded: Vec<Node>,
    ) -> Result<Value, CallError> {
        let store = self.store().clone();
        let child = TaskFrame::new(
            self.inner.engine.clone(),
            recorded,
            self.inner.overrides.clone(),
        );
        let result = invokable.call(child.clone(), input).await;
        let (children, in_flight, leftover) = child.drain();
        if in_flight > 0 {
            return Err(EngineError::IncompleteSubinvocation.into());
        }
        if result.is_ok() {
            if let Some(leftover) = leftover {
                return Err(EngineError::Replay {
                    expected: describe_call(&leftover.invokable, leftover.input.as_ref()),
                    got: describe_return(&invokable_ref),
                }
                .into());
            }
        }
        let mut node = Node {
            invokable: invokable_ref,
            input: input_ref,
            response: None,
            children,
        };
        let sealed = seal_node(
            &store,
            invokable.type_name(),
            invokable.output_type(),
            &mut node,
            result,
            &self.inner.overrides,
        );
        self.state().children.push(node);
        sealed
    }

    /// Take the rebuilt children, the number of child futures still
    /// alive, and the first recorded child that was never consumed.
    fn drain(&self) -> (Vec<Node>, usize, Option<Node>) {
        let mut state = self.state();
        let leftover = state.recorded.iter_mut().find_map(Option::take);
        (
            std::mem::take(&mut state.children),
            state.in_flight,
            leftover,
        )
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.inner.state.lock().expect("task frame lock poisoned")
    }
}

/// Await a batch of child calls, failing on the first error.
///
/// # Errors
///
/// Returns the first child error in completion order.
pub async fn gather<F>(calls: Vec<F>) -> Result<Vec<Value>, CallError>
where
    F: Future<Output = Result<Value, CallError>>,
{
    futures::future::join_all(calls)
        .await
        .into_iter()
        .collect()
}

// ---------------------------------------------------------------------------
// Engine entry points
// ---------------------------------------------------------------------------

impl Engine {
    /// Journaled execution of a cooperative-async invokable.
    ///
    /// # Errors
    ///
    /// As [`Engine::invoke`], plus
    /// [`EngineError::IncompleteSubinvocation`] when a child future is
    /// still alive at body return.
    pub async fn invoke_async(
        &self,
        invokable: Arc<dyn AsyncInvokable>,
        input: Value,
    ) -> Result<Invocation, EngineError> {
        self.run_root_async(invokable, input, Vec::new(), ReplayOverride::default())
            .await
    }

    pub(crate) async fn run_root_async(
        &self,
        invokable: Arc<dyn AsyncInvokable>,
        input: Value,
        recorded: Vec<Node>,
        overrides: ReplayOverride,
    ) -> Result<Invocation, EngineError> {
        check_declared(
            invokable.input_type(),
            &input,
            "input",
            invokable.type_name(),
        )?;
        let store = self.store().clone();
        let invokable_ref = store.commit(invokable.as_resource())?;
        let input_ref = commit_value_opt(&store, &input)?;
        debug!(target: "weave.engine", invokable = %invokable_ref, replaying = !recorded.is_empty(), "invoke (async)");

        let frame = TaskFrame::new(self.clone(), recorded, overrides.clone());
        let result = invokable.call(frame.clone(), input).await;
        let (children, in_flight, leftover) = frame.drain();
        if in_flight > 0 {
            return Err(EngineError::IncompleteSubinvocation);
        }
        if result.is_ok() {
            if let Some(leftover) = leftover {
                return Err(EngineError::Replay {
                    expected: describe_call(&leftover.invokable, leftover.input.as_ref()),
                    got: describe_return(&invokable_ref),
                });
            }
        }

        let mut node = Node {
            invokable: invokable_ref,
            input: input_ref,
            response: None,
            children,
        };
        match seal_node(
            &store,
            invokable.type_name(),
            invokable.output_type(),
            &mut node,
            result,
            &overrides,
        ) {
            Ok(_) => Ok(Invocation::new(store, node)),
            Err(err) => {
                let (kind, _) = err.into_parts();
                match kind {
                    CallErrorKind::Engine(engine_err) => Err(engine_err),
                    CallErrorKind::Input(_) | CallErrorKind::Raised(_) => {
                        Ok(Invocation::new(store, node))
                    }
                }
            }
        }
    }
}

impl Invocation {
    /// Async counterpart of [`Invocation::replay`].
    ///
    /// # Errors
    ///
    /// See [`Invocation::replay_async_with`].
    pub async fn replay_async(&self, engine: &Engine) -> Result<Invocation, EngineError> {
        self.replay_async_with(engine, ReplayOverride::default())
            .await
    }

    /// Async counterpart of [`Invocation::replay_with`]; the root must be
    /// registered with [`Engine::register_async`].
    ///
    /// # Errors
    ///
    /// As [`Invocation::replay_with`].
    pub async fn replay_async_with(
        &self,
        engine: &Engine,
        overrides: ReplayOverride,
    ) -> Result<Invocation, EngineError> {
        if self
            .root
            .response
            .as_ref()
            .is_some_and(|r| r.output.is_some())
        {
            return Ok(self.clone());
        }
        let invokable = engine.resolve_async_invokable(&self.root.invokable)?;
        let input = match &self.root.input {
            Some(r) => self.store.checkout_value(r)?,
            None => Value::Null,
        };
        engine
            .run_root_async(invokable, input, self.root.children.clone(), overrides)
            .await
    }
}
