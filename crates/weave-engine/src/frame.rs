// SPDX-License-Identifier: MIT OR Apache-2.0
//! The synchronous invocation frame: child-call interception, replay
//! matching, and error journaling.

use crate::invokable::{CallError, CallErrorKind, Invokable};
use crate::journal::{InputRequest, Invocation, Node, NodeResponse, ReplayOverride};
use crate::{Engine, EngineError};
use std::collections::VecDeque;
use tracing::debug;
use weave_core::{Digest, Ref, TypeKey, Value};
use weave_store::{Store, StoreError};

/// Execution context handed to a synchronous invokable body.
///
/// Nested invokable calls go through [`Frame::call`], which journals a
/// child node per call and, during replay, serves matching recorded
/// children from the journal instead of running their bodies.
#[derive(Debug)]
pub struct Frame<'e> {
    engine: &'e Engine,
    recorded: VecDeque<Node>,
    children: Vec<Node>,
    overrides: &'e ReplayOverride,
}

impl<'e> Frame<'e> {
    /// The engine this frame executes under.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.engine
    }

    /// The store every journal edge is committed to.
    #[must_use]
    pub fn store(&self) -> &Store {
        self.engine.store()
    }

    /// Invoke `invokable` as a journaled child of the current call.
    ///
    /// During replay this consumes the next recorded child: a digest match
    /// with a recorded output returns that output without running the
    /// body, a match without one re-executes against the child's own
    /// recording, and a mismatch raises [`EngineError::Replay`].
    ///
    /// # Errors
    ///
    /// Returns what the child raised (marked as propagated), type
    /// mismatches against declared input/output types, and engine
    /// failures.
    pub fn call(&mut self, invokable: &dyn Invokable, input: Value) -> Result<Value, CallError> {
        check_declared(
            invokable.input_type(),
            &input,
            "input",
            invokable.type_name(),
        )?;
        let store = self.engine.store().clone();
        let invokable_ref = store
            .commit(invokable.as_resource())
            .map_err(EngineError::Store)?;
        let input_ref = commit_value_opt(&store, &input).map_err(EngineError::Store)?;

        if let Some(recorded) = self.recorded.pop_front() {
            if recorded.invokable.digest() != invokable_ref.digest()
                || digest_of(&recorded.input) != digest_of(&input_ref)
            {
                return Err(EngineError::Replay {
                    expected: describe_call(&recorded.invokable, recorded.input.as_ref()),
                    got: describe_call(&invokable_ref, input_ref.as_ref()),
                }
                .into());
            }
            match recorded.response.as_ref().and_then(|r| r.output.clone()) {
                Some(output_ref) => {
                    debug!(target: "weave.engine", call = %invokable_ref, "served from journal");
                    let value = store.checkout_value(&output_ref).map_err(EngineError::Store)?;
                    self.children.push(recorded);
                    Ok(value)
                }
                // Recorded raise or pruned node: re-execute the body with
                // its recording, so an override can answer at the raise
                // site and a deterministic body re-raises the same error.
                None => self.run_child(invokable, input, invokable_ref, input_ref, recorded.children),
            }
        } else {
            self.run_child(invokable, input, invokable_ref, input_ref, Vec::new())
        }
    }

    /// Ask for an input of type `requested`.
    ///
    /// When a replay override answers this exact request, the answer is
    /// returned and the body continues; otherwise the request travels up
    /// as a suspension, the engine journals it, and `invoke` returns a
    /// suspended invocation.
    ///
    /// # Errors
    ///
    /// Returns [`CallErrorKind::Input`] carrying the request.
    pub fn request_input(
        &mut self,
        requested: TypeKey,
        for_resource: Option<Ref>,
        context: Value,
    ) -> Result<Value, CallError> {
        let request = InputRequest {
            requested,
            for_resource,
            context,
        };
        let request_ref = self
            .engine
            .store()
            .commit(&request)
            .map_err(EngineError::Store)?;
        if let Some(answer) = self.overrides.resolve(&request_ref.digest()) {
            debug!(target: "weave.engine", request = %request_ref, "input request answered by override");
            return Ok(answer);
        }
        Err(CallError::from_kind(CallErrorKind::Input(request), false))
    }

    fn run_child(
        &mut self,
        invokable: &dyn Invokable,
        input: Value,
        invokable_ref: Ref,
        input_ref: Option<Ref>,
        recorded: Vec<Node>,
    ) -> Result<Value, CallError> {
        let store = self.engine.store().clone();
        let mut child = Frame {
            engine: self.engine,
            recorded: recorded.into(),
            children: Vec::new(),
            overrides: self.overrides,
        };
        let result = invokable.call(&mut child, input);
        if result.is_ok() {
            if let Some(leftover) = child.recorded.front() {
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
            children: child.children,
        };
        let sealed = seal_node(
            &store,
            invokable.type_name(),
            invokable.output_type(),
            &mut node,
            result,
            self.overrides,
        );
        self.children.push(node);
        sealed
    }
}

/// Journal a body's result into `node` and translate the error for the
/// parent: outputs commit (including null), input requests and raised
/// errors commit and may be substituted by an override, engine errors
/// pass through untouched.
pub(crate) fn seal_node(
    store: &Store,
    invokable_name: &str,
    declared_output: Option<TypeKey>,
    node: &mut Node,
    result: Result<Value, CallError>,
    overrides: &ReplayOverride,
) -> Result<Value, CallError> {
    match result {
        Ok(output) => {
            check_declared(declared_output, &output, "output", invokable_name)?;
            let output_ref = store.commit_value(&output).map_err(EngineError::Store)?;
            node.response = Some(NodeResponse {
                output: Some(output_ref),
                raised: None,
                raised_here: false,
            });
            Ok(output)
        }
        Err(err) => {
            let (kind, propagated) = err.into_parts();
            match kind {
                CallErrorKind::Engine(engine_err) => Err(engine_err.into()),
                CallErrorKind::Input(request) => {
                    let raised_ref = store.commit(&request).map_err(EngineError::Store)?;
                    if let Some(value) = overrides.resolve(&raised_ref.digest()) {
                        let output_ref =
                            store.commit_value(&value).map_err(EngineError::Store)?;
                        node.response = Some(NodeResponse {
                            output: Some(output_ref),
                            raised: None,
                            raised_here: false,
                        });
                        Ok(value)
                    } else {
                        node.response = Some(NodeResponse {
                            output: None,
                            raised: Some(raised_ref),
                            raised_here: !propagated,
                        });
                        Err(CallError::from_kind(CallErrorKind::Input(request), true))
                    }
                }
                CallErrorKind::Raised(raised) => {
                    let raised_ref = store.commit(&raised).map_err(EngineError::Store)?;
                    if let Some(value) = overrides.resolve(&raised_ref.digest()) {
                        let output_ref =
                            store.commit_value(&value).map_err(EngineError::Store)?;
                        node.response = Some(NodeResponse {
                            output: Some(output_ref),
                            raised: None,
                            raised_here: false,
                        });
                        Ok(value)
                    } else {
                        node.response = Some(NodeResponse {
                            output: None,
                            raised: Some(raised_ref),
                            raised_here: !propagated,
                        });
                        Err(CallError::from_kind(CallErrorKind::Raised(raised), true))
                    }
                }
            }
        }
    }
}

/// Run one root call, either fresh (`recorded` empty) or as a replay.
pub(crate) fn run_root(
    engine: &Engine,
    invokable: &dyn Invokable,
    input: Value,
    recorded: Vec<Node>,
    overrides: &ReplayOverride,
) -> Result<Invocation, EngineError> {
    check_declared(
        invokable.input_type(),
        &input,
        "input",
        invokable.type_name(),
    )?;
    let store = engine.store().clone();
    let invokable_ref = store.commit(invokable.as_resource())?;
    let input_ref = commit_value_opt(&store, &input)?;
    debug!(target: "weave.engine", invokable = %invokable_ref, replaying = !recorded.is_empty(), "invoke");

    // Bodies may use the ambient-store helpers while the call runs.
    let scope = store.enter();
    let mut frame = Frame {
        engine,
        recorded: recorded.into(),
        children: Vec::new(),
        overrides,
    };
    let result = invokable.call(&mut frame, input);
    if result.is_ok() {
        if let Some(leftover) = frame.recorded.front() {
            return Err(EngineError::Replay {
                expected: describe_call(&leftover.invokable, leftover.input.as_ref()),
                got: describe_return(&invokable_ref),
            });
        }
    }
    let children = frame.children;
    drop(scope);

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
        overrides,
    ) {
        Ok(_) => Ok(Invocation::new(store, node)),
        Err(err) => {
            let (kind, _) = err.into_parts();
            match kind {
                // Infrastructure failures abort; the partial journal is
                // discarded.
                CallErrorKind::Engine(engine_err) => Err(engine_err),
                // Suspensions and user failures are part of the journal.
                CallErrorKind::Input(_) | CallErrorKind::Raised(_) => {
                    Ok(Invocation::new(store, node))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Commit a value unless it is null; null maps to an absent reference.
pub(crate) fn commit_value_opt(store: &Store, value: &Value) -> Result<Option<Ref>, StoreError> {
    match value {
        Value::Null => Ok(None),
        other => Ok(Some(store.commit_value(other)?)),
    }
}

pub(crate) fn digest_of(r: &Option<Ref>) -> Option<Digest> {
    r.as_ref().map(Ref::digest)
}

/// Describe a body that returned while recorded calls were still queued.
pub(crate) fn describe_return(invokable: &Ref) -> String {
    format!(
        "completion of {}@{}",
        invokable.type_key().name,
        invokable.digest()
    )
}

/// Describe a call for replay-divergence messages: the invokable and the
/// full input digest, so both sides of a mismatch are nameable.
pub(crate) fn describe_call(invokable: &Ref, input: Option<&Ref>) -> String {
    let input = input
        .map(|r| r.digest().to_string())
        .unwrap_or_else(|| "null".to_string());
    format!(
        "{}@{} with input {input}",
        invokable.type_key().name,
        invokable.digest()
    )
}

/// Enforce a declared input/output type against a value.
pub(crate) fn check_declared(
    declared: Option<TypeKey>,
    value: &Value,
    direction: &'static str,
    invokable: &str,
) -> Result<(), EngineError> {
    let Some(expected) = declared else {
        return Ok(());
    };
    let found = match value {
        Value::Resource(r) => Some(TypeKey::from_name(r.type_name())),
        Value::Ref(r) => Some(r.type_key()),
        _ => None,
    };
    match found {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(EngineError::InvokableType {
            invokable: invokable.to_string(),
            direction,
            expected: expected.name,
            found: actual.name,
        }),
        None => Err(EngineError::InvokableType {
            invokable: invokable.to_string(),
            direction,
            expected: expected.name,
            found: value.kind().to_string(),
        }),
    }
}
