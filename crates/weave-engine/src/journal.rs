// SPDX-License-Identifier: MIT OR Apache-2.0
//! The invocation journal: its committed resource types, the working
//! in-memory tree, rewind, and replay entry points.

use crate::EngineError;
use crate::{Engine, frame};
use std::collections::BTreeMap;
use std::fmt;
use weave_core::{
    CoreError, Digest, FieldMap, Ref, Resource, ResourceType, TypeKey, Value, fields,
};
use weave_store::Store;

// ---------------------------------------------------------------------------
// Journal resource types
// ---------------------------------------------------------------------------

/// One recorded call: the invokable plus its (possibly absent) input.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Reference to the committed invokable instance.
    pub invokable: Ref,
    /// Reference to the committed input, or `None` for a null input.
    pub input: Option<Ref>,
}

impl Resource for Request {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["invokable".to_string(), "input".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Ref(self.invokable.clone()), self.input.clone().into()]
    }
}

impl ResourceType for Request {
    const TYPE_NAME: &'static str = "weave.Request";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            invokable: fields::take_ref(&mut f, Self::TYPE_NAME, "invokable")?,
            input: fields::take_opt_ref(&mut f, Self::TYPE_NAME, "input")?,
        })
    }
}

/// The recorded result of a call: output or raised error, plus the
/// completion-ordered child invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The invokable that produced this response.
    pub invokable: Ref,
    /// The committed output, if the call returned.
    pub output: Option<Ref>,
    /// The committed raised resource, if the call raised.
    pub raised: Option<Ref>,
    /// `true` when the error originated in this call's own body rather
    /// than propagating from a child.
    pub raised_here: bool,
    /// Child invocations, ordered by call-completion index.
    pub children: Vec<Ref>,
}

impl Resource for Response {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec![
            "invokable".to_string(),
            "output".to_string(),
            "raised".to_string(),
            "raised_here".to_string(),
            "children".to_string(),
        ]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::Ref(self.invokable.clone()),
            self.output.clone().into(),
            self.raised.clone().into(),
            Value::Bool(self.raised_here),
            Value::List(self.children.iter().cloned().map(Value::Ref).collect()),
        ]
    }
}

impl ResourceType for Response {
    const TYPE_NAME: &'static str = "weave.Response";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        let mut children = Vec::new();
        for item in fields::take_list(&mut f, Self::TYPE_NAME, "children")? {
            match item {
                Value::Ref(r) => children.push(r),
                other => {
                    return Err(CoreError::FieldType {
                        type_name: Self::TYPE_NAME.to_string(),
                        field: "children".to_string(),
                        expected: "list of refs",
                        found: other.kind(),
                    });
                }
            }
        }
        Ok(Self {
            invokable: fields::take_ref(&mut f, Self::TYPE_NAME, "invokable")?,
            output: fields::take_opt_ref(&mut f, Self::TYPE_NAME, "output")?,
            raised: fields::take_opt_ref(&mut f, Self::TYPE_NAME, "raised")?,
            raised_here: fields::take_bool(&mut f, Self::TYPE_NAME, "raised_here")?,
            children,
        })
    }
}

/// The committed form of one node in an invocation tree.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRecord {
    /// The node's request.
    pub request: Ref,
    /// The node's response, absent while the call has not executed.
    pub response: Option<Ref>,
}

impl Resource for InvocationRecord {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["request".to_string(), "response".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Ref(self.request.clone()), self.response.clone().into()]
    }
}

impl ResourceType for InvocationRecord {
    const TYPE_NAME: &'static str = "weave.Invocation";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            request: fields::take_ref(&mut f, Self::TYPE_NAME, "request")?,
            response: fields::take_opt_ref(&mut f, Self::TYPE_NAME, "response")?,
        })
    }
}

/// A cooperative suspension: the body asked for an input it does not have.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRequest {
    /// The resource type the body wants.
    pub requested: TypeKey,
    /// The resource the input is for, when there is one.
    pub for_resource: Option<Ref>,
    /// Free-form context shown to whoever answers, e.g. a question.
    pub context: Value,
}

impl Resource for InputRequest {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec![
            "requested".to_string(),
            "for_resource".to_string(),
            "context".to_string(),
        ]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::Type(self.requested.clone()),
            self.for_resource.clone().into(),
            self.context.clone(),
        ]
    }
}

impl ResourceType for InputRequest {
    const TYPE_NAME: &'static str = "weave.InputRequest";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            requested: fields::take_type(&mut f, Self::TYPE_NAME, "requested")?,
            for_resource: fields::take_opt_ref(&mut f, Self::TYPE_NAME, "for_resource")?,
            context: fields::take(&mut f, Self::TYPE_NAME, "context")?,
        })
    }
}

/// A user-level error captured into the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct Raised {
    /// Short machine-readable kind, e.g. `"store"` or `"dice"`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl Raised {
    /// Build a raised error.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Raised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Resource for Raised {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["kind".to_string(), "message".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::Str(self.kind.clone()),
            Value::Str(self.message.clone()),
        ]
    }
}

impl ResourceType for Raised {
    const TYPE_NAME: &'static str = "weave.Raised";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            kind: fields::take_str(&mut f, Self::TYPE_NAME, "kind")?,
            message: fields::take_str(&mut f, Self::TYPE_NAME, "message")?,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct NodeResponse {
    pub output: Option<Ref>,
    pub raised: Option<Ref>,
    pub raised_here: bool,
}

/// One node of the working invocation tree.
///
/// A node with a response is completed; a node without one but with
/// children is the pruned state rewind produces, whose children stay
/// available for replay matching; a node with neither has not executed.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) invokable: Ref,
    pub(crate) input: Option<Ref>,
    pub(crate) response: Option<NodeResponse>,
    pub(crate) children: Vec<Node>,
}

impl Node {
    /// Reference to the committed invokable of this call.
    #[must_use]
    pub fn invokable_ref(&self) -> &Ref {
        &self.invokable
    }

    /// Reference to the committed input, if the input was not null.
    #[must_use]
    pub fn input_ref(&self) -> Option<&Ref> {
        self.input.as_ref()
    }

    /// Reference to the committed output, if the call completed.
    #[must_use]
    pub fn output_ref(&self) -> Option<&Ref> {
        self.response.as_ref().and_then(|r| r.output.as_ref())
    }

    /// Reference to the committed raised resource, if the call raised.
    #[must_use]
    pub fn raised_ref(&self) -> Option<&Ref> {
        self.response.as_ref().and_then(|r| r.raised.as_ref())
    }

    /// `true` when the recorded error originated in this node's own body.
    #[must_use]
    pub fn raised_here(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.raised_here)
    }

    /// `true` when the node holds a response.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.response.is_some()
    }

    /// Child invocations, in call-completion order.
    #[must_use]
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    fn executed_descendants(&self) -> usize {
        self.children
            .iter()
            .map(|c| usize::from(c.is_executed()) + c.executed_descendants())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The user-visible result of an invocation.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The body returned this value.
    Completed(Value),
    /// The body asked for an input; answer it and replay to continue.
    Suspended(InputRequest),
    /// The body raised this error.
    Failed(Raised),
    /// The journal has been rewound and not replayed yet. `invoke` never
    /// returns this state.
    Pending,
}

impl Outcome {
    /// The output value, if completed.
    #[must_use]
    pub fn completed(self) -> Option<Value> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// The pending input request, if suspended.
    #[must_use]
    pub fn suspended(self) -> Option<InputRequest> {
        match self {
            Self::Suspended(request) => Some(request),
            _ => None,
        }
    }

    /// The raised error, if failed.
    #[must_use]
    pub fn failed(self) -> Option<Raised> {
        match self {
            Self::Failed(raised) => Some(raised),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ReplayOverride
// ---------------------------------------------------------------------------

/// Substitutions applied during replay: the digest of a committed raised
/// resource maps to the value the raising call should return instead.
///
/// For input requests the substitution applies at the raise site, so the
/// re-executed body receives the answer where it asked for it.
#[derive(Debug, Clone, Default)]
pub struct ReplayOverride {
    substitutions: BTreeMap<Digest, Value>,
}

impl ReplayOverride {
    /// An empty override set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a raised resource's digest to a substitute value.
    #[must_use]
    pub fn substitute(mut self, raised: Digest, value: impl Into<Value>) -> Self {
        self.substitutions.insert(raised, value.into());
        self
    }

    /// Returns `true` when no substitutions are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.substitutions.is_empty()
    }

    pub(crate) fn resolve(&self, digest: &Digest) -> Option<Value> {
        self.substitutions.get(digest).cloned()
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// A journaled invocation: the full tree of one root call.
///
/// The tree is a plain value over one store; rewind is pure, and replay
/// produces a new invocation without touching this one.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub(crate) store: Store,
    pub(crate) root: Node,
}

impl Invocation {
    pub(crate) fn new(store: Store, root: Node) -> Self {
        Self { store, root }
    }

    /// The store this journal's resources live in.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// The root's children, in call-completion order.
    #[must_use]
    pub fn children(&self) -> &[Node] {
        self.root.children()
    }

    /// Number of completed sub-calls (executed strict descendants).
    #[must_use]
    pub fn completed_calls(&self) -> usize {
        self.root.executed_descendants()
    }

    /// Resolve the root's recorded result.
    ///
    /// # Errors
    ///
    /// Returns store failures while checking out the output or raised
    /// resource.
    pub fn outcome(&self) -> Result<Outcome, EngineError> {
        let Some(response) = &self.root.response else {
            return Ok(Outcome::Pending);
        };
        if let Some(output) = &response.output {
            return Ok(Outcome::Completed(self.store.checkout_value(output)?));
        }
        if let Some(raised) = &response.raised {
            if raised.type_key() == InputRequest::type_key() {
                return Ok(Outcome::Suspended(
                    self.store.checkout_as::<InputRequest>(raised)?,
                ));
            }
            return Ok(Outcome::Failed(self.store.checkout_as::<Raised>(raised)?));
        }
        Ok(Outcome::Pending)
    }

    /// The root output value, when the invocation completed.
    ///
    /// # Errors
    ///
    /// Same as [`Invocation::outcome`].
    pub fn output(&self) -> Result<Option<Value>, EngineError> {
        Ok(self.outcome()?.completed())
    }

    /// A new invocation with the last `n` completed sub-calls (post-order
    /// across strict descendants) cleared, plus the root's own response.
    ///
    /// `rewind(0)` clears only the root's response, which forces the body
    /// to re-execute while every child output stays available for replay
    /// matching.
    #[must_use]
    pub fn rewind(&self, n: usize) -> Invocation {
        let mut root = self.root.clone();
        let mut remaining = n;
        clear_last_completed(&mut root, &mut remaining);
        root.response = None;
        Invocation {
            store: self.store.clone(),
            root,
        }
    }

    /// Rewind every completed call, leaving only the request skeleton.
    #[must_use]
    pub fn rewind_all(&self) -> Invocation {
        self.rewind(self.completed_calls())
    }

    /// Re-execute against the journal with no overrides.
    ///
    /// # Errors
    ///
    /// See [`Invocation::replay_with`].
    pub fn replay(&self, engine: &Engine) -> Result<Invocation, EngineError> {
        self.replay_with(engine, &ReplayOverride::default())
    }

    /// Re-execute against the journal.
    ///
    /// Nodes with a recorded output are served from the record without
    /// running their body; everything else re-executes, matching each
    /// nested call against the recorded children in order. The root
    /// invokable is reconstructed through the engine's invokable set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Replay`] when a re-executed call diverges
    /// from the record, [`EngineError::UnknownInvokable`] when the root's
    /// type is not registered with the engine, and store failures.
    pub fn replay_with(
        &self,
        engine: &Engine,
        overrides: &ReplayOverride,
    ) -> Result<Invocation, EngineError> {
        if self
            .root
            .response
            .as_ref()
            .is_some_and(|r| r.output.is_some())
        {
            return Ok(self.clone());
        }
        let invokable = engine.resolve_invokable(&self.root.invokable)?;
        let input = match &self.root.input {
            Some(r) => self.store.checkout_value(r)?,
            None => Value::Null,
        };
        frame::run_root(
            engine,
            invokable.as_ref(),
            input,
            self.root.children.clone(),
            overrides,
        )
    }

    /// Commit the whole tree, returning the root's record reference.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub fn commit(&self) -> Result<Ref, EngineError> {
        commit_node(&self.store, &self.root)
    }

    /// Reconstruct a journal from a committed record.
    ///
    /// # Errors
    ///
    /// Returns store failures, including [`weave_store::StoreError::NotFound`]
    /// for missing pieces.
    pub fn checkout(store: &Store, r: &Ref) -> Result<Invocation, EngineError> {
        Ok(Invocation {
            store: store.clone(),
            root: checkout_node(store, r)?,
        })
    }
}

/// Clear responses in reverse post-order (latest completion first).
fn clear_last_completed(node: &mut Node, remaining: &mut usize) {
    for child in node.children.iter_mut().rev() {
        if *remaining == 0 {
            return;
        }
        if child.response.is_some() {
            child.response = None;
            *remaining -= 1;
        }
        clear_last_completed(child, remaining);
    }
}

fn commit_node(store: &Store, node: &Node) -> Result<Ref, EngineError> {
    let request = store.commit(&Request {
        invokable: node.invokable.clone(),
        input: node.input.clone(),
    })?;

    let mut children = Vec::new();
    for child in &node.children {
        children.push(commit_node(store, child)?);
    }

    // A pruned node keeps its children under a response with neither
    // output nor raised; a never-executed leaf has no response at all.
    let response = if node.response.is_some() || !children.is_empty() {
        let recorded = node.response.clone().unwrap_or(NodeResponse {
            output: None,
            raised: None,
            raised_here: false,
        });
        Some(store.commit(&Response {
            invokable: node.invokable.clone(),
            output: recorded.output,
            raised: recorded.raised,
            raised_here: recorded.raised_here,
            children,
        })?)
    } else {
        None
    };

    Ok(store.commit(&InvocationRecord {
        request,
        response,
    })?)
}

fn checkout_node(store: &Store, r: &Ref) -> Result<Node, EngineError> {
    let record: InvocationRecord = store.checkout_as(r)?;
    let request: Request = store.checkout_as(&record.request)?;
    let mut node = Node {
        invokable: request.invokable,
        input: request.input,
        response: None,
        children: Vec::new(),
    };
    if let Some(response_ref) = record.response {
        let response: Response = store.checkout_as(&response_ref)?;
        for child in &response.children {
            node.children.push(checkout_node(store, child)?);
        }
        if response.output.is_some() || response.raised.is_some() {
            node.response = Some(NodeResponse {
                output: response.output,
                raised: response.raised,
                raised_here: response.raised_here,
            });
        }
    }
    Ok(node)
}
