// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull-style driver that replays an invocation up to each input request.

use crate::invokable::Invokable;
use crate::journal::{InputRequest, Invocation, Outcome, ReplayOverride};
use crate::{Engine, EngineError};
use weave_core::{Digest, Value};

struct Pending {
    request: InputRequest,
    digest: Digest,
}

/// Drives a replay loop that stops at every [`InputRequest`] and resumes
/// once an answer is supplied.
///
/// Each step replays the whole body from the root, so answers accumulate:
/// a body that asks several questions in one run re-executes with every
/// earlier answer still available at its raise site.
///
/// # Examples
///
/// ```no_run
/// # use weave_engine::{Engine, InvocationGenerator};
/// # use weave_core::Value;
/// # fn demo(engine: &Engine, ask: &dyn weave_engine::Invokable) -> Result<(), weave_engine::EngineError> {
/// let mut driver = InvocationGenerator::new(engine, ask, Value::Null);
/// while let Some(request) = driver.next()? {
///     let answer = Value::Str(format!("answer to {}", request.requested));
///     driver.set_input(answer)?;
/// }
/// # Ok(()) }
/// ```
pub struct InvocationGenerator<'e> {
    engine: &'e Engine,
    seed: Option<(&'e dyn Invokable, Value)>,
    invocation: Option<Invocation>,
    pending: Option<Pending>,
    /// Every answer given so far, keyed by its request's digest.
    overrides: ReplayOverride,
    /// Whether the current pending request has been answered.
    answered: bool,
    done: bool,
}

impl<'e> InvocationGenerator<'e> {
    /// Drive a fresh invocation of `invokable`.
    #[must_use]
    pub fn new(engine: &'e Engine, invokable: &'e dyn Invokable, input: Value) -> Self {
        Self {
            engine,
            seed: Some((invokable, input)),
            invocation: None,
            pending: None,
            overrides: ReplayOverride::default(),
            answered: false,
            done: false,
        }
    }

    /// Resume driving an existing (possibly suspended) invocation.
    #[must_use]
    pub fn resume(engine: &'e Engine, invocation: Invocation) -> Self {
        Self {
            engine,
            seed: None,
            invocation: Some(invocation),
            pending: None,
            overrides: ReplayOverride::default(),
            answered: false,
            done: false,
        }
    }

    /// The current (possibly partial) invocation.
    #[must_use]
    pub fn invocation(&self) -> Option<&Invocation> {
        self.invocation.as_ref()
    }

    /// Answer the pending input request; the next [`next`](Self::next)
    /// replays with this and every earlier answer substituted at their
    /// raise sites.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoPendingRequest`] when nothing is pending.
    pub fn set_input(&mut self, value: impl Into<Value>) -> Result<(), EngineError> {
        let Some(pending) = &self.pending else {
            return Err(EngineError::NoPendingRequest);
        };
        let accumulated = std::mem::take(&mut self.overrides);
        self.overrides = accumulated.substitute(pending.digest.clone(), value.into());
        self.answered = true;
        Ok(())
    }

    /// Advance to the next input request.
    ///
    /// Returns `Ok(Some(request))` when execution suspended on a request,
    /// and `Ok(None)` once the invocation completed or failed (inspect
    /// [`invocation`](Self::invocation) for the final journal).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InputRequired`] when the previous request
    /// has not been answered, plus invoke/replay failures.
    pub fn next(&mut self) -> Result<Option<InputRequest>, EngineError> {
        if self.done {
            return Ok(None);
        }
        if self.pending.is_some() && !self.answered {
            return Err(EngineError::InputRequired);
        }
        let next = match (&self.invocation, &self.seed) {
            (Some(previous), _) => previous.replay_with(self.engine, &self.overrides)?,
            (None, Some((invokable, input))) => self.engine.invoke(*invokable, input.clone())?,
            (None, None) => return Ok(None),
        };
        self.pending = None;
        self.answered = false;
        let outcome = next.outcome()?;
        match outcome {
            Outcome::Suspended(request) => {
                let digest = next.store().commit(&request)?.digest();
                self.pending = Some(Pending {
                    request: request.clone(),
                    digest,
                });
                self.invocation = Some(next);
                Ok(Some(request))
            }
            Outcome::Completed(_) | Outcome::Failed(_) | Outcome::Pending => {
                self.done = true;
                self.invocation = Some(next);
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for InvocationGenerator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationGenerator")
            .field("pending", &self.pending.as_ref().map(|p| &p.request))
            .field("answered", &self.answered)
            .field("done", &self.done)
            .finish()
    }
}
