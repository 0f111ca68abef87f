// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative-async scenarios: concurrent sub-invocations, completion
//! ordering, the no-background-tasks rule, and async replay.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use weave_core::{CoreError, FieldMap, Resource, ResourceType, Value, fields};
use weave_engine::{AsyncInvokable, CallError, Engine, EngineError, TaskFrame, gather};
use weave_store::Store;

#[derive(Debug, Clone, PartialEq)]
struct AsyncDie {
    seed: i64,
}

impl Resource for AsyncDie {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["seed".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Int(self.seed)]
    }
}

impl ResourceType for AsyncDie {
    const TYPE_NAME: &'static str = "dice.AsyncDie";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            seed: fields::take_int(&mut f, Self::TYPE_NAME, "seed")?,
        })
    }
}

#[async_trait]
impl AsyncInvokable for AsyncDie {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    async fn call(&self, _cx: TaskFrame, _input: Value) -> Result<Value, CallError> {
        Ok(Value::Int(self.seed.rem_euclid(6) + 1))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GatherRolls {
    seed: i64,
}

impl Resource for GatherRolls {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["seed".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Int(self.seed)]
    }
}

impl ResourceType for GatherRolls {
    const TYPE_NAME: &'static str = "dice.GatherRolls";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            seed: fields::take_int(&mut f, Self::TYPE_NAME, "seed")?,
        })
    }
}

#[async_trait]
impl AsyncInvokable for GatherRolls {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    async fn call(&self, cx: TaskFrame, input: Value) -> Result<Value, CallError> {
        let count = input
            .as_int()
            .ok_or_else(|| CallError::raise("dice", "roll count must be an int"))?;
        let die: Arc<dyn AsyncInvokable> = Arc::new(AsyncDie { seed: self.seed });
        let calls = (0..count)
            .map(|index| cx.call(die.clone(), Value::Int(index)))
            .collect();
        let faces = gather(calls).await?;
        let total: i64 = faces.iter().filter_map(Value::as_int).sum();
        Ok(Value::Int(total))
    }
}

fn engine() -> Engine {
    let engine = Engine::new(Store::in_memory());
    engine.register_async::<GatherRolls>();
    engine
}

#[tokio::test]
async fn gathered_rolls_complete_and_journal_in_completion_order() {
    let engine = engine();
    let inv = engine
        .invoke_async(Arc::new(GatherRolls { seed: 2 }), Value::Int(3))
        .await
        .unwrap();

    assert_eq!(inv.output().unwrap(), Some(Value::Int(9)));
    assert_eq!(inv.children().len(), 3);

    // Children carry their distinct inputs, in the order the calls
    // completed.
    let inputs: Vec<Value> = inv
        .children()
        .iter()
        .map(|c| {
            engine
                .store()
                .checkout_value(c.input_ref().unwrap())
                .unwrap()
        })
        .collect();
    assert_eq!(inputs, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
}

#[tokio::test]
async fn async_rewind_and_replay_reuse_recorded_rolls() {
    let engine = engine();
    let inv = engine
        .invoke_async(Arc::new(GatherRolls { seed: 2 }), Value::Int(3))
        .await
        .unwrap();

    let replayed = inv.rewind(0).replay_async(&engine).await.unwrap();
    assert_eq!(replayed.output().unwrap(), Some(Value::Int(9)));
    assert_eq!(replayed.children().len(), 3);
}

#[derive(Debug, Clone, PartialEq)]
struct FireAndForget;

impl Resource for FireAndForget {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec![]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![]
    }
}

impl ResourceType for FireAndForget {
    const TYPE_NAME: &'static str = "dice.FireAndForget";

    fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self)
    }
}

#[async_trait]
impl AsyncInvokable for FireAndForget {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    async fn call(&self, cx: TaskFrame, _input: Value) -> Result<Value, CallError> {
        // A child is started but never awaited before the body returns.
        let abandoned = cx.call(Arc::new(AsyncDie { seed: 1 }), Value::Null);
        std::mem::forget(abandoned);
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn background_children_are_rejected() {
    let engine = engine();
    let err = engine
        .invoke_async(Arc::new(FireAndForget), Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IncompleteSubinvocation));
}

/// Switches an alternate code path on between runs.
static SKIP_SECOND: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, PartialEq)]
struct Fickle;

impl Resource for Fickle {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec![]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![]
    }
}

impl ResourceType for Fickle {
    const TYPE_NAME: &'static str = "dice.Fickle";

    fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self)
    }
}

#[async_trait]
impl AsyncInvokable for Fickle {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    async fn call(&self, cx: TaskFrame, _input: Value) -> Result<Value, CallError> {
        let first = cx.call(Arc::new(AsyncDie { seed: 2 }), Value::Int(0)).await?;
        if SKIP_SECOND.load(Ordering::SeqCst) {
            return Ok(first);
        }
        cx.call(Arc::new(AsyncDie { seed: 2 }), Value::Int(1)).await
    }
}

#[tokio::test]
async fn skipping_recorded_children_during_async_replay_is_a_divergence() {
    let engine = Engine::new(Store::in_memory());
    engine.register_async::<Fickle>();

    SKIP_SECOND.store(false, Ordering::SeqCst);
    let inv = engine
        .invoke_async(Arc::new(Fickle), Value::Null)
        .await
        .unwrap();
    assert_eq!(inv.children().len(), 2);

    // The re-executed body returns after one call, leaving the other
    // recorded child unconsumed.
    SKIP_SECOND.store(true, Ordering::SeqCst);
    let err = inv.rewind(0).replay_async(&engine).await.unwrap_err();
    assert!(matches!(err, EngineError::Replay { .. }));
}

#[tokio::test]
async fn awaited_children_in_any_order_are_fine() {
    #[derive(Debug, Clone, PartialEq)]
    struct TwoPhase;

    impl Resource for TwoPhase {
        fn type_name(&self) -> &str {
            Self::TYPE_NAME
        }

        fn field_names(&self) -> Vec<String> {
            vec![]
        }

        fn field_values(&self) -> Vec<Value> {
            vec![]
        }
    }

    impl ResourceType for TwoPhase {
        const TYPE_NAME: &'static str = "dice.TwoPhase";

        fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
            Ok(Self)
        }
    }

    #[async_trait]
    impl AsyncInvokable for TwoPhase {
        fn as_resource(&self) -> &dyn Resource {
            self
        }

        async fn call(&self, cx: TaskFrame, _input: Value) -> Result<Value, CallError> {
            let first = cx.call(Arc::new(AsyncDie { seed: 2 }), Value::Int(0));
            let second = cx.call(Arc::new(AsyncDie { seed: 8 }), Value::Int(1));
            // Await in reverse creation order; both still complete before
            // the body returns.
            let b = second.await?;
            let a = first.await?;
            let total = a.as_int().unwrap_or(0) + b.as_int().unwrap_or(0);
            Ok(Value::Int(total))
        }
    }

    let engine = engine();
    let inv = engine
        .invoke_async(Arc::new(TwoPhase), Value::Null)
        .await
        .unwrap();
    assert_eq!(inv.output().unwrap(), Some(Value::Int(6)));
    assert_eq!(inv.children().len(), 2);

    // Completion order: the awaited-first child (seed 8) finished first.
    let awaited_first = engine.store().commit(&AsyncDie { seed: 8 }).unwrap();
    assert_eq!(
        inv.children()[0].invokable_ref().digest(),
        awaited_first.digest()
    );
}
