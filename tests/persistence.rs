// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end persistence: a journal committed into a file-backed store
//! survives a reopen and replays from disk.

use weave_core::{CoreError, FieldMap, Registry, Resource, ResourceType, Value};
use weave_engine::{CallError, Engine, Frame, Invocation, Invokable};
use weave_store::{FileBackend, Store};

#[derive(Debug, Clone, PartialEq)]
struct Square;

impl Resource for Square {
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

impl ResourceType for Square {
    const TYPE_NAME: &'static str = "math.Square";

    fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self)
    }
}

impl Invokable for Square {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    fn call(&self, _cx: &mut Frame<'_>, input: Value) -> Result<Value, CallError> {
        let n = input
            .as_int()
            .ok_or_else(|| CallError::raise("math", "expected an int"))?;
        Ok(Value::Int(n * n))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SumOfSquares;

impl Resource for SumOfSquares {
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

impl ResourceType for SumOfSquares {
    const TYPE_NAME: &'static str = "math.SumOfSquares";

    fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self)
    }
}

impl Invokable for SumOfSquares {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    fn call(&self, cx: &mut Frame<'_>, input: Value) -> Result<Value, CallError> {
        let upto = input
            .as_int()
            .ok_or_else(|| CallError::raise("math", "expected an int"))?;
        let mut total = 0;
        for n in 1..=upto {
            let squared = cx.call(&Square, Value::Int(n))?;
            total += squared.as_int().unwrap_or(0);
        }
        Ok(Value::Int(total))
    }
}

fn file_store(root: &std::path::Path) -> Store {
    Store::new(
        FileBackend::open(root).unwrap(),
        Registry::with_builtins(),
    )
}

#[test]
fn a_journal_survives_store_reopen_and_replays() {
    let dir = tempfile::tempdir().unwrap();

    // First process: run and persist.
    let record_ref = {
        let engine = Engine::new(file_store(dir.path()));
        engine.register::<SumOfSquares>();
        let inv = engine
            .invoke(&SumOfSquares, Value::Int(3))
            .unwrap();
        assert_eq!(inv.output().unwrap(), Some(Value::Int(14)));
        inv.commit().unwrap()
    };

    // Second process: reopen, check out, and replay from the journal.
    let engine = Engine::new(file_store(dir.path()));
    engine.register::<SumOfSquares>();

    let restored = Invocation::checkout(engine.store(), &record_ref).unwrap();
    assert_eq!(restored.output().unwrap(), Some(Value::Int(14)));
    assert_eq!(restored.children().len(), 3);

    let replayed = restored.rewind(0).replay(&engine).unwrap();
    assert_eq!(replayed.output().unwrap(), Some(Value::Int(14)));

    // The replayed tree re-commits to the same record.
    assert_eq!(replayed.commit().unwrap().digest(), record_ref.digest());
}
