// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `Resource` contract and helpers for writing constructors.

use crate::CoreError;
use crate::digest::{Ref, TypeKey};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Constructor input: field name to field value.
pub type FieldMap = BTreeMap<String, Value>;

/// A structurally-typed value that can be committed into a store.
///
/// Field order is part of the contract: `field_names` and `field_values`
/// must agree in length and position, and the canonical packed form is
/// derived from them. Implementations are plain data; behavior lives on
/// the invokable traits layered above.
pub trait Resource: fmt::Debug + Send + Sync {
    /// Fully qualified type name, stable across processes.
    fn type_name(&self) -> &str;

    /// Ordered field names.
    fn field_names(&self) -> Vec<String>;

    /// Field values, in the same order as [`Resource::field_names`].
    fn field_values(&self) -> Vec<Value>;
}

/// A concrete resource type that can be registered and reconstructed.
pub trait ResourceType: Resource + Sized {
    /// The registered name for this type.
    const TYPE_NAME: &'static str;

    /// Reconstruct an instance from a field map.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingField`] or [`CoreError::FieldType`] when
    /// the map does not match the type's field contract.
    fn from_fields(fields: FieldMap) -> Result<Self, CoreError>;

    /// The stable key for this type.
    #[must_use]
    fn type_key() -> TypeKey {
        TypeKey::from_name(Self::TYPE_NAME)
    }
}

/// Accessors for pulling typed fields out of a [`FieldMap`].
///
/// Each helper removes the field from the map, so a constructor can end by
/// ignoring leftovers or asserting the map is drained, whichever its
/// compatibility policy wants.
pub mod fields {
    use super::{CoreError, FieldMap, Ref, TypeKey, Value};

    /// Remove `field`, failing if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingField`] when the field is not present.
    pub fn take(map: &mut FieldMap, type_name: &str, field: &str) -> Result<Value, CoreError> {
        map.remove(field).ok_or_else(|| CoreError::MissingField {
            type_name: type_name.to_string(),
            field: field.to_string(),
        })
    }

    fn wrong(type_name: &str, field: &str, expected: &'static str, found: &Value) -> CoreError {
        CoreError::FieldType {
            type_name: type_name.to_string(),
            field: field.to_string(),
            expected,
            found: found.kind(),
        }
    }

    /// Remove a string field.
    ///
    /// # Errors
    ///
    /// Fails when the field is absent or not a string.
    pub fn take_str(map: &mut FieldMap, type_name: &str, field: &str) -> Result<String, CoreError> {
        match take(map, type_name, field)? {
            Value::Str(s) => Ok(s),
            other => Err(wrong(type_name, field, "str", &other)),
        }
    }

    /// Remove an integer field.
    ///
    /// # Errors
    ///
    /// Fails when the field is absent or not an int.
    pub fn take_int(map: &mut FieldMap, type_name: &str, field: &str) -> Result<i64, CoreError> {
        match take(map, type_name, field)? {
            Value::Int(i) => Ok(i),
            other => Err(wrong(type_name, field, "int", &other)),
        }
    }

    /// Remove a boolean field.
    ///
    /// # Errors
    ///
    /// Fails when the field is absent or not a bool.
    pub fn take_bool(map: &mut FieldMap, type_name: &str, field: &str) -> Result<bool, CoreError> {
        match take(map, type_name, field)? {
            Value::Bool(b) => Ok(b),
            other => Err(wrong(type_name, field, "bool", &other)),
        }
    }

    /// Remove a reference field.
    ///
    /// # Errors
    ///
    /// Fails when the field is absent or not a reference.
    pub fn take_ref(map: &mut FieldMap, type_name: &str, field: &str) -> Result<Ref, CoreError> {
        match take(map, type_name, field)? {
            Value::Ref(r) => Ok(r),
            other => Err(wrong(type_name, field, "ref", &other)),
        }
    }

    /// Remove a reference field that may be null.
    ///
    /// # Errors
    ///
    /// Fails when the field is absent or neither a reference nor null.
    pub fn take_opt_ref(
        map: &mut FieldMap,
        type_name: &str,
        field: &str,
    ) -> Result<Option<Ref>, CoreError> {
        match take(map, type_name, field)? {
            Value::Null => Ok(None),
            Value::Ref(r) => Ok(Some(r)),
            other => Err(wrong(type_name, field, "ref or null", &other)),
        }
    }

    /// Remove a type-handle field.
    ///
    /// # Errors
    ///
    /// Fails when the field is absent or not a type handle.
    pub fn take_type(
        map: &mut FieldMap,
        type_name: &str,
        field: &str,
    ) -> Result<TypeKey, CoreError> {
        match take(map, type_name, field)? {
            Value::Type(t) => Ok(t),
            other => Err(wrong(type_name, field, "type", &other)),
        }
    }

    /// Remove a list field.
    ///
    /// # Errors
    ///
    /// Fails when the field is absent or not a list.
    pub fn take_list(
        map: &mut FieldMap,
        type_name: &str,
        field: &str,
    ) -> Result<Vec<Value>, CoreError> {
        match take(map, type_name, field)? {
            Value::List(items) => Ok(items),
            other => Err(wrong(type_name, field, "list", &other)),
        }
    }
}

// ---------------------------------------------------------------------------
// ValueCell
// ---------------------------------------------------------------------------

/// Builtin wrapper that turns a bare [`Value`] into a committable resource.
///
/// Stores only hold resources; engine inputs and outputs are values. The
/// cell bridges the two so every journal edge is a real reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCell {
    /// The wrapped value.
    pub value: Value,
}

impl ValueCell {
    /// Wrap a value.
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Resource for ValueCell {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["value".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![self.value.clone()]
    }
}

impl ResourceType for ValueCell {
    const TYPE_NAME: &'static str = "weave.ValueCell";

    fn from_fields(mut fields: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            value: fields::take(&mut fields, Self::TYPE_NAME, "value")?,
        })
    }
}
