// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical packing between resources and their wire form.
//!
//! The packed form is JSON with a fixed shape: mapping keys in
//! lexicographic order (the underlying `serde_json::Value` map is
//! `BTreeMap`-backed), no insignificant whitespace, integers as integers,
//! floats in serde_json's shortest form, and non-primitive values carried
//! in single-key tagged objects (`$bytes`, `$ref`, `$type`, `$map`,
//! `$res`). Plain field maps never collide with the tags because user maps
//! are themselves wrapped in `$map`. The encoding is total and
//! deterministic; its bytes are the compatibility surface that digests are
//! computed over.

use crate::CoreError;
use crate::digest::{Digest, Ref, TypeKey};
use crate::registry::Registry;
use crate::resource::{FieldMap, Resource, ResourceType};
use crate::value::Value;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

const TAG_BYTES: &str = "$bytes";
const TAG_REF: &str = "$ref";
const TAG_TYPE: &str = "$type";
const TAG_MAP: &str = "$map";
const TAG_RES: &str = "$res";

/// A map of packed field values.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// The canonical wire form of a resource: its type identifier plus its
/// recursively packed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packed {
    /// Identifier of the resource's registered type.
    #[serde(rename = "type_id")]
    pub type_key: TypeKey,
    /// Field name to packed field value.
    pub fields: JsonMap,
}

impl Packed {
    /// The canonical byte encoding used for hashing, persistence, and
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Json`] if serialization fails.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CoreError> {
        // Round-trip through `serde_json::Value` so key order is the map's
        // sorted order rather than struct declaration order.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// The content digest of the canonical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Json`] if serialization fails.
    pub fn digest(&self) -> Result<Digest, CoreError> {
        Ok(Digest::of_bytes(&self.canonical_bytes()?))
    }

    /// Parse a packed resource back out of its byte encoding.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Json`] on invalid JSON and
    /// [`CoreError::Malformed`] on a type key whose digest does not match
    /// its name.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let packed: Packed = serde_json::from_slice(bytes)?;
        packed.type_key.verify()?;
        Ok(packed)
    }
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

/// Pack a resource into its canonical wire form.
///
/// # Errors
///
/// Returns [`CoreError::FieldMismatch`] when the resource's declared field
/// names and produced values disagree, and the packing errors of its field
/// values otherwise.
pub fn pack_resource(resource: &dyn Resource) -> Result<Packed, CoreError> {
    Ok(Packed {
        type_key: TypeKey::from_name(resource.type_name()),
        fields: pack_fields(resource)?,
    })
}

fn pack_fields(resource: &dyn Resource) -> Result<JsonMap, CoreError> {
    let names = resource.field_names();
    let values = resource.field_values();
    if names.len() != values.len() {
        return Err(CoreError::FieldMismatch {
            type_name: resource.type_name().to_string(),
            names: names.len(),
            values: values.len(),
        });
    }
    let mut fields = JsonMap::new();
    for (name, value) in names.into_iter().zip(values) {
        let packed = pack_value(&value)?;
        if fields.insert(name.clone(), packed).is_some() {
            return Err(CoreError::Malformed {
                reason: format!(
                    "resource {} declares field `{name}` twice",
                    resource.type_name()
                ),
            });
        }
    }
    Ok(fields)
}

#[derive(Serialize, Deserialize)]
struct RefRepr {
    digest: Digest,
    #[serde(rename = "type")]
    type_key: TypeKey,
}

fn tagged(tag: &str, inner: serde_json::Value) -> serde_json::Value {
    let mut map = JsonMap::new();
    map.insert(tag.to_string(), inner);
    serde_json::Value::Object(map)
}

/// Pack a single field value.
///
/// # Errors
///
/// Returns [`CoreError::NonFiniteFloat`] for NaN or infinite floats, and
/// [`CoreError::FieldMismatch`] from embedded resources.
pub fn pack_value(value: &Value) -> Result<serde_json::Value, CoreError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or(CoreError::NonFiniteFloat)?,
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => tagged(TAG_BYTES, BASE64.encode(bytes).into()),
        Value::Ref(r) => tagged(
            TAG_REF,
            serde_json::to_value(RefRepr {
                digest: r.digest(),
                type_key: r.type_key(),
            })?,
        ),
        Value::Type(t) => tagged(TAG_TYPE, serde_json::to_value(t)?),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(pack_value)
                .collect::<Result<Vec<_>, CoreError>>()?,
        ),
        Value::Map(entries) => tagged(
            TAG_MAP,
            serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), pack_value(v)?)))
                    .collect::<Result<JsonMap, CoreError>>()?,
            ),
        ),
        Value::Resource(r) => {
            let mut inner = JsonMap::new();
            inner.insert(
                "fields".to_string(),
                serde_json::Value::Object(pack_fields(r.as_ref())?),
            );
            inner.insert(
                "type".to_string(),
                serde_json::to_value(TypeKey::from_name(r.type_name()))?,
            );
            tagged(TAG_RES, serde_json::Value::Object(inner))
        }
    })
}

// ---------------------------------------------------------------------------
// Unpacking
// ---------------------------------------------------------------------------

/// Reconstruct a resource from its packed form via the registry.
///
/// # Errors
///
/// Returns [`CoreError::UnknownType`] for an unregistered type identifier
/// and [`CoreError::Malformed`] for encodings outside the canonical shape.
pub fn unpack_resource(
    packed: &Packed,
    registry: &Registry,
) -> Result<std::sync::Arc<dyn Resource>, CoreError> {
    packed.type_key.verify()?;
    let ctor = registry.lookup(&packed.type_key)?;
    ctor(unpack_fields(&packed.fields, registry)?)
}

/// Reconstruct a concrete resource type from its packed form.
///
/// # Errors
///
/// Returns [`CoreError::WrongType`] when the packed type identifier is not
/// `T`'s, plus the errors of [`unpack_resource`].
pub fn unpack_as<T: ResourceType>(packed: &Packed, registry: &Registry) -> Result<T, CoreError> {
    if packed.type_key != T::type_key() {
        return Err(CoreError::WrongType {
            expected: T::TYPE_NAME.to_string(),
            found: packed.type_key.name.clone(),
        });
    }
    T::from_fields(unpack_fields(&packed.fields, registry)?)
}

fn unpack_fields(fields: &JsonMap, registry: &Registry) -> Result<FieldMap, CoreError> {
    let mut map = FieldMap::new();
    for (name, value) in fields {
        map.insert(name.clone(), unpack_value(value, registry)?);
    }
    Ok(map)
}

/// Unpack a single field value.
///
/// # Errors
///
/// Returns [`CoreError::Malformed`] for encodings outside the canonical
/// shape and [`CoreError::UnknownType`] from embedded resources.
pub fn unpack_value(value: &serde_json::Value, registry: &Registry) -> Result<Value, CoreError> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if n.is_f64() {
                Ok(Value::Float(n.as_f64().unwrap_or_default()))
            } else {
                Err(CoreError::Malformed {
                    reason: format!("integer {n} is out of range"),
                })
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| unpack_value(item, registry))
                .collect::<Result<Vec<_>, CoreError>>()?,
        )),
        serde_json::Value::Object(map) => unpack_tagged(map, registry),
    }
}

fn unpack_tagged(map: &JsonMap, registry: &Registry) -> Result<Value, CoreError> {
    let mut entries = map.iter();
    let (Some((tag, inner)), None) = (entries.next(), entries.next()) else {
        return Err(CoreError::Malformed {
            reason: "objects must be single-key tagged values".to_string(),
        });
    };
    match tag.as_str() {
        TAG_BYTES => {
            let encoded = inner.as_str().ok_or_else(|| CoreError::Malformed {
                reason: "$bytes payload must be a base64 string".to_string(),
            })?;
            let bytes = BASE64.decode(encoded).map_err(|e| CoreError::Malformed {
                reason: format!("invalid base64 in $bytes: {e}"),
            })?;
            Ok(Value::Bytes(bytes))
        }
        TAG_REF => {
            let repr: RefRepr = serde_json::from_value(inner.clone())?;
            repr.type_key.verify()?;
            Ok(Value::Ref(Ref::new(repr.type_key, repr.digest)))
        }
        TAG_TYPE => {
            let key: TypeKey = serde_json::from_value(inner.clone())?;
            key.verify()?;
            Ok(Value::Type(key))
        }
        TAG_MAP => {
            let object = inner.as_object().ok_or_else(|| CoreError::Malformed {
                reason: "$map payload must be an object".to_string(),
            })?;
            let mut entries = std::collections::BTreeMap::new();
            for (k, v) in object {
                entries.insert(k.clone(), unpack_value(v, registry)?);
            }
            Ok(Value::Map(entries))
        }
        TAG_RES => {
            let object = inner.as_object().ok_or_else(|| CoreError::Malformed {
                reason: "$res payload must be an object".to_string(),
            })?;
            let type_value = object.get("type").ok_or_else(|| CoreError::Malformed {
                reason: "$res payload is missing `type`".to_string(),
            })?;
            let fields_value = object.get("fields").ok_or_else(|| CoreError::Malformed {
                reason: "$res payload is missing `fields`".to_string(),
            })?;
            let type_key: TypeKey = serde_json::from_value(type_value.clone())?;
            let fields = fields_value
                .as_object()
                .ok_or_else(|| CoreError::Malformed {
                    reason: "$res fields must be an object".to_string(),
                })?
                .clone();
            let packed = Packed { type_key, fields };
            Ok(Value::Resource(unpack_resource(&packed, registry)?))
        }
        other => Err(CoreError::Malformed {
            reason: format!("unknown tag `{other}`"),
        }),
    }
}
