// SPDX-License-Identifier: MIT OR Apache-2.0
//! weave-core
//!
//! The resource model at the heart of Weave: structurally-typed values,
//! a type registry, canonical packing, and content digests.
//!
//! A [`Resource`] is a registered, named type with an ordered list of
//! fields drawn from the closed [`Value`] universe. Packing a resource
//! produces its canonical wire form ([`Packed`]); hashing those bytes
//! produces the [`Digest`] under which a store files it, and a [`Ref`]
//! names that digest from other resources. Because building a reference
//! requires the target to exist first, committed graphs are always
//! acyclic.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Content digests, type identifiers, and reference handles.
pub mod digest;
/// Canonical packing between resources and their wire form.
pub mod pack;
/// Type registration and constructor lookup.
pub mod registry;
/// The `Resource` contract and field-map helpers.
pub mod resource;
/// The closed universe of field values.
pub mod value;

pub use digest::{Digest, Ref, TypeKey};
pub use pack::{Packed, pack_resource, pack_value, unpack_as, unpack_resource, unpack_value};
pub use registry::{Constructor, Registry};
pub use resource::{FieldMap, Resource, ResourceType, ValueCell, fields};
pub use value::Value;

/// Errors surfaced by the resource model.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A packed resource names a type that is not registered.
    #[error("unknown resource type {name} ({digest})")]
    UnknownType {
        /// Fully qualified type name from the packed form.
        name: String,
        /// Digest of the registered name string.
        digest: String,
    },

    /// A type name was registered twice.
    #[error("type {name} is already registered")]
    TypeAlreadyRegistered {
        /// The name that was bound before.
        name: String,
    },

    /// A checkout or unpack expected one resource type and found another.
    #[error("expected resource type {expected}, found {found}")]
    WrongType {
        /// The type the caller asked for.
        expected: String,
        /// The type recorded in the packed form.
        found: String,
    },

    /// A resource's declared field names and produced values disagree.
    #[error("resource {type_name} declares {names} field names but produced {values} values")]
    FieldMismatch {
        /// Type whose field lists disagree.
        type_name: String,
        /// Number of declared names.
        names: usize,
        /// Number of produced values.
        values: usize,
    },

    /// A constructor did not receive a required field.
    #[error("resource {type_name} is missing field `{field}`")]
    MissingField {
        /// Type being constructed.
        type_name: String,
        /// Name of the absent field.
        field: String,
    },

    /// A field held a value of the wrong shape.
    #[error("field `{field}` of {type_name} expected {expected}, found {found}")]
    FieldType {
        /// Type being constructed.
        type_name: String,
        /// Name of the offending field.
        field: String,
        /// Shape the constructor wanted.
        expected: &'static str,
        /// Shape that was present.
        found: &'static str,
    },

    /// NaN and infinities have no canonical byte form.
    #[error("non-finite float cannot be packed")]
    NonFiniteFloat,

    /// A packed value did not follow the canonical encoding.
    #[error("malformed packed value: {reason}")]
    Malformed {
        /// What was wrong with the encoding.
        reason: String,
    },

    /// A digest literal was not 64 lowercase hex characters.
    #[error("invalid digest literal `{literal}`")]
    InvalidDigest {
        /// The rejected literal.
        literal: String,
    },

    /// JSON serialization failed.
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests;
