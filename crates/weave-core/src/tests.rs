// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

// ── test fixtures ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Message {
    a: String,
    b: i64,
}

impl Resource for Message {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Str(self.a.clone()), Value::Int(self.b)]
    }
}

impl ResourceType for Message {
    const TYPE_NAME: &'static str = "tests.Message";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            a: fields::take_str(&mut f, Self::TYPE_NAME, "a")?,
            b: fields::take_int(&mut f, Self::TYPE_NAME, "b")?,
        })
    }
}

/// Resource whose field lists disagree, for pack-time rejection tests.
#[derive(Debug)]
struct Lopsided;

impl Resource for Lopsided {
    fn type_name(&self) -> &str {
        "tests.Lopsided"
    }

    fn field_names(&self) -> Vec<String> {
        vec!["only".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![]
    }
}

fn registry() -> Registry {
    let registry = Registry::with_builtins();
    registry.register::<Message>().unwrap();
    registry
}

// ── digests and type keys ──────────────────────────────────────────

#[test]
fn digest_is_64_lowercase_hex() {
    let d = Digest::of_bytes(b"weave");
    assert_eq!(d.as_str().len(), 64);
    assert!(
        d.as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    );
}

#[test]
fn digest_parse_rejects_bad_literals() {
    assert!("not-a-digest".parse::<Digest>().is_err());
    let upper = Digest::of_bytes(b"x").as_str().to_uppercase();
    assert!(upper.parse::<Digest>().is_err());
    let good = Digest::of_bytes(b"x");
    assert_eq!(good.as_str().parse::<Digest>().unwrap(), good);
}

#[test]
fn type_key_equality_is_by_digest() {
    let a = TypeKey::from_name("tests.Message");
    let b = TypeKey::from_name("tests.Message");
    assert_eq!(a, b);
    assert_ne!(a, TypeKey::from_name("tests.Other"));
}

#[test]
fn type_key_verify_catches_forged_digests() {
    let mut key = TypeKey::from_name("tests.Message");
    key.digest = Digest::of_bytes(b"something else");
    assert!(key.verify().is_err());
}

#[test]
fn ref_clone_shares_identity_but_detach_does_not() {
    let key = TypeKey::from_name("tests.Message");
    let r = Ref::new(key.clone(), Digest::of_bytes(b"one"));
    let clone = r.clone();
    let detached = r.detach();

    r.rebind(Digest::of_bytes(b"two"));
    assert_eq!(clone.digest(), Digest::of_bytes(b"two"));
    assert_eq!(detached.digest(), Digest::of_bytes(b"one"));
}

// ── packing ────────────────────────────────────────────────────────

#[test]
fn pack_unpack_round_trips_a_resource() {
    let m = Message {
        a: "hello".to_string(),
        b: 42,
    };
    let packed = pack_resource(&m).unwrap();
    let back = unpack_as::<Message>(&packed, &registry()).unwrap();
    assert_eq!(back, m);
}

#[test]
fn canonical_bytes_are_deterministic() {
    let m = Message {
        a: "hello".to_string(),
        b: 42,
    };
    let b1 = pack_resource(&m).unwrap().canonical_bytes().unwrap();
    let b2 = pack_resource(&m).unwrap().canonical_bytes().unwrap();
    assert_eq!(b1, b2);
    // Compact form: no whitespace between tokens.
    assert!(!b1.contains(&b' '));
    assert!(!b1.contains(&b'\n'));
}

#[test]
fn equal_structure_means_equal_digest() {
    let d1 = pack_resource(&Message {
        a: "hello".to_string(),
        b: 42,
    })
    .unwrap()
    .digest()
    .unwrap();
    let d2 = pack_resource(&Message {
        a: "hello".to_string(),
        b: 42,
    })
    .unwrap()
    .digest()
    .unwrap();
    assert_eq!(d1, d2);

    let d3 = pack_resource(&Message {
        a: "hello".to_string(),
        b: 43,
    })
    .unwrap()
    .digest()
    .unwrap();
    assert_ne!(d1, d3);
}

#[test]
fn field_arity_mismatch_is_rejected() {
    let err = pack_resource(&Lopsided).unwrap_err();
    assert!(matches!(err, CoreError::FieldMismatch { .. }));
}

#[test]
fn non_finite_floats_are_rejected() {
    assert!(matches!(
        pack_value(&Value::Float(f64::NAN)),
        Err(CoreError::NonFiniteFloat)
    ));
    assert!(matches!(
        pack_value(&Value::Float(f64::INFINITY)),
        Err(CoreError::NonFiniteFloat)
    ));
}

#[test]
fn bytes_pack_as_tagged_base64() {
    let packed = pack_value(&Value::Bytes(vec![1, 2, 3])).unwrap();
    let object = packed.as_object().unwrap();
    assert_eq!(object.len(), 1);
    assert!(object.contains_key("$bytes"));

    let back = unpack_value(&packed, &registry()).unwrap();
    assert_eq!(back, Value::Bytes(vec![1, 2, 3]));
}

#[test]
fn maps_are_wrapped_so_user_keys_cannot_collide_with_tags() {
    let mut entries = BTreeMap::new();
    entries.insert("$bytes".to_string(), Value::Int(1));
    let v = Value::Map(entries);

    let packed = pack_value(&v).unwrap();
    let back = unpack_value(&packed, &registry()).unwrap();
    assert_eq!(back, v);
}

#[test]
fn unknown_tags_are_rejected() {
    let bad = serde_json::json!({"$mystery": 1});
    let err = unpack_value(&bad, &registry()).unwrap_err();
    assert!(matches!(err, CoreError::Malformed { .. }));
}

#[test]
fn multi_key_objects_are_rejected() {
    let bad = serde_json::json!({"a": 1, "b": 2});
    assert!(unpack_value(&bad, &registry()).is_err());
}

#[test]
fn embedded_resources_round_trip() {
    let v = Value::resource(Message {
        a: "inner".to_string(),
        b: 7,
    });
    let packed = pack_value(&v).unwrap();
    let back = unpack_value(&packed, &registry()).unwrap();
    assert_eq!(back, v);
}

#[test]
fn refs_round_trip_with_type_information() {
    let r = Ref::new(Message::type_key(), Digest::of_bytes(b"target"));
    let packed = pack_value(&Value::Ref(r.clone())).unwrap();
    let back = unpack_value(&packed, &registry()).unwrap();
    assert_eq!(back.as_ref().unwrap().digest(), r.digest());
    assert_eq!(back.as_ref().unwrap().type_key(), Message::type_key());
}

#[test]
fn packed_bytes_round_trip_through_from_slice() {
    let packed = pack_resource(&Message {
        a: "persisted".to_string(),
        b: 1,
    })
    .unwrap();
    let bytes = packed.canonical_bytes().unwrap();
    let reread = Packed::from_slice(&bytes).unwrap();
    assert_eq!(reread, packed);
    assert_eq!(reread.digest().unwrap(), packed.digest().unwrap());
}

// ── registry ───────────────────────────────────────────────────────

#[test]
fn names_bind_at_most_once() {
    let registry = registry();
    let err = registry.register::<Message>().unwrap_err();
    assert!(matches!(err, CoreError::TypeAlreadyRegistered { .. }));
    // ensure() tolerates the existing binding.
    assert_eq!(registry.ensure::<Message>(), Message::type_key());
}

#[test]
fn unpacking_an_unknown_type_fails() {
    let packed = pack_resource(&Message {
        a: "x".to_string(),
        b: 0,
    })
    .unwrap();
    let empty = Registry::new();
    let err = unpack_resource(&packed, &empty).unwrap_err();
    assert!(matches!(err, CoreError::UnknownType { .. }));
}

#[test]
fn unpack_as_checks_the_type() {
    let packed = pack_resource(&Message {
        a: "x".to_string(),
        b: 0,
    })
    .unwrap();
    let err = unpack_as::<ValueCell>(&packed, &registry()).unwrap_err();
    assert!(matches!(err, CoreError::WrongType { .. }));
}

// ── properties ─────────────────────────────────────────────────────

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e12..1.0e12).prop_map(Value::Float),
        "[ -~]{0,16}".prop_map(Value::Str),
        prop::collection::vec(any::<u8>(), 0..24).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::btree_map("[a-z$]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

proptest! {
    #[test]
    fn any_value_round_trips(v in value_strategy()) {
        let registry = Registry::with_builtins();
        let cell = ValueCell::new(v.clone());
        let packed = pack_resource(&cell).unwrap();
        let back = unpack_as::<ValueCell>(&packed, &registry).unwrap();
        prop_assert_eq!(back.value, v);
    }

    #[test]
    fn equal_values_hash_equal(v in value_strategy()) {
        let p1 = pack_resource(&ValueCell::new(v.clone())).unwrap();
        let p2 = pack_resource(&ValueCell::new(v)).unwrap();
        prop_assert_eq!(p1.digest().unwrap(), p2.digest().unwrap());
    }
}
