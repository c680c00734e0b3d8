//! Canonical JSON serialization for deterministic content hashing.
//!
//! Change detection and conflict detection both compare digests of mapped
//! records, so the byte encoding feeding the hash must be stable across
//! runs and across field insertion order.
//!
//! Canonical JSON here has:
//! - Object keys sorted lexicographically (UTF-8 byte order)
//! - No whitespace
//! - UTF-8 output
//! - Finite numbers only (NaN and infinities rejected)
//!
//! Finite floats are permitted: story points and capacity figures are
//! fractional, and `serde_json` formats floats with shortest-roundtrip
//! encoding, which is deterministic within a single implementation. Hashes
//! are compared only against hashes produced by this module, never against
//! digests computed elsewhere.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur during canonical JSON serialization.
#[derive(Debug, Error)]
pub enum CanonicalJsonError {
    /// Serde JSON conversion failed.
    #[error("serde_json error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Non-finite number (NaN, Infinity) encountered.
    ///
    /// `serde_json` would silently encode these as `null`, which would make
    /// two different records hash identically. They are rejected instead.
    #[error("non-finite number not allowed in canonical JSON: {0}")]
    NonFiniteNumber(String),

    /// IO error during writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 encoding error (should never happen with valid JSON).
    #[error("UTF-8 encoding error")]
    Utf8Error,
}

impl serde::ser::Error for CanonicalJsonError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self::Serde(<serde_json::Error as serde::ser::Error>::custom(
            msg.to_string(),
        ))
    }
}

/// Serialize `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns `CanonicalJsonError::Serde` if serialization fails, or
/// `CanonicalJsonError::NonFiniteNumber` if the value contains NaN or an
/// infinity.
#[must_use = "canonical bytes should be used for hashing"]
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalJsonError> {
    reject_non_finite(value)?;
    let v = serde_json::to_value(value)?;
    let mut out = Vec::<u8>::new();
    write_value(&v, &mut out)?;
    Ok(out)
}

/// Same as `to_canonical_bytes`, but returns a UTF-8 String.
///
/// # Errors
///
/// Returns `CanonicalJsonError::Serde` if serialization fails,
/// `CanonicalJsonError::NonFiniteNumber` for NaN/infinities, or
/// `CanonicalJsonError::Utf8Error` if UTF-8 conversion fails.
#[must_use = "canonical string should be used for hashing"]
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    let bytes = to_canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|_| CanonicalJsonError::Utf8Error)
}

/// Computes the SHA-256 content hash of a value's canonical JSON encoding,
/// returned as lowercase hex.
///
/// This is the digest stored on `SyncState.content_hash` and used for
/// no-op detection and conflict detection.
///
/// # Errors
///
/// Returns an error if the value cannot be canonically serialized.
#[must_use = "content hash should be compared or stored"]
pub fn content_hash_hex<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    let bytes = to_canonical_bytes(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn reject_non_finite<T: Serialize>(value: &T) -> Result<(), CanonicalJsonError> {
    value.serialize(NonFiniteRejectingSerializer)
}

struct NonFiniteRejectingSerializer;

struct NonFiniteRejectingCompound;

impl serde::ser::Serializer for NonFiniteRejectingSerializer {
    type Ok = ();
    type Error = CanonicalJsonError;

    type SerializeSeq = NonFiniteRejectingCompound;
    type SerializeTuple = NonFiniteRejectingCompound;
    type SerializeTupleStruct = NonFiniteRejectingCompound;
    type SerializeTupleVariant = NonFiniteRejectingCompound;
    type SerializeMap = NonFiniteRejectingCompound;
    type SerializeStruct = NonFiniteRejectingCompound;
    type SerializeStructVariant = NonFiniteRejectingCompound;

    fn serialize_bool(self, _v: bool) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_i8(self, _v: i8) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_i16(self, _v: i16) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_i32(self, _v: i32) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_i64(self, _v: i64) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_i128(self, _v: i128) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_u8(self, _v: u8) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_u16(self, _v: u16) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_u32(self, _v: u32) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_u64(self, _v: u64) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_u128(self, _v: u128) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(CanonicalJsonError::NonFiniteNumber(v.to_string()))
        }
    }

    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(CanonicalJsonError::NonFiniteNumber(v.to_string()))
        }
    }

    fn serialize_char(self, _v: char) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_str(self, _v: &str) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(NonFiniteRejectingCompound)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Ok(NonFiniteRejectingCompound)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        Ok(NonFiniteRejectingCompound)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Ok(NonFiniteRejectingCompound)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(NonFiniteRejectingCompound)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(NonFiniteRejectingCompound)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Ok(NonFiniteRejectingCompound)
    }
}

impl serde::ser::SerializeSeq for NonFiniteRejectingCompound {
    type Ok = ();
    type Error = CanonicalJsonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        value.serialize(NonFiniteRejectingSerializer)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

impl serde::ser::SerializeTuple for NonFiniteRejectingCompound {
    type Ok = ();
    type Error = CanonicalJsonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        value.serialize(NonFiniteRejectingSerializer)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

impl serde::ser::SerializeTupleStruct for NonFiniteRejectingCompound {
    type Ok = ();
    type Error = CanonicalJsonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        value.serialize(NonFiniteRejectingSerializer)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

impl serde::ser::SerializeTupleVariant for NonFiniteRejectingCompound {
    type Ok = ();
    type Error = CanonicalJsonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        value.serialize(NonFiniteRejectingSerializer)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

impl serde::ser::SerializeMap for NonFiniteRejectingCompound {
    type Ok = ();
    type Error = CanonicalJsonError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Self::Error> {
        key.serialize(NonFiniteRejectingSerializer)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        value.serialize(NonFiniteRejectingSerializer)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

impl serde::ser::SerializeStruct for NonFiniteRejectingCompound {
    type Ok = ();
    type Error = CanonicalJsonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        value.serialize(NonFiniteRejectingSerializer)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

impl serde::ser::SerializeStructVariant for NonFiniteRejectingCompound {
    type Ok = ();
    type Error = CanonicalJsonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        value.serialize(NonFiniteRejectingSerializer)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(())
    }
}

fn write_value(v: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => {
            // Writes JSON string with quotes + escaping, no whitespace.
            serde_json::to_writer(&mut *out, s)?;
        }
        Value::Array(arr) => {
            out.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    out.push(b'{');

    // Collect keys and sort deterministically by UTF-8 byte order.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }

        // Key (JSON string)
        serde_json::to_writer(&mut *out, *k)?;
        out.push(b':');

        // Value - key is guaranteed to exist since we got it from map.keys()
        if let Some(val) = map.get(*k) {
            write_value(val, out)?;
        }
    }

    out.push(b'}');
    Ok(())
}

fn write_number(n: &Number, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    use std::io::Write;

    if let Some(i) = n.as_i64() {
        write!(out, "{i}")?;
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        write!(out, "{u}")?;
        return Ok(());
    }

    // Finite float: serde_json's shortest-roundtrip formatting is stable.
    // Non-finite values cannot be constructed as serde_json::Number, and the
    // pre-pass rejects them before to_value would turn them into null.
    serde_json::to_writer(&mut *out, n)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn sorts_object_keys_and_has_no_whitespace() {
        // Insertion order: summary then projectKey
        let v = json!({"summary":"Fix login","projectKey":"ALPHA"});
        let s = to_canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, r#"{"projectKey":"ALPHA","summary":"Fix login"}"#);
    }

    #[test]
    fn sorts_nested_objects_recursively() {
        let v = json!({
            "b": { "d": 2, "c": 1 },
            "a": 0
        });
        let s = to_canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, r#"{"a":0,"b":{"c":1,"d":2}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let v = json!([3, 2, 1]);
        let s = to_canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, "[3,2,1]");
    }

    #[test]
    fn allows_finite_floats() {
        let v = json!({"storyPoints": 0.5, "velocity": 21.25});
        let s = to_canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, r#"{"storyPoints":0.5,"velocity":21.25}"#);
    }

    #[test]
    fn allows_integers() {
        let v = json!({"x": 125, "y": -42});
        let s = to_canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, r#"{"x":125,"y":-42}"#);
    }

    #[test]
    fn rejects_nan_and_infinity() {
        #[derive(Serialize)]
        struct Wrap {
            x: f64,
        }

        assert!(matches!(
            to_canonical_string(&Wrap { x: f64::NAN }),
            Err(CanonicalJsonError::NonFiniteNumber(_))
        ));

        assert!(matches!(
            to_canonical_string(&Wrap { x: f64::INFINITY }),
            Err(CanonicalJsonError::NonFiniteNumber(_))
        ));

        assert!(matches!(
            to_canonical_string(&Wrap {
                x: f64::NEG_INFINITY
            }),
            Err(CanonicalJsonError::NonFiniteNumber(_))
        ));
    }

    #[test]
    fn string_escaping_is_stable() {
        let v = json!({"s": "a\"b\nc"});
        let s = to_canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, r#"{"s":"a\"b\nc"}"#);
    }

    #[test]
    fn handles_empty_object_and_array() {
        assert_eq!(to_canonical_string(&json!({})).unwrap(), "{}");
        assert_eq!(to_canonical_string(&json!([])).unwrap(), "[]");
        assert_eq!(to_canonical_string(&json!(null)).unwrap(), "null");
    }

    #[test]
    fn content_hash_is_deterministic_across_key_order() {
        let a = json!({"name": "sprint-9", "state": "active"});
        let b = json!({"state": "active", "name": "sprint-9"});
        let ha = content_hash_hex(&a).expect("hash");
        let hb = content_hash_hex(&b).expect("hash");
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn content_hash_differs_for_different_content() {
        let a = json!({"storyPoints": 5});
        let b = json!({"storyPoints": 8});
        assert_ne!(
            content_hash_hex(&a).expect("hash"),
            content_hash_hex(&b).expect("hash")
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        proptest! {
            #[test]
            fn insertion_order_does_not_affect_canonical_output(
                pairs in prop::collection::vec(
                    ("[a-z]{1,8}", "[a-z0-9]{1,16}"),
                    1..10
                )
            ) {
                // Build a HashMap (random iteration order)
                let hashmap: HashMap<String, String> = pairs.iter().cloned().collect();

                // Build a BTreeMap (sorted iteration order)
                let btreemap: BTreeMap<String, String> = pairs.iter().cloned().collect();

                // Both should produce identical canonical JSON
                let from_hash = to_canonical_string(&hashmap)
                    .unwrap_or_else(|e| panic!("failed to canonicalize hashmap: {e}"));
                let from_btree = to_canonical_string(&btreemap)
                    .unwrap_or_else(|e| panic!("failed to canonicalize btreemap: {e}"));

                prop_assert_eq!(from_hash, from_btree);
            }

            #[test]
            fn same_content_same_hash(
                pairs in prop::collection::vec(
                    ("[a-z]{1,5}", -1000i64..1000i64),
                    1..5
                )
            ) {
                let map1: BTreeMap<String, i64> = pairs.iter().cloned().collect();
                let map2: BTreeMap<String, i64> = pairs.iter().cloned().collect();

                let h1 = content_hash_hex(&map1)
                    .unwrap_or_else(|e| panic!("failed to hash map1: {e}"));
                let h2 = content_hash_hex(&map2)
                    .unwrap_or_else(|e| panic!("failed to hash map2: {e}"));

                prop_assert_eq!(h1, h2);
            }
        }
    }
}
