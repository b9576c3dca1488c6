//! Value Serialization Strategies
//!
//! Every container is built with a serializer that turns application values
//! into the bytes a backend stores, and back. Three strategies exist:
//!
//! - [`PassThrough`]: no encoding at all. Only backend-native types can be
//!   stored (`Bytes`, `String`, integers and floats in their decimal text
//!   form). Reading `"10"` back as a `String` gives `"10"`, not `10`.
//! - [`Binary`]: MessagePack via `rmp-serde`. Exact round trips for any
//!   serde type, but the stored bytes are opaque to other tools.
//! - [`Json`]: `serde_json`. Only JSON-representable values round-trip.
//!   Corrupt input does not raise: it comes back as [`Loaded::Failed`] so a
//!   single bad record cannot abort a bulk read.

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// The outcome of decoding a stored value.
///
/// Callers must check for `Failed` before treating the value as
/// application data.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<V> {
    /// The payload decoded cleanly
    Value(V),
    /// The payload could not be decoded
    Failed(LoadFailure),
}

impl<V> Loaded<V> {
    pub fn is_failure(&self) -> bool {
        matches!(self, Loaded::Failed(_))
    }

    /// Borrows the decoded value, if any.
    pub fn value(&self) -> Option<&V> {
        match self {
            Loaded::Value(v) => Some(v),
            Loaded::Failed(_) => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Loaded::Value(v) => Some(v),
            Loaded::Failed(_) => None,
        }
    }

    /// Converts the marker into an error.
    pub fn into_result(self) -> StoreResult<V> {
        match self {
            Loaded::Value(v) => Ok(v),
            Loaded::Failed(failure) => Err(StoreError::Load(failure)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Loaded<U> {
        match self {
            Loaded::Value(v) => Loaded::Value(f(v)),
            Loaded::Failed(failure) => Loaded::Failed(failure),
        }
    }
}

/// Raw payload plus the reason it could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    /// The bytes exactly as the backend returned them
    pub raw: Bytes,
    /// The decoder's error message
    pub error: String,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} raw bytes)", self.error, self.raw.len())
    }
}

/// Converts values of type `V` to and from their stored form.
pub trait Serializer<V>: Send + Sync {
    fn serialize(&self, value: &V) -> StoreResult<Bytes>;

    fn deserialize(&self, raw: Bytes) -> StoreResult<Loaded<V>>;

    /// Absent input is the null value, never an error.
    fn deserialize_opt(&self, raw: Option<Bytes>) -> StoreResult<Option<Loaded<V>>> {
        raw.map(|raw| self.deserialize(raw)).transpose()
    }
}

/// Types the hash backend keeps without any encoding.
pub trait Native: Sized {
    fn to_wire(&self) -> Bytes;
    fn from_wire(raw: Bytes) -> StoreResult<Self>;
}

impl Native for Bytes {
    fn to_wire(&self) -> Bytes {
        self.clone()
    }

    fn from_wire(raw: Bytes) -> StoreResult<Self> {
        Ok(raw)
    }
}

impl Native for Vec<u8> {
    fn to_wire(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }

    fn from_wire(raw: Bytes) -> StoreResult<Self> {
        Ok(raw.to_vec())
    }
}

impl Native for String {
    fn to_wire(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }

    fn from_wire(raw: Bytes) -> StoreResult<Self> {
        String::from_utf8(raw.to_vec())
            .map_err(|e| StoreError::TypeMismatch(format!("stored value is not UTF-8: {}", e)))
    }
}

fn parse_text<T: FromStr>(raw: &[u8], what: &str) -> StoreResult<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::TypeMismatch(format!("stored value is not {}", what)))
}

impl Native for i64 {
    fn to_wire(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    fn from_wire(raw: Bytes) -> StoreResult<Self> {
        parse_text(&raw, "an integer")
    }
}

impl Native for f64 {
    fn to_wire(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    fn from_wire(raw: Bytes) -> StoreResult<Self> {
        parse_text(&raw, "a float")
    }
}

/// Stores backend-native values as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl<V: Native> Serializer<V> for PassThrough {
    fn serialize(&self, value: &V) -> StoreResult<Bytes> {
        Ok(value.to_wire())
    }

    fn deserialize(&self, raw: Bytes) -> StoreResult<Loaded<V>> {
        V::from_wire(raw).map(Loaded::Value)
    }
}

/// MessagePack encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binary;

impl<V> Serializer<V> for Binary
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &V) -> StoreResult<Bytes> {
        rmp_serde::to_vec_named(value)
            .map(Bytes::from)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn deserialize(&self, raw: Bytes) -> StoreResult<Loaded<V>> {
        rmp_serde::from_slice(&raw)
            .map(Loaded::Value)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// JSON encoding with load-failure markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl<V> Serializer<V> for Json
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &V) -> StoreResult<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn deserialize(&self, raw: Bytes) -> StoreResult<Loaded<V>> {
        Ok(match serde_json::from_slice(&raw) {
            Ok(value) => Loaded::Value(value),
            Err(e) => Loaded::Failed(LoadFailure {
                raw,
                error: e.to_string(),
            }),
        })
    }
}

/// Names a serialization strategy in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerKind {
    PassThrough,
    Binary,
    #[default]
    Json,
}

impl FromStr for SerializerKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "passthrough" | "pass-through" => Ok(SerializerKind::PassThrough),
            "binary" | "msgpack" => Ok(SerializerKind::Binary),
            "json" => Ok(SerializerKind::Json),
            other => Err(StoreError::Config(format!("unknown serializer '{}'", other))),
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SerializerKind::PassThrough => "raw",
            SerializerKind::Binary => "binary",
            SerializerKind::Json => "json",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        score: Option<f64>,
    }

    fn profile() -> Profile {
        Profile {
            name: "Ariz".to_string(),
            tags: vec!["admin".to_string()],
            score: Some(9.5),
        }
    }

    #[test]
    fn test_passthrough_keeps_native_text() {
        let raw = Serializer::<i64>::serialize(&PassThrough, &10).unwrap();
        assert_eq!(raw, Bytes::from("10"));

        // Without type information the same bytes read back as text
        let as_text: Loaded<String> = PassThrough.deserialize(raw.clone()).unwrap();
        assert_eq!(as_text.value(), Some(&"10".to_string()));

        let as_int: Loaded<i64> = PassThrough.deserialize(raw).unwrap();
        assert_eq!(as_int.value(), Some(&10));
    }

    #[test]
    fn test_passthrough_rejects_non_numeric() {
        let result: StoreResult<Loaded<i64>> = PassThrough.deserialize(Bytes::from("ten"));
        assert!(matches!(result, Err(StoreError::TypeMismatch(_))));
    }

    #[test]
    fn test_binary_struct() {
        let raw = Binary.serialize(&profile()).unwrap();
        let loaded: Loaded<Profile> = Binary.deserialize(raw).unwrap();
        assert_eq!(loaded, Loaded::Value(profile()));
    }

    #[test]
    fn test_binary_corrupt_input_is_an_error() {
        let result: StoreResult<Loaded<Profile>> = Binary.deserialize(Bytes::from_static(b"\xc1"));
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_json_nested_value() {
        let value = json!({"a": [1, 2, {"b": null}], "c": "d"});
        let raw = Json.serialize(&value).unwrap();
        let loaded: Loaded<serde_json::Value> = Json.deserialize(raw).unwrap();
        assert_eq!(loaded.into_value(), Some(value));
    }

    #[test]
    fn test_json_corrupt_input_is_a_marker() {
        let loaded: Loaded<serde_json::Value> =
            Json.deserialize(Bytes::from_static(b"{not json")).unwrap();
        assert!(loaded.is_failure());

        match loaded {
            Loaded::Failed(failure) => {
                assert_eq!(failure.raw, Bytes::from_static(b"{not json"));
                assert!(!failure.error.is_empty());
            }
            Loaded::Value(_) => panic!("expected a load failure"),
        }
    }

    #[test]
    fn test_marker_into_result() {
        let loaded: Loaded<BTreeMap<String, i64>> =
            Json.deserialize(Bytes::from_static(b"[")).unwrap();
        assert!(matches!(loaded.into_result(), Err(StoreError::Load(_))));
    }

    #[test]
    fn test_absent_input_is_null() {
        let loaded: Option<Loaded<serde_json::Value>> = Json.deserialize_opt(None).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_serializer_kind_from_str() {
        assert_eq!("JSON".parse::<SerializerKind>().unwrap(), SerializerKind::Json);
        assert_eq!("msgpack".parse::<SerializerKind>().unwrap(), SerializerKind::Binary);
        assert_eq!("raw".parse::<SerializerKind>().unwrap(), SerializerKind::PassThrough);
        assert!("pickle".parse::<SerializerKind>().is_err());
    }
}
