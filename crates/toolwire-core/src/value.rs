//! Schema-free JSON values.
//!
//! [`StructuredValue`] carries payloads whose shape is not known statically:
//! tool arguments, tool results, error data and raw `result` members. Unlike
//! [`serde_json::Value`] it keeps integers and floats apart, so `1` and `1.0`
//! survive a round trip exactly as the source text wrote them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::error::{ClientError, ClientResult};

/// A JSON value with distinct integer and float variants.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StructuredValue {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON `true` / `false`.
    Bool(bool),
    /// A number written without fraction or exponent.
    Int(i64),
    /// Any other number.
    Float(f64),
    /// A JSON string.
    String(String),
    /// A JSON array.
    Array(Vec<StructuredValue>),
    /// A JSON object. Keys are unique; a repeated key keeps the last value.
    Object(HashMap<String, StructuredValue>),
}

impl StructuredValue {
    /// Parses JSON text.
    pub fn parse(bytes: &[u8]) -> ClientResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Decoding(e.to_string()))
    }

    /// Serializes to compact JSON. Object key order is unspecified.
    pub fn to_json_bytes(&self) -> ClientResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ClientError::Encoding(e.to_string()))
    }

    /// Like [`to_json_bytes`](Self::to_json_bytes), as a string.
    pub fn to_json_string(&self) -> ClientResult<String> {
        serde_json::to_string(self).map_err(|e| ClientError::Encoding(e.to_string()))
    }

    /// Serializes to compact JSON with object keys sorted.
    ///
    /// Used wherever output is read by humans (logs, traffic views, tests).
    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        serde_json::to_string(&Canonical(self)).unwrap_or_else(|_| "null".to_owned())
    }

    /// Serializes to indented JSON with object keys sorted.
    #[must_use]
    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&Canonical(self)).unwrap_or_else(|_| "null".to_owned())
    }

    /// Converts a host dynamic value.
    ///
    /// Classification order is bool, integer, float, string, array, object.
    /// Booleans are checked first so they can never be read back as 0/1.
    #[must_use]
    pub fn from_dynamic(value: Value) -> Self {
        match value {
            Value::Bool(b) => StructuredValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StructuredValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    StructuredValue::Float(f)
                } else {
                    StructuredValue::Null
                }
            }
            Value::String(s) => StructuredValue::String(s),
            Value::Array(items) => {
                StructuredValue::Array(items.into_iter().map(Self::from_dynamic).collect())
            }
            Value::Object(map) => StructuredValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_dynamic(v)))
                    .collect(),
            ),
            Value::Null => StructuredValue::Null,
        }
    }

    /// Converts any serializable host value.
    ///
    /// Values with no JSON representation (for example maps keyed by tuples)
    /// become [`StructuredValue::Null`] instead of failing.
    #[must_use]
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::from_dynamic(v),
            Err(err) => {
                log::debug!(target: crate::logging::targets::CODEC, "unrepresentable value mapped to null: {err}");
                StructuredValue::Null
            }
        }
    }

    /// Converts back to a host dynamic value. Non-finite floats become `null`.
    #[must_use]
    pub fn to_dynamic(&self) -> Value {
        match self {
            StructuredValue::Null => Value::Null,
            StructuredValue::Bool(b) => Value::Bool(*b),
            StructuredValue::Int(i) => Value::Number((*i).into()),
            StructuredValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            StructuredValue::String(s) => Value::String(s.clone()),
            StructuredValue::Array(items) => {
                Value::Array(items.iter().map(StructuredValue::to_dynamic).collect())
            }
            StructuredValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_dynamic()))
                    .collect(),
            ),
        }
    }

    /// Encodes a typed value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> ClientResult<Self> {
        serde_json::to_value(value)
            .map(Self::from_dynamic)
            .map_err(|e| ClientError::Encoding(e.to_string()))
    }

    /// Decodes into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_value(self.to_dynamic()).map_err(|e| ClientError::Decoding(e.to_string()))
    }

    /// Returns an empty object.
    #[must_use]
    pub fn object() -> Self {
        StructuredValue::Object(HashMap::new())
    }

    /// Returns true for JSON `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, StructuredValue::Null)
    }

    /// Returns the boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StructuredValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer. Floats are not narrowed.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StructuredValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric value, widening integers.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StructuredValue::Int(i) => Some(*i as f64),
            StructuredValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string contents, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StructuredValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements of an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[StructuredValue]> {
        match self {
            StructuredValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the members of an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&HashMap<String, StructuredValue>> {
        match self {
            StructuredValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Looks up a member of an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StructuredValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Name of the JSON type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            StructuredValue::Null => "null",
            StructuredValue::Bool(_) => "boolean",
            StructuredValue::Int(_) => "integer",
            StructuredValue::Float(_) => "number",
            StructuredValue::String(_) => "string",
            StructuredValue::Array(_) => "array",
            StructuredValue::Object(_) => "object",
        }
    }
}

impl fmt::Display for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl From<Value> for StructuredValue {
    fn from(value: Value) -> Self {
        Self::from_dynamic(value)
    }
}

impl From<&StructuredValue> for Value {
    fn from(value: &StructuredValue) -> Self {
        value.to_dynamic()
    }
}

impl From<bool> for StructuredValue {
    fn from(b: bool) -> Self {
        StructuredValue::Bool(b)
    }
}

impl From<i64> for StructuredValue {
    fn from(i: i64) -> Self {
        StructuredValue::Int(i)
    }
}

impl From<i32> for StructuredValue {
    fn from(i: i32) -> Self {
        StructuredValue::Int(i.into())
    }
}

impl From<f64> for StructuredValue {
    fn from(f: f64) -> Self {
        StructuredValue::Float(f)
    }
}

impl From<&str> for StructuredValue {
    fn from(s: &str) -> Self {
        StructuredValue::String(s.to_owned())
    }
}

impl From<String> for StructuredValue {
    fn from(s: String) -> Self {
        StructuredValue::String(s)
    }
}

impl<T: Into<StructuredValue>> From<Vec<T>> for StructuredValue {
    fn from(items: Vec<T>) -> Self {
        StructuredValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<HashMap<String, StructuredValue>> for StructuredValue {
    fn from(map: HashMap<String, StructuredValue>) -> Self {
        StructuredValue::Object(map)
    }
}

impl<K: Into<String>, V: Into<StructuredValue>> FromIterator<(K, V)> for StructuredValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        StructuredValue::Object(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Serialize for StructuredValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StructuredValue::Null => serializer.serialize_unit(),
            StructuredValue::Bool(b) => serializer.serialize_bool(*b),
            StructuredValue::Int(i) => serializer.serialize_i64(*i),
            StructuredValue::Float(f) => serializer.serialize_f64(*f),
            StructuredValue::String(s) => serializer.serialize_str(s),
            StructuredValue::Array(items) => serializer.collect_seq(items),
            StructuredValue::Object(map) => serializer.collect_map(map),
        }
    }
}

/// Serializes a [`StructuredValue`] with object keys in sorted order.
#[derive(Debug, Clone, Copy)]
pub struct Canonical<'a>(pub &'a StructuredValue);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            StructuredValue::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            StructuredValue::Object(map) => {
                let sorted: BTreeMap<&str, Canonical<'_>> = map
                    .iter()
                    .map(|(k, v)| (k.as_str(), Canonical(v)))
                    .collect();
                serializer.collect_map(sorted)
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StructuredValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StructuredValueVisitor)
    }
}

struct StructuredValueVisitor;

impl<'de> Visitor<'de> for StructuredValueVisitor {
    type Value = StructuredValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(StructuredValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(StructuredValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        StructuredValue::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(StructuredValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(StructuredValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        // Out of i64 range: keep the magnitude rather than fail.
        Ok(i64::try_from(v).map_or(StructuredValue::Float(v as f64), StructuredValue::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(StructuredValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(StructuredValue::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(StructuredValue::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(StructuredValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = HashMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, StructuredValue>()? {
            map.insert(key, value);
        }
        Ok(StructuredValue::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_keeps_int_and_float_apart() {
        let value = StructuredValue::parse(br#"{"a":1,"b":1.0,"c":-3,"d":2.5e3}"#).unwrap();
        assert_eq!(value.get("a"), Some(&StructuredValue::Int(1)));
        assert_eq!(value.get("b"), Some(&StructuredValue::Float(1.0)));
        assert_eq!(value.get("c"), Some(&StructuredValue::Int(-3)));
        assert_eq!(value.get("d"), Some(&StructuredValue::Float(2500.0)));
    }

    #[test]
    fn float_survives_reserialization() {
        let value = StructuredValue::parse(b"[1,1.0]").unwrap();
        let text = String::from_utf8(value.to_json_bytes().unwrap()).unwrap();
        assert_eq!(value.to_json_string().unwrap(), text);
        assert_eq!(text, "[1,1.0]");
    }

    #[test]
    fn huge_unsigned_becomes_float() {
        let value = StructuredValue::parse(b"18446744073709551615").unwrap();
        assert!(matches!(value, StructuredValue::Float(_)));
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = StructuredValue::parse(b"{not json").unwrap_err();
        assert!(matches!(err, ClientError::Decoding(_)));
    }

    #[test]
    fn duplicate_keys_keep_last() {
        let value = StructuredValue::parse(br#"{"k":1,"k":2}"#).unwrap();
        assert_eq!(value.as_object().map(HashMap::len), Some(1));
        assert_eq!(value.get("k"), Some(&StructuredValue::Int(2)));
    }

    #[test]
    fn canonical_string_sorts_keys_recursively() {
        let value = StructuredValue::from_dynamic(json!({
            "zeta": 1,
            "alpha": {"y": true, "b": null},
            "mid": [ {"z": 1, "a": 2} ]
        }));
        assert_eq!(
            value.to_canonical_string(),
            r#"{"alpha":{"b":null,"y":true},"mid":[{"a":2,"z":1}],"zeta":1}"#
        );
        assert_eq!(value.to_string(), value.to_canonical_string());
    }

    #[test]
    fn from_dynamic_classifies_booleans_before_numbers() {
        let value = StructuredValue::from_dynamic(json!([true, 0, 1, 1.5, "s"]));
        assert_eq!(
            value,
            StructuredValue::Array(vec![
                StructuredValue::Bool(true),
                StructuredValue::Int(0),
                StructuredValue::Int(1),
                StructuredValue::Float(1.5),
                StructuredValue::String("s".into()),
            ])
        );
    }

    #[test]
    fn from_serializable_maps_unrepresentable_to_null() {
        let mut weird = HashMap::new();
        weird.insert((1, 2), "tuple key");
        assert_eq!(StructuredValue::from_serializable(&weird), StructuredValue::Null);

        let flag = StructuredValue::from_serializable(&false);
        assert_eq!(flag, StructuredValue::Bool(false));
    }

    #[test]
    fn to_dynamic_is_total() {
        let value: StructuredValue = vec![
            StructuredValue::Float(f64::NAN),
            StructuredValue::Int(i64::MIN),
            StructuredValue::from("x"),
        ]
        .into();
        assert_eq!(value.to_dynamic(), json!([null, i64::MIN, "x"]));
    }

    #[test]
    fn dynamic_round_trip() {
        let source = json!({"name": "echo", "args": {"n": 3, "ratio": 0.5, "tags": ["a", "b"]}});
        let value = StructuredValue::from_dynamic(source.clone());
        assert_eq!(value.to_dynamic(), source);
    }

    #[test]
    fn typed_encode_and_decode() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Point {
            x: i64,
            y: f64,
        }

        let value = StructuredValue::encode(&Point { x: 1, y: 2.5 }).unwrap();
        assert_eq!(value.get("x"), Some(&StructuredValue::Int(1)));
        let back: Point = value.decode().unwrap();
        assert_eq!(back, Point { x: 1, y: 2.5 });

        let err = StructuredValue::from("nope").decode::<Point>().unwrap_err();
        assert!(matches!(err, ClientError::Decoding(_)));
    }

    #[test]
    fn collect_into_object() {
        let value: StructuredValue = [("a", 1i64), ("b", 2i64)].into_iter().collect();
        assert_eq!(value.type_name(), "object");
        assert_eq!(value.get("b").and_then(StructuredValue::as_i64), Some(2));
    }

    #[test]
    fn accessors_match_only_their_variant() {
        let value = StructuredValue::parse(br#"{"n":null,"b":true,"i":3,"f":3.0,"s":"x","a":[1]}"#)
            .unwrap();
        let field = |key| value.get(key).unwrap();

        assert!(field("n").is_null());
        assert!(!field("b").is_null());
        assert_eq!(field("b").as_bool(), Some(true));
        assert_eq!(field("i").as_bool(), None);
        assert_eq!(field("i").as_i64(), Some(3));
        assert_eq!(field("f").as_i64(), None);
        assert_eq!(field("i").as_f64(), Some(3.0));
        assert_eq!(field("s").as_str(), Some("x"));
        assert_eq!(field("a").as_array(), Some(&[StructuredValue::Int(1)][..]));
        assert!(field("a").as_object().is_none());
        assert_eq!(value.as_object().map(HashMap::len), Some(6));
    }
}
