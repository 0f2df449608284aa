use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DecodeError;

/// Wildcard plugin id carried on every relayed envelope.
pub const BROADCAST_PLUGIN_ID: &str = "*";

const TAG_KEY: &str = "__type";
const TAG_BYTES: &str = "Uint8Array";
const TAG_VALUE_KEY: &str = "value";

/// JSON-like payload tree with first-class binary nodes.
///
/// The wire channel is text-only, so `Bytes` nodes serialize as
/// `{"__type":"Uint8Array","value":"<base64>"}` and are restored
/// byte-for-byte on decode, at any nesting depth. Every other variant
/// maps 1:1 onto plain JSON.
#[derive(Clone, Debug, PartialEq)]
pub enum PluginValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<PluginValue>),
    Object(BTreeMap<String, PluginValue>),
}

impl PluginValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, PluginValue>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Lossy view as plain JSON: binary nodes appear in their tagged wire
    /// form. Useful for handing payloads to serde-typed consumers.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Number(n) => serde_json::Value::Number(n),
            Self::String(s) => serde_json::Value::String(s),
            Self::Bytes(bytes) => {
                let mut tagged = serde_json::Map::new();
                tagged.insert(TAG_KEY.to_owned(), serde_json::Value::String(TAG_BYTES.to_owned()));
                tagged.insert(
                    TAG_VALUE_KEY.to_owned(),
                    serde_json::Value::String(BASE64.encode(bytes)),
                );
                serde_json::Value::Object(tagged)
            }
            Self::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Self::into_json).collect())
            }
            Self::Object(fields) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for PluginValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(fields) => {
                Self::Object(fields.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<bool> for PluginValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PluginValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for PluginValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for PluginValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for PluginValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl Serialize for PluginValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Bytes(bytes) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(TAG_KEY, TAG_BYTES)?;
                map.serialize_entry(TAG_VALUE_KEY, &BASE64.encode(bytes))?;
                map.end()
            }
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = PluginValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(PluginValue::Null)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Self::Value, E> {
        Ok(PluginValue::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<Self::Value, E> {
        Ok(PluginValue::Number(n.into()))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Self::Value, E> {
        Ok(PluginValue::Number(n.into()))
    }

    fn visit_f64<E: de::Error>(self, n: f64) -> Result<Self::Value, E> {
        serde_json::Number::from_f64(n)
            .map(PluginValue::Number)
            .ok_or_else(|| E::custom("non-finite number"))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
        Ok(PluginValue::String(s.to_owned()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(PluginValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut fields = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, PluginValue>()? {
            fields.insert(key, value);
        }
        // A two-field object tagged as Uint8Array is a binary node.
        if fields.len() == 2 {
            let tagged = matches!(
                fields.get(TAG_KEY),
                Some(PluginValue::String(tag)) if tag == TAG_BYTES
            );
            if tagged {
                if let Some(PluginValue::String(encoded)) = fields.get(TAG_VALUE_KEY) {
                    let bytes = BASE64
                        .decode(encoded)
                        .map_err(|err| de::Error::custom(format!("invalid Uint8Array base64: {err}")))?;
                    return Ok(PluginValue::Bytes(bytes));
                }
            }
        }
        Ok(PluginValue::Object(fields))
    }
}

impl<'de> Deserialize<'de> for PluginValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Wire-level wrapper around an application payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub plugin_message: PluginValue,
    pub plugin_id: String,
}

impl Envelope {
    pub fn new(payload: PluginValue) -> Self {
        Self {
            plugin_message: payload,
            plugin_id: BROADCAST_PLUGIN_ID.to_owned(),
        }
    }

    /// Wrap any serializable message as an envelope payload.
    pub fn from_message<T: Serialize>(message: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(PluginValue::from(serde_json::to_value(message)?)))
    }
}

/// Encode an envelope for the text channel. Total: the payload tree has
/// string keys and finite JSON numbers only, so serialization cannot fail.
pub fn encode(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).expect("envelope serialization is infallible")
}

/// Decode a wire string back into an envelope, restoring binary nodes.
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    Ok(serde_json::from_str(text)?)
}
