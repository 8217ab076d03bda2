//! Pluggable request/response codecs.
//!
//! A [`RequestSerializer`] turns [`Parameters`] into wire bytes and declares
//! the content type and GET-body policy of the request. A
//! [`ResponseDeserializer`] turns response bytes into a [`Decoded`] value
//! and declares which content types it accepts, which drives the `Accept`
//! header.
//!
//! Serializers that can also express parameters as a URL query implement
//! [`QuerySerializer`] and expose themselves through
//! [`RequestSerializer::as_query`].

mod deserializer;
mod serializer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{MessengerError, Result};

pub use deserializer::{DataDeserializer, JsonDeserializer, ResponseDeserializer, TextDeserializer};
pub use serializer::{
    DEFAULT_TIMEOUT, DataSerializer, JsonSerializer, QuerySerializer, RequestSerializer,
    SerializerOptions, TextSerializer, UrlEncodedSerializer,
};

/// Domain parameters handed to a serializer.
#[derive(Clone, Debug, PartialEq)]
pub enum Parameters {
    /// Raw bytes.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// A JSON value.
    Json(serde_json::Value),
    /// An unordered string map. Query order follows map iteration.
    Form(HashMap<String, String>),
    /// An ordered list of name/value pairs.
    Pairs(Vec<(String, String)>),
}

impl Parameters {
    /// Serialize any `Serialize` value into JSON parameters.
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(MessengerError::encode)
    }

    /// Build ordered pairs from an iterator.
    pub fn pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Short name of the parameter shape, used in mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Form(_) => "form",
            Self::Pairs(_) => "pairs",
        }
    }
}

impl From<Bytes> for Parameters {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Parameters {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Parameters {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Parameters {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Parameters {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<HashMap<String, String>> for Parameters {
    fn from(map: HashMap<String, String>) -> Self {
        Self::Form(map)
    }
}

impl From<Vec<(String, String)>> for Parameters {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::Pairs(pairs)
    }
}

/// A decoded response value.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// Raw bytes.
    Bytes(Bytes),
    /// UTF-8 text.
    Text(String),
    /// A JSON value.
    Json(serde_json::Value),
    /// A file saved by a download deserializer.
    File(PathBuf),
}

impl Decoded {
    /// The bytes, if this is a byte value.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The JSON value, if this is a JSON value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The saved file path, if this is a download result.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            _ => None,
        }
    }

    /// Deserialize a JSON value into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Json(value) => T::deserialize(value).map_err(MessengerError::decode),
            Self::Text(text) => serde_json::from_str(text).map_err(MessengerError::decode),
            Self::Bytes(bytes) => serde_json::from_slice(bytes).map_err(MessengerError::decode),
            Self::File(_) => Err(MessengerError::mismatch("json", "file")),
        }
    }
}
