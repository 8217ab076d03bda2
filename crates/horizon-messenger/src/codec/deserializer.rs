//! Response deserializers.

use std::path::Path;

use bytes::Bytes;

use super::Decoded;
use crate::error::{MessengerError, Result};

/// Decodes response bytes into a [`Decoded`] value.
pub trait ResponseDeserializer: Send + Sync {
    /// Content types this deserializer accepts. Empty means any.
    fn accepted_content_types(&self) -> &[String];

    /// Decode a response body.
    fn decode(&self, body: &Bytes) -> Result<Decoded>;

    /// Decode a downloaded file. The default yields the path itself.
    fn decode_file(&self, path: &Path) -> Result<Decoded> {
        Ok(Decoded::File(path.to_path_buf()))
    }
}

fn content_types(types: &[&str]) -> Vec<String> {
    types.iter().map(|t| t.to_string()).collect()
}

/// Decodes `application/json` bodies.
#[derive(Clone, Debug)]
pub struct JsonDeserializer {
    accepted: Vec<String>,
}

impl JsonDeserializer {
    /// Create a JSON deserializer accepting `application/json`.
    pub fn new() -> Self {
        Self {
            accepted: content_types(&["application/json"]),
        }
    }

    /// Override the accepted content types.
    pub fn with_accepted(mut self, accepted: Vec<String>) -> Self {
        self.accepted = accepted;
        self
    }
}

impl Default for JsonDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDeserializer for JsonDeserializer {
    fn accepted_content_types(&self) -> &[String] {
        &self.accepted
    }

    fn decode(&self, body: &Bytes) -> Result<Decoded> {
        serde_json::from_slice(body)
            .map(Decoded::Json)
            .map_err(MessengerError::decode)
    }
}

/// Decodes UTF-8 `text/plain` bodies.
#[derive(Clone, Debug)]
pub struct TextDeserializer {
    accepted: Vec<String>,
}

impl TextDeserializer {
    /// Create a text deserializer accepting `text/plain`.
    pub fn new() -> Self {
        Self {
            accepted: content_types(&["text/plain"]),
        }
    }

    /// Override the accepted content types.
    pub fn with_accepted(mut self, accepted: Vec<String>) -> Self {
        self.accepted = accepted;
        self
    }
}

impl Default for TextDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDeserializer for TextDeserializer {
    fn accepted_content_types(&self) -> &[String] {
        &self.accepted
    }

    fn decode(&self, body: &Bytes) -> Result<Decoded> {
        std::str::from_utf8(body)
            .map(|text| Decoded::Text(text.to_string()))
            .map_err(MessengerError::decode)
    }
}

/// Returns the body bytes unchanged and accepts any content type.
#[derive(Clone, Debug)]
pub struct DataDeserializer {
    accepted: Vec<String>,
}

impl DataDeserializer {
    /// Create a data deserializer accepting `*/*`.
    pub fn new() -> Self {
        Self {
            accepted: content_types(&["*/*"]),
        }
    }
}

impl Default for DataDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDeserializer for DataDeserializer {
    fn accepted_content_types(&self) -> &[String] {
        &self.accepted
    }

    fn decode(&self, body: &Bytes) -> Result<Decoded> {
        Ok(Decoded::Bytes(body.clone()))
    }
}
