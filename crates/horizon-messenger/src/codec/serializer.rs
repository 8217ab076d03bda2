//! Request serializers.

use std::time::Duration;

use bytes::Bytes;

use super::Parameters;
use crate::error::{MessengerError, Result};
use crate::http::CachePolicy;

/// Default request timeout declared by the built-in serializers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Encodes request parameters into body bytes.
///
/// Implementations must fail with an error when handed a parameter shape
/// they do not accept. The request builder reports any such failure as
/// [`MessengerError::EncodeFailure`].
pub trait RequestSerializer: Send + Sync {
    /// Content type of the encoded body, if any.
    fn content_type(&self) -> Option<&str>;

    /// Whether GET requests carry an encoded body instead of a query string.
    fn forced_body_when_get(&self) -> bool {
        false
    }

    /// Timeout recorded on requests built with this serializer.
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Cache policy recorded on requests built with this serializer.
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::UseProtocolCachePolicy
    }

    /// Encode parameters into body bytes.
    fn encode(&self, parameters: &Parameters) -> Result<Bytes>;

    /// This serializer as a query encoder, if it supports one.
    fn as_query(&self) -> Option<&dyn QuerySerializer> {
        None
    }
}

/// A serializer that can also encode parameters as URL query pairs.
pub trait QuerySerializer: RequestSerializer {
    /// Encode parameters into ordered, not yet percent-encoded, name/value pairs.
    fn encode_query(&self, parameters: &Parameters) -> Result<Vec<(String, String)>>;
}

/// Options shared by the built-in serializers.
#[derive(Clone, Debug)]
pub struct SerializerOptions {
    /// Request timeout.
    pub timeout: Duration,
    /// Cache policy.
    pub cache_policy: CachePolicy,
    /// Send a body with GET requests.
    pub forced_body_when_get: bool,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cache_policy: CachePolicy::UseProtocolCachePolicy,
            forced_body_when_get: false,
        }
    }
}

macro_rules! serializer_options {
    () => {
        fn forced_body_when_get(&self) -> bool {
            self.options.forced_body_when_get
        }

        fn timeout(&self) -> Duration {
            self.options.timeout
        }

        fn cache_policy(&self) -> CachePolicy {
            self.options.cache_policy
        }
    };
}

macro_rules! options_builder {
    ($ty:ident) => {
        impl $ty {
            /// Create a serializer with default options.
            pub fn new() -> Self {
                Self::default()
            }

            /// Set the request timeout.
            pub fn with_timeout(mut self, timeout: Duration) -> Self {
                self.options.timeout = timeout;
                self
            }

            /// Set the cache policy.
            pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
                self.options.cache_policy = policy;
                self
            }

            /// Send an encoded body with GET requests.
            pub fn with_forced_body_when_get(mut self, forced: bool) -> Self {
                self.options.forced_body_when_get = forced;
                self
            }
        }
    };
}

/// Encodes JSON values and string maps as `application/json`.
#[derive(Clone, Debug, Default)]
pub struct JsonSerializer {
    /// Serializer options.
    pub options: SerializerOptions,
}

options_builder!(JsonSerializer);

impl RequestSerializer for JsonSerializer {
    fn content_type(&self) -> Option<&str> {
        Some("application/json")
    }

    serializer_options!();

    fn encode(&self, parameters: &Parameters) -> Result<Bytes> {
        let encoded = match parameters {
            Parameters::Json(value) => serde_json::to_vec(value),
            Parameters::Form(map) => serde_json::to_vec(map),
            other => return Err(MessengerError::mismatch("json or form", other.kind())),
        };
        encoded.map(Bytes::from).map_err(MessengerError::encode)
    }
}

/// Encodes text as `text/plain`.
#[derive(Clone, Debug, Default)]
pub struct TextSerializer {
    /// Serializer options.
    pub options: SerializerOptions,
}

options_builder!(TextSerializer);

impl RequestSerializer for TextSerializer {
    fn content_type(&self) -> Option<&str> {
        Some("text/plain")
    }

    serializer_options!();

    fn encode(&self, parameters: &Parameters) -> Result<Bytes> {
        match parameters {
            Parameters::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            other => Err(MessengerError::mismatch("text", other.kind())),
        }
    }
}

/// Passes raw bytes through without declaring a content type.
#[derive(Clone, Debug, Default)]
pub struct DataSerializer {
    /// Serializer options.
    pub options: SerializerOptions,
}

options_builder!(DataSerializer);

impl RequestSerializer for DataSerializer {
    fn content_type(&self) -> Option<&str> {
        None
    }

    serializer_options!();

    fn encode(&self, parameters: &Parameters) -> Result<Bytes> {
        match parameters {
            Parameters::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(MessengerError::mismatch("bytes", other.kind())),
        }
    }
}

/// Encodes string maps and pairs as `application/x-www-form-urlencoded`.
///
/// GET requests carry the pairs as a query string; other methods carry them
/// as a form body.
#[derive(Clone, Debug, Default)]
pub struct UrlEncodedSerializer {
    /// Serializer options.
    pub options: SerializerOptions,
}

options_builder!(UrlEncodedSerializer);

impl UrlEncodedSerializer {
    fn pairs(parameters: &Parameters) -> Result<Vec<(String, String)>> {
        match parameters {
            Parameters::Form(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Parameters::Pairs(pairs) => Ok(pairs.clone()),
            other => Err(MessengerError::mismatch("form or pairs", other.kind())),
        }
    }
}

impl RequestSerializer for UrlEncodedSerializer {
    fn content_type(&self) -> Option<&str> {
        Some("application/x-www-form-urlencoded")
    }

    serializer_options!();

    fn encode(&self, parameters: &Parameters) -> Result<Bytes> {
        let pairs = Self::pairs(parameters)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Ok(Bytes::from(body))
    }

    fn as_query(&self) -> Option<&dyn QuerySerializer> {
        Some(self)
    }
}

impl QuerySerializer for UrlEncodedSerializer {
    fn encode_query(&self, parameters: &Parameters) -> Result<Vec<(String, String)>> {
        Self::pairs(parameters)
    }
}
