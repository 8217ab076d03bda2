//! Canonical request construction.
//!
//! [`RequestBuilder`] merges URL, method, headers and parameters with the
//! chosen codecs into a [`RequestDescriptor`]. Everything that can fail
//! (URL parsing, parameter encoding) fails here, before anything is handed
//! to a transport.

use bytes::Bytes;
use url::Url;
use url::form_urlencoded::byte_serialize;

use super::request::{Headers, HttpMethod, RequestDescriptor, find_header};
use crate::codec::{Parameters, RequestSerializer, ResponseDeserializer};
use crate::error::{MessengerError, Result};

/// Name of the content type header written by the builder.
pub const CONTENT_TYPE: &str = "Content-Type";
/// Name of the accept header written by the builder.
pub const ACCEPT: &str = "Accept";

/// Builder for [`RequestDescriptor`]s.
///
/// Header precedence, lowest first: transport headers, negotiated
/// `Content-Type`/`Accept`, default headers, per-call headers.
///
/// # Example
///
/// ```ignore
/// use horizon_messenger::codec::{JsonDeserializer, Parameters, UrlEncodedSerializer};
/// use horizon_messenger::http::{HttpMethod, RequestBuilder};
///
/// let request = RequestBuilder::new("https://api.example.com/search", HttpMethod::Get)
///     .header("X-Trace", "1")
///     .parameters(Parameters::pairs([("q", "rust")]))
///     .build(&UrlEncodedSerializer::new(), &JsonDeserializer::new())?;
///
/// assert_eq!(request.url().as_str(), "https://api.example.com/search?q=rust");
/// ```
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    url: String,
    method: HttpMethod,
    transport_headers: Headers,
    default_headers: Headers,
    headers: Headers,
    parameters: Option<Parameters>,
    body: Option<Bytes>,
}

impl RequestBuilder {
    /// Create a builder for the given URL and method.
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            transport_headers: Headers::new(),
            default_headers: Headers::new(),
            headers: Headers::new(),
            parameters: None,
            body: None,
        }
    }

    /// Headers pre-populated by the transport.
    pub fn transport_headers(mut self, headers: Headers) -> Self {
        self.transport_headers = headers;
        self
    }

    /// Session default headers.
    pub fn default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }

    /// Add a per-call header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add several per-call headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the parameters to encode.
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Set a raw body that bypasses parameter encoding. Used for uploads.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Build the request descriptor.
    pub fn build(
        self,
        serializer: &dyn RequestSerializer,
        deserializer: &dyn ResponseDeserializer,
    ) -> Result<RequestDescriptor> {
        let mut url = Url::parse(&self.url)?;
        let body = match (self.body, &self.parameters) {
            (Some(body), _) => Some(body),
            (None, None) => None,
            (None, Some(parameters)) => {
                if self.method != HttpMethod::Get || serializer.forced_body_when_get() {
                    Some(serializer.encode(parameters).map_err(encode_failure)?)
                } else {
                    if let Some(query) = serializer.as_query() {
                        let pairs = query.encode_query(parameters).map_err(encode_failure)?;
                        append_query(&mut url, &pairs);
                    }
                    None
                }
            }
        };

        let headers = assemble_headers(
            self.transport_headers,
            self.default_headers,
            self.headers,
            serializer.content_type(),
            deserializer.accepted_content_types(),
        );

        Ok(RequestDescriptor::new(
            url,
            self.method,
            headers,
            body,
            serializer.cache_policy(),
            serializer.timeout(),
        ))
    }
}

fn encode_failure(err: MessengerError) -> MessengerError {
    match err {
        err @ MessengerError::EncodeFailure(_) => err,
        other => MessengerError::encode(other),
    }
}

/// Append `name=value` pairs joined by `&`.
///
/// Names and values use `application/x-www-form-urlencoded` encoding, the
/// same as a form body: a space becomes `+` and reserved bytes are
/// percent-encoded.
fn append_query(url: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        return;
    }
    let form = |text: &str| byte_serialize(text.as_bytes()).collect::<String>();
    let encoded = pairs
        .iter()
        .map(|(name, value)| format!("{}={}", form(name), form(value)))
        .collect::<Vec<_>>()
        .join("&");
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
        _ => encoded,
    };
    url.set_query(Some(&query));
}

/// The `Accept` value for a list of content types.
pub fn accept_value(accepted: &[String]) -> String {
    if accepted.is_empty() {
        "*/*".to_string()
    } else {
        accepted.join(", ")
    }
}

fn assemble_headers(
    transport: Headers,
    defaults: Headers,
    per_call: Headers,
    content_type: Option<&str>,
    accepted: &[String],
) -> Headers {
    let caller_has = |name: &str| {
        find_header(&defaults, name).is_some() || find_header(&per_call, name).is_some()
    };

    let mut headers = transport;
    if let Some(content_type) = content_type
        && !caller_has(CONTENT_TYPE)
    {
        replace_ignoring_case(&mut headers, CONTENT_TYPE, content_type.to_string());
    }
    if !caller_has(ACCEPT) {
        replace_ignoring_case(&mut headers, ACCEPT, accept_value(accepted));
    }
    for (name, value) in defaults.into_iter().chain(per_call) {
        replace_ignoring_case(&mut headers, &name, value);
    }
    headers
}

fn replace_ignoring_case(headers: &mut Headers, name: &str, value: String) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::codec::{
        DataDeserializer, DataSerializer, JsonDeserializer, JsonSerializer, TextDeserializer,
        TextSerializer, UrlEncodedSerializer,
    };
    use crate::http::CachePolicy;

    fn form(pairs: &[(&str, &str)]) -> Parameters {
        Parameters::Form(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_get_with_query_serializer_appends_query() {
        let request = RequestBuilder::new("https://example.com/items", HttpMethod::Get)
            .parameters(form(&[("a", "1"), ("b", "2")]))
            .build(&UrlEncodedSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        let url = request.url().as_str();
        assert!(
            url.ends_with("?a=1&b=2") || url.ends_with("?b=2&a=1"),
            "unexpected url {url}"
        );
        assert!(request.body().is_none());
    }

    #[test]
    fn test_ordered_pairs_are_deterministic_and_encoded() {
        let request = RequestBuilder::new("https://example.com/search", HttpMethod::Get)
            .parameters(Parameters::pairs([("q", "a b&c"), ("page", "2")]))
            .build(&UrlEncodedSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.url().query(), Some("q=a+b%26c&page=2"));
    }

    #[test]
    fn test_query_names_are_encoded() {
        let request = RequestBuilder::new("https://example.com/search", HttpMethod::Get)
            .parameters(Parameters::pairs([("sort by", "name"), ("a&b", "1=2")]))
            .build(&UrlEncodedSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.url().query(), Some("sort+by=name&a%26b=1%3D2"));
        let pairs: Vec<_> = request.url().query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("sort by".to_string(), "name".to_string()));
        assert_eq!(pairs[1], ("a&b".to_string(), "1=2".to_string()));
    }

    #[test]
    fn test_query_joins_existing_query() {
        let request = RequestBuilder::new("https://example.com/s?x=0", HttpMethod::Get)
            .parameters(Parameters::pairs([("y", "1")]))
            .build(&UrlEncodedSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.url().query(), Some("x=0&y=1"));
    }

    #[test]
    fn test_empty_pairs_leave_url_untouched() {
        let request = RequestBuilder::new("https://example.com/s", HttpMethod::Get)
            .parameters(Parameters::Pairs(Vec::new()))
            .build(&UrlEncodedSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.url().as_str(), "https://example.com/s");
    }

    #[test]
    fn test_get_without_query_support_ignores_parameters() {
        let request = RequestBuilder::new("https://example.com/a", HttpMethod::Get)
            .parameters(Parameters::Json(serde_json::json!({"k": "v"})))
            .build(&JsonSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.url().as_str(), "https://example.com/a");
        assert!(request.body().is_none());
    }

    #[test]
    fn test_post_encodes_body_and_keeps_url() {
        let serializer = JsonSerializer::new();
        let params = Parameters::Json(serde_json::json!({"name": "ada"}));
        let request = RequestBuilder::new("https://example.com/users", HttpMethod::Post)
            .parameters(params.clone())
            .build(&serializer, &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.url().as_str(), "https://example.com/users");
        assert_eq!(request.body(), Some(&serializer.encode(&params).unwrap()));
    }

    #[test]
    fn test_forced_body_when_get() {
        let serializer = UrlEncodedSerializer::new().with_forced_body_when_get(true);
        let request = RequestBuilder::new("https://example.com/q", HttpMethod::Get)
            .parameters(Parameters::pairs([("a", "1")]))
            .build(&serializer, &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.url().query(), None);
        assert_eq!(request.body().map(|b| &b[..]), Some(&b"a=1"[..]));
    }

    #[test]
    fn test_per_call_header_beats_default() {
        let mut defaults = Headers::new();
        defaults.insert("X".into(), "1".into());
        let request = RequestBuilder::new("https://example.com", HttpMethod::Get)
            .default_headers(defaults)
            .header("X", "2")
            .build(&JsonSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.header("X"), Some("2"));
    }

    #[test]
    fn test_per_call_header_beats_default_in_other_case() {
        let mut defaults = Headers::new();
        defaults.insert("X-Env".into(), "default".into());
        let request = RequestBuilder::new("https://example.com", HttpMethod::Get)
            .default_headers(defaults)
            .header("x-env", "per-call")
            .build(&JsonSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        let matching: Vec<_> = request
            .headers()
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("x-env"))
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(request.header("X-Env"), Some("per-call"));
    }

    #[test]
    fn test_default_header_beats_transport() {
        let mut transport = Headers::new();
        transport.insert("User-Agent".into(), "transport".into());
        let mut defaults = Headers::new();
        defaults.insert("User-Agent".into(), "session".into());
        let request = RequestBuilder::new("https://example.com", HttpMethod::Get)
            .transport_headers(transport)
            .default_headers(defaults)
            .build(&DataSerializer::new(), &DataDeserializer::new())
            .unwrap();

        assert_eq!(request.header("user-agent"), Some("session"));
    }

    #[test]
    fn test_negotiated_headers() {
        let request = RequestBuilder::new("https://example.com", HttpMethod::Post)
            .build(&TextSerializer::new(), &JsonDeserializer::new())
            .unwrap();
        assert_eq!(request.header(CONTENT_TYPE), Some("text/plain"));
        assert_eq!(request.header(ACCEPT), Some("application/json"));

        let request = RequestBuilder::new("https://example.com", HttpMethod::Post)
            .build(
                &DataSerializer::new(),
                &TextDeserializer::new().with_accepted(Vec::new()),
            )
            .unwrap();
        assert_eq!(request.header(CONTENT_TYPE), None);
        assert_eq!(request.header(ACCEPT), Some("*/*"));
    }

    #[test]
    fn test_accept_joins_multiple_types() {
        let deserializer = JsonDeserializer::new()
            .with_accepted(vec!["application/json".into(), "text/json".into()]);
        let request = RequestBuilder::new("https://example.com", HttpMethod::Get)
            .build(&JsonSerializer::new(), &deserializer)
            .unwrap();

        assert_eq!(request.header(ACCEPT), Some("application/json, text/json"));
    }

    #[test]
    fn test_caller_content_type_wins() {
        let request = RequestBuilder::new("https://example.com", HttpMethod::Post)
            .header("content-type", "application/vnd.api+json")
            .build(&JsonSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.headers().len(), 2);
        assert_eq!(request.header(CONTENT_TYPE), Some("application/vnd.api+json"));
    }

    #[test]
    fn test_encode_failure_before_dispatch() {
        let err = RequestBuilder::new("https://example.com", HttpMethod::Post)
            .parameters(Parameters::Bytes(Bytes::from_static(b"raw")))
            .build(&JsonSerializer::new(), &JsonDeserializer::new())
            .unwrap_err();

        let MessengerError::EncodeFailure(cause) = err else {
            panic!("expected an encode failure");
        };
        assert!(matches!(
            cause.downcast_ref::<MessengerError>(),
            Some(MessengerError::SerializerMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_url() {
        let err = RequestBuilder::new("::not a url::", HttpMethod::Get)
            .build(&JsonSerializer::new(), &JsonDeserializer::new())
            .unwrap_err();
        assert!(matches!(err, MessengerError::UrlInvalid(_)));
    }

    #[test]
    fn test_serializer_timeout_and_cache_policy() {
        let serializer = JsonSerializer::new()
            .with_timeout(Duration::from_secs(42))
            .with_cache_policy(CachePolicy::ReloadIgnoringLocalCacheData);
        let request = RequestBuilder::new("https://example.com", HttpMethod::Get)
            .build(&serializer, &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.timeout(), Duration::from_secs(42));
        assert_eq!(request.cache_policy(), CachePolicy::ReloadIgnoringLocalCacheData);
    }

    #[test]
    fn test_upload_body_bypasses_serializer() {
        let request = RequestBuilder::new("https://example.com/up", HttpMethod::Put)
            .body(Bytes::from_static(b"payload"))
            .build(&DataSerializer::new(), &JsonDeserializer::new())
            .unwrap();

        assert_eq!(request.body().map(|b| &b[..]), Some(&b"payload"[..]));
    }
}
