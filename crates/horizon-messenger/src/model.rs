//! Plain, serializable snapshots of requests and responses.
//!
//! These carry no behaviour; they exist so callers can persist or display
//! what was sent and received.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::http::{Headers, RequestDescriptor, ResponseDescriptor};

/// Content types the models distinguish.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ContentType {
    /// `application/json`
    Json,
    /// `application/xml`
    Xml,
    /// `text/xml`
    TextXml,
    /// `application/x-www-form-urlencoded`
    UrlEncoded,
    /// Anything else, as sent.
    Other(String),
}

impl ContentType {
    /// The MIME type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::TextXml => "text/xml",
            Self::UrlEncoded => "application/x-www-form-urlencoded",
            Self::Other(other) => other,
        }
    }
}

impl From<&str> for ContentType {
    /// Parameters such as `charset` are ignored when classifying.
    fn from(value: &str) -> Self {
        let essence = value.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/json" => Self::Json,
            "application/xml" => Self::Xml,
            "text/xml" => Self::TextXml,
            "application/x-www-form-urlencoded" => Self::UrlEncoded,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestModel {
    pub url: String,
    pub method: String,
    pub content_type: Option<ContentType>,
    /// Headers without `Cookie`.
    pub headers: Headers,
    pub cookies: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl From<&RequestDescriptor> for RequestModel {
    fn from(request: &RequestDescriptor) -> Self {
        let (cookie_headers, headers) = split_cookies(request.headers(), "Cookie");
        let cookies = cookie_headers
            .iter()
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Self {
            url: request.url().to_string(),
            method: request.method().to_string(),
            content_type: request.header("Content-Type").map(ContentType::from),
            headers,
            cookies,
            body: request.body().map(|b| b.to_vec()),
        }
    }
}

/// Snapshot of a response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseModel {
    pub status: u16,
    pub url: Option<String>,
    pub content_type: Option<ContentType>,
    /// Headers without `Set-Cookie`.
    pub headers: Headers,
    pub cookies: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl ResponseModel {
    /// The body as UTF-8 text, if it is valid UTF-8.
    pub fn text_body(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Look up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::http::find_header(&self.headers, name)
    }
}

impl From<&ResponseDescriptor> for ResponseModel {
    fn from(response: &ResponseDescriptor) -> Self {
        let (_, headers) = split_cookies(&response.headers, "Set-Cookie");
        Self {
            status: response.status,
            url: response.url.as_ref().map(|u| u.to_string()),
            content_type: response.content_type.as_deref().map(ContentType::from),
            headers,
            cookies: response.cookies.clone(),
            body: response.body.as_ref().map(|b| b.to_vec()),
        }
    }
}

fn split_cookies(headers: &Headers, cookie_header: &str) -> (Vec<String>, Headers) {
    let mut cookies = Vec::new();
    let mut rest = Headers::new();
    for (name, value) in headers {
        if name.eq_ignore_ascii_case(cookie_header) {
            cookies.push(value.clone());
        } else {
            rest.insert(name.clone(), value.clone());
        }
    }
    (cookies, rest)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::{JsonDeserializer, JsonSerializer};
    use crate::http::{HttpMethod, RequestBuilder, ResponseHead};

    #[test]
    fn test_content_type_classification() {
        assert_eq!(ContentType::from("application/json; charset=utf-8"), ContentType::Json);
        assert_eq!(ContentType::from("TEXT/XML"), ContentType::TextXml);
        assert_eq!(
            ContentType::from("image/png"),
            ContentType::Other("image/png".to_string())
        );
    }

    #[test]
    fn test_content_type_serializes_as_mime() {
        let json = serde_json::to_string(&ContentType::UrlEncoded).unwrap();
        assert_eq!(json, "\"application/x-www-form-urlencoded\"");
        let back: ContentType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ContentType::UrlEncoded);
    }

    #[test]
    fn test_request_model_splits_cookies() {
        let request = RequestBuilder::new("https://example.com/a", HttpMethod::Post)
            .header("Cookie", "a=1; b=2")
            .parameters(serde_json::json!({"k": "v"}).into())
            .build(&JsonSerializer::new(), &JsonDeserializer::new())
            .unwrap();
        let model = RequestModel::from(&request);

        assert_eq!(model.method, "POST");
        assert_eq!(model.content_type, Some(ContentType::Json));
        assert_eq!(model.cookies.get("b").map(String::as_str), Some("2"));
        assert!(!model.headers.contains_key("Cookie"));
        assert_eq!(model.body.as_deref(), Some(&br#"{"k":"v"}"#[..]));
    }

    #[test]
    fn test_response_model_from_descriptor() {
        let head = ResponseHead::new(200)
            .with_header("Content-Type", "text/xml")
            .with_header("Set-Cookie", "sid=abc; Path=/");
        let response = ResponseDescriptor::from_head(&head, Some(Bytes::from_static(b"<a/>")));
        let model = ResponseModel::from(&response);

        assert_eq!(model.content_type, Some(ContentType::TextXml));
        assert_eq!(model.cookies.get("sid").map(String::as_str), Some("abc"));
        assert!(model.header("set-cookie").is_none());
        assert_eq!(model.text_body(), Some("<a/>"));
    }
}
