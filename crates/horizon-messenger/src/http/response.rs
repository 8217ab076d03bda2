//! HTTP response types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;
use url::Url;

use super::request::{Headers, find_header};

/// Response status line and headers as delivered by the transport.
///
/// Header entries keep duplicates (e.g. several `Set-Cookie` lines).
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: Option<Url>,
    /// Raw header entries in arrival order.
    pub headers: Vec<(String, String)>,
    /// Expected body length, if announced.
    pub expected_length: Option<u64>,
}

impl ResponseHead {
    /// Create a head with a status and no headers.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            url: None,
            headers: Vec::new(),
            expected_length: None,
        }
    }

    /// Add a header entry.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with the given name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the status is in `[200, 300)`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The response as presented at completion.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseDescriptor {
    /// HTTP status code.
    pub status: u16,
    /// Final URL, if known.
    pub url: Option<Url>,
    /// `Content-Type` header value.
    pub content_type: Option<String>,
    /// Headers; repeated names are joined with `", "`.
    pub headers: Headers,
    /// Cookies set by the response, by name.
    pub cookies: BTreeMap<String, String>,
    /// Accumulated body bytes.
    pub body: Option<Bytes>,
}

impl ResponseDescriptor {
    /// Build the completion-time view of a response.
    pub fn from_head(head: &ResponseHead, body: Option<Bytes>) -> Self {
        let mut headers = Headers::new();
        for (name, value) in &head.headers {
            headers
                .entry(name.clone())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }
        let content_type = find_header(&headers, "Content-Type").map(str::to_string);
        let cookies = parse_cookies(
            head.headers
                .iter()
                .filter(|(name, _)| name.eq_ignore_ascii_case("Set-Cookie"))
                .map(|(_, value)| value.as_str()),
        );

        Self {
            status: head.status,
            url: head.url.clone(),
            content_type,
            headers,
            cookies,
            body,
        }
    }

    /// Look up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Parse `Set-Cookie` values into a name/value map. Attributes are dropped.
pub fn parse_cookies<'a>(values: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for value in values {
        let pair = value.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

/// Raw payload of a completed task.
#[derive(Clone, Debug, PartialEq)]
pub enum RawData {
    /// Accumulated body bytes of a data or upload task.
    Bytes(Bytes),
    /// Saved file of a download task.
    File(PathBuf),
}

impl RawData {
    /// The body bytes, if this is an in-memory payload.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::File(_) => None,
        }
    }
}

/// Progress information for uploads and downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes moved by the latest event.
    pub chunk: u64,
    /// Number of bytes transferred so far.
    pub transferred: u64,
    /// Total number of bytes, if known.
    pub expected: Option<u64>,
}

impl TransferProgress {
    /// Get the progress as a fraction (0.0 to 1.0), if total is known.
    pub fn fraction(&self) -> Option<f64> {
        self.expected.map(|total| {
            if total == 0 {
                1.0
            } else {
                self.transferred as f64 / total as f64
            }
        })
    }

    /// Get the progress as a percentage (0 to 100), if total is known.
    pub fn percent(&self) -> Option<u8> {
        self.fraction().map(|f| (f * 100.0).min(100.0) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_head() {
        let head = ResponseHead::new(200)
            .with_header("Content-Type", "application/json")
            .with_header("Set-Cookie", "session=abc; Path=/; HttpOnly")
            .with_header("Set-Cookie", "theme=dark")
            .with_header("Vary", "Accept");
        let response = ResponseDescriptor::from_head(&head, Some(Bytes::from_static(b"{}")));

        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.cookies.get("session").map(String::as_str), Some("abc"));
        assert_eq!(response.cookies.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(
            response.header("set-cookie"),
            Some("session=abc; Path=/; HttpOnly, theme=dark")
        );
    }

    #[test]
    fn test_parse_cookies_skips_malformed() {
        let cookies = parse_cookies(["novalue", "=x", " a = 1 ; Secure"]);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies["a"], "1");
    }

    #[test]
    fn test_progress_fraction() {
        let p = TransferProgress {
            chunk: 10,
            transferred: 50,
            expected: Some(200),
        };
        assert_eq!(p.fraction(), Some(0.25));
        assert_eq!(p.percent(), Some(25));

        let unknown = TransferProgress {
            chunk: 1,
            transferred: 1,
            expected: None,
        };
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn test_success_range() {
        assert!(!ResponseHead::new(199).is_success());
        assert!(ResponseHead::new(200).is_success());
        assert!(ResponseHead::new(299).is_success());
        assert!(!ResponseHead::new(300).is_success());
    }
}
