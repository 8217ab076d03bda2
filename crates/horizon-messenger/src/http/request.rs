//! HTTP request types.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

/// Header mapping. Keys are unique and case-sensitive as supplied.
pub type Headers = BTreeMap<String, String>;

/// Look up a header by name, ignoring ASCII case.
pub fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// HTTP request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP DELETE method.
    Delete,
    /// HTTP PATCH method.
    Patch,
    /// HTTP HEAD method.
    Head,
    /// HTTP OPTIONS method.
    Options,
}

impl HttpMethod {
    /// Convert to reqwest method.
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }

    /// The method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache behaviour requested for a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Follow the protocol's caching rules.
    #[default]
    UseProtocolCachePolicy,
    /// Always fetch from the origin.
    ReloadIgnoringLocalCacheData,
    /// Use cached data if present, otherwise load.
    ReturnCacheDataElseLoad,
    /// Use cached data only.
    ReturnCacheDataDontLoad,
}

/// A fully built request. Immutable once constructed.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    url: Url,
    method: HttpMethod,
    headers: Headers,
    body: Option<Bytes>,
    cache_policy: CachePolicy,
    timeout: Duration,
}

impl RequestDescriptor {
    pub(crate) fn new(
        url: Url,
        method: HttpMethod,
        headers: Headers,
        body: Option<Bytes>,
        cache_policy: CachePolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            url,
            method,
            headers,
            body,
            cache_policy,
            timeout,
        }
    }

    /// The request URL, including any appended query string.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The HTTP method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// All request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Look up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The request body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The cache policy.
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// The request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Options.as_str(), "OPTIONS");
        assert_eq!(HttpMethod::Patch.to_reqwest(), reqwest::Method::PATCH);
    }

    #[test]
    fn test_find_header_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("Content-Type".into(), "text/plain".into());
        assert_eq!(find_header(&headers, "content-type"), Some("text/plain"));
        assert_eq!(find_header(&headers, "accept"), None);
    }
}
