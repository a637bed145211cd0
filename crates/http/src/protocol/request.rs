//! HTTP request model.
//!
//! [`HttpRequest`] is what the decoder produces: the request line split into
//! method, normalised path and decoded query items, the headers, and a body
//! that may still be streaming from the connection.

use crate::protocol::{HttpBody, HttpHeaders};

use http::{Method, Version};

/// One `name=value` pair of the query string, percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryItem {
    pub name: String,
    pub value: String,
}

impl QueryItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub version: Version,
    pub path: String,
    pub query: Vec<QueryItem>,
    pub headers: HttpHeaders,
    pub body: HttpBody,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            version: Version::HTTP_11,
            path: path.into(),
            query: Vec::new(),
            headers: HttpHeaders::new(),
            body: HttpBody::empty(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push(QueryItem::new(name, value));
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<HttpBody>) -> Self {
        self.body = body.into();
        self
    }

    /// First query value named `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|item| item.name == name).map(|item| item.value.as_str())
    }

    /// Whether the client asked to keep the connection open with `Connection: keep-alive`.
    pub fn should_keep_alive(&self) -> bool {
        self.headers
            .get(http::header::CONNECTION)
            .is_some_and(|value| value.split(',').any(|token| token.trim().eq_ignore_ascii_case("keep-alive")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use http::header::CONNECTION;

    #[test]
    fn keep_alive_is_case_insensitive() {
        let request = HttpRequest::new(Method::GET, "/").with_header(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        assert!(request.should_keep_alive());

        let request = HttpRequest::new(Method::GET, "/").with_header(CONNECTION, HeaderValue::from_static("close"));
        assert!(!request.should_keep_alive());
        assert!(!HttpRequest::new(Method::GET, "/").should_keep_alive());
    }

    #[test]
    fn query_lookup_returns_the_first_match() {
        let request = HttpRequest::new(Method::GET, "/search").with_query("q", "fish").with_query("q", "chips");
        assert_eq!(request.query_value("q"), Some("fish"));
        assert_eq!(request.query_value("missing"), None);
    }
}
