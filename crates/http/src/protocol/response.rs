use crate::protocol::{HttpBody, HttpHeaders};

use http::{StatusCode, Version};

/// An HTTP response: status line, headers and body.
///
/// `reason` is the phrase sent after the status code. Decoded responses keep
/// whatever the peer sent; [`HttpResponse::new`] uses the canonical phrase.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HttpHeaders,
    pub body: HttpBody,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::HTTP_11,
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HttpHeaders::new(),
            body: HttpBody::empty(),
        }
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
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}
