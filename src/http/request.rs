//! The parsed HTTP request value.
//!
//! A [`Request`] is built up field by field by the
//! [`RequestParser`](super::RequestParser) as bytes arrive, then read by the
//! middleware chain, the router, and the handler.

use std::collections::HashMap;
use std::time::SystemTime;

use bytes::Bytes;

use super::{Headers, Method, Version};

/// A parsed HTTP/1.x request.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use std::time::SystemTime;
/// use wirehttp::http::{Method, ParseStatus, RequestParser};
///
/// let mut buf = BytesMut::from(&b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
/// let mut parser = RequestParser::new();
/// assert_eq!(parser.parse(&mut buf, SystemTime::now()).unwrap(), ParseStatus::Complete);
///
/// let request = parser.take_request();
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.header("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    method: Method,
    path: String,
    version: Version,
    headers: Headers,
    query: HashMap<String, String>,
    path_params: HashMap<String, String>,
    body: Bytes,
    received_at: Option<SystemTime>,
}

impl Request {
    /// Creates an empty request: invalid method, empty path, unknown version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the method from a request-line token.
    ///
    /// Returns `false` when the token is not one of the supported methods.
    ///
    /// # Panics
    ///
    /// Panics if a method has already been set during this parse cycle.
    pub fn set_method(&mut self, token: &str) -> bool {
        assert_eq!(
            self.method,
            Method::Invalid,
            "request method set twice in one parse cycle"
        );
        self.method = Method::from_token(token);
        self.method != Method::Invalid
    }

    pub(crate) fn set_path(&mut self, path: &str) {
        self.path.clear();
        self.path.push_str(path);
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn set_received_at(&mut self, at: SystemTime) {
        self.received_at = Some(at);
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// Stores one header line's name and value; a repeated name overwrites.
    pub(crate) fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
    }

    /// Splits `key=value&key2=value2` into query parameters.
    ///
    /// Each pair is split on its first `=`; pairs without one are skipped.
    /// A repeated key keeps its last value.
    pub(crate) fn set_query(&mut self, query: &str) {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                self.query.insert(key.to_owned(), value.to_owned());
            }
        }
    }

    /// Records a value captured by a pattern route.
    pub fn set_path_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.path_params.insert(key.into(), value.into());
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the protocol version from the request line.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Returns every query parameter.
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns a path parameter captured by a pattern route (`param1`, `param2`, …).
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path_params.get(key).map(String::as_str)
    }

    /// Returns every captured path parameter.
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// Returns the request body bytes. Empty unless `Content-Length > 0`.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns when the request line was received.
    pub fn received_at(&self) -> Option<SystemTime> {
        self.received_at
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == Version::Http11,
        }
    }

    /// Decodes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }
}
