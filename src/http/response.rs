//! HTTP/1.x response value and serializer.
//!
//! A [`Response`] is created fresh for each request, decorated by middleware
//! and the handler, and serialized exactly once onto the connection.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode, Version};

/// An HTTP/1.x response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use wirehttp::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    status: StatusCode,
    status_message: String,
    headers: Headers,
    body: Vec<u8>,
    close_connection: bool,
}

impl Response {
    /// Creates a new HTTP/1.1 response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::Http11,
            status,
            status_message: status.canonical_reason().to_owned(),
            headers: Headers::new(),
            body: Vec::new(),
            close_connection: false,
        }
    }

    /// Sets a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written by [`write_to`](Self::write_to).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Marks the connection to be closed once this response is sent.
    #[must_use]
    pub fn close_connection(mut self, close: bool) -> Self {
        self.close_connection = close;
        self
    }

    /// Sets a header in place. Intended for middleware and handlers that
    /// receive a `&mut Response`.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the status code and resets the status message to its canonical reason.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.status_message = status.canonical_reason().to_owned();
    }

    /// Overrides the status message written on the status line.
    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    /// Sets the protocol version written on the status line.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Replaces the body.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Sets the `Content-Type` header.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.headers.insert("Content-Type", content_type);
    }

    /// Serializes `value` as the JSON body and sets `Content-Type: application/json`.
    pub fn set_json<T: serde::Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.body = serde_json::to_vec(value)?;
        self.set_content_type("application/json");
        Ok(())
    }

    /// Controls whether `Connection: close` is written and the connection closed.
    pub fn set_close_connection(&mut self, close: bool) {
        self.close_connection = close;
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the status message.
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Returns the protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body bytes.
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` if the connection closes after this response.
    pub fn is_close_connection(&self) -> bool {
        self.close_connection
    }

    /// Appends the wire form of this response to `buf`.
    ///
    /// Writes:
    /// - the status line, `VERSION CODE MESSAGE`;
    /// - every header except `Content-Length` and `Connection`;
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set;
    /// - `Content-Length: <body length>`, replacing any stored value, except on
    ///   `204 No Content` and `304 Not Modified`, which never carry one;
    /// - `Connection: close` or `Connection: Keep-Alive`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let content_length = self.body.len();
        buf.reserve(128 + self.headers.len() * 64 + content_length);

        buf.put(
            format!(
                "{} {} {}\r\n",
                self.version.as_str(),
                self.status.as_u16(),
                self.status_message
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("connection")
            {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        if content_length > 0 && !self.headers.contains("content-type") {
            buf.put(&b"Content-Type: text/plain; charset=utf-8\r\n"[..]);
        }

        if !matches!(self.status, StatusCode::NoContent | StatusCode::NotModified) {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }

        if self.close_connection {
            buf.put(&b"Connection: close\r\n"[..]);
        } else {
            buf.put(&b"Connection: Keep-Alive\r\n"[..]);
        }

        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_slice());
    }

    /// Serializes the response into a new buffer.
    pub fn into_bytes(self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Unknown)
    }
}
