//! Incremental HTTP/1.x request parser.
//!
//! The parser is a four-state machine driven by whatever bytes the transport
//! has delivered so far. It consumes only what it has fully interpreted and
//! leaves the rest in the buffer, so a request may arrive in any number of
//! fragments:
//!
//! ```text
//! ExpectRequestLine ──line──▶ ExpectHeaders ──empty line──▶ ExpectBody ──N bytes──▶ Complete
//!                                            └──────── no body ──────────────────────▶ Complete
//! ```
//!
//! An error is a permanent verdict on the byte stream: the parser does not
//! resynchronise, and the owning connection should be closed.

use std::mem;
use std::str;
use std::time::SystemTime;

use bytes::{Buf, BytesMut};
use thiserror::Error;

use super::{Request, Version};
use crate::transport::find_crlf;

const CRLF_LEN: usize = 2;

/// Errors that make a byte stream unparseable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequestLine,

    #[error("unsupported method `{0}`")]
    InvalidMethod(String),

    #[error("unsupported protocol version `{0}`")]
    InvalidVersion(String),

    #[error("malformed header line")]
    InvalidHeader,

    #[error("POST/PUT request without Content-Length")]
    MissingContentLength,

    #[error("invalid Content-Length `{0}`")]
    InvalidContentLength(String),

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
}

impl ParseError {
    /// Returns `true` if the failure happened on the request line, before any
    /// response could meaningfully be framed.
    pub fn is_request_line(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequestLine | Self::InvalidMethod(_) | Self::InvalidVersion(_)
        )
    }
}

/// Outcome of a successful [`RequestParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// A whole request has been parsed.
    Complete,
    /// More bytes are needed; nothing unparsed was consumed.
    Incomplete,
}

/// Where the parser is within the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    ExpectRequestLine,
    ExpectHeaders,
    ExpectBody,
    Complete,
}

/// Per-connection request parser.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use std::time::SystemTime;
/// use wirehttp::http::{ParseStatus, ParserState, RequestParser};
///
/// let mut parser = RequestParser::new();
/// let mut buf = BytesMut::from(&b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel"[..]);
///
/// assert_eq!(parser.parse(&mut buf, SystemTime::now()).unwrap(), ParseStatus::Incomplete);
/// assert_eq!(parser.state(), ParserState::ExpectBody);
///
/// buf.extend_from_slice(b"lo");
/// assert_eq!(parser.parse(&mut buf, SystemTime::now()).unwrap(), ParseStatus::Complete);
/// assert_eq!(&parser.request().body()[..], b"hello");
/// ```
#[derive(Debug, Default)]
pub struct RequestParser {
    state: ParserState,
    request: Request,
    content_length: usize,
    head_bytes: usize,
    head_limit: Option<usize>,
}

impl RequestParser {
    /// Creates a parser waiting for a request line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the request line plus header section at `limit` bytes.
    ///
    /// A head that grows past the cap fails with
    /// [`ParseError::HeadTooLarge`] before the offending line is stored.
    pub fn set_head_limit(&mut self, limit: usize) {
        self.head_limit = Some(limit);
    }

    /// Bytes of request line and headers consumed for the current request.
    pub fn head_bytes(&self) -> usize {
        self.head_bytes
    }

    /// Returns the current state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Returns the request being built (complete once `state()` is `Complete`).
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the request being built, mutably.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Returns `true` once a whole request has been parsed.
    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    /// Moves the parsed request out and resets the parser for the next one.
    pub fn take_request(&mut self) -> Request {
        let request = mem::take(&mut self.request);
        self.reset();
        request
    }

    /// Returns to `ExpectRequestLine` with a fresh, empty request.
    pub fn reset(&mut self) {
        self.state = ParserState::ExpectRequestLine;
        self.request = Request::default();
        self.content_length = 0;
        self.head_bytes = 0;
    }

    // Accounts for one consumed head line, including its CRLF.
    fn charge_head(&mut self, line_len: usize) -> Result<(), ParseError> {
        let total = self.head_bytes + line_len + CRLF_LEN;
        if let Some(limit) = self.head_limit {
            if total > limit {
                return Err(ParseError::HeadTooLarge { limit });
            }
        }
        self.head_bytes = total;
        Ok(())
    }

    /// Advances the state machine over `buf`.
    ///
    /// Interpreted bytes are removed from the front of `buf`; anything after
    /// the end of the current request is left in place. `received_at` is
    /// stamped on the request when its request line is accepted.
    ///
    /// # Errors
    ///
    /// Any [`ParseError`] is final for this byte stream.
    pub fn parse(
        &mut self,
        buf: &mut BytesMut,
        received_at: SystemTime,
    ) -> Result<ParseStatus, ParseError> {
        loop {
            match self.state {
                ParserState::ExpectRequestLine => {
                    let Some(end) = find_crlf(buf) else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    self.charge_head(end)?;
                    self.parse_request_line(&buf[..end])?;
                    self.request.set_received_at(received_at);
                    buf.advance(end + CRLF_LEN);
                    self.state = ParserState::ExpectHeaders;
                }
                ParserState::ExpectHeaders => {
                    let Some(end) = find_crlf(buf) else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    self.charge_head(end)?;
                    if end == 0 {
                        buf.advance(CRLF_LEN);
                        self.finish_headers()?;
                    } else {
                        self.parse_header_line(&buf[..end])?;
                        buf.advance(end + CRLF_LEN);
                    }
                }
                ParserState::ExpectBody => {
                    if buf.len() < self.content_length {
                        return Ok(ParseStatus::Incomplete);
                    }
                    let body = buf.split_to(self.content_length).freeze();
                    self.request.set_body(body);
                    self.state = ParserState::Complete;
                }
                ParserState::Complete => return Ok(ParseStatus::Complete),
            }
        }
    }

    // METHOD SP PATH[?QUERY] SP VERSION
    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = str::from_utf8(line).map_err(|_| ParseError::InvalidRequestLine)?;

        let (method, rest) = line
            .split_once(' ')
            .ok_or(ParseError::InvalidRequestLine)?;
        if !self.request.set_method(method) {
            return Err(ParseError::InvalidMethod(method.to_owned()));
        }

        let (target, version) = rest
            .split_once(' ')
            .ok_or(ParseError::InvalidRequestLine)?;
        match target.split_once('?') {
            Some((path, query)) => {
                self.request.set_path(path);
                self.request.set_query(query);
            }
            None => self.request.set_path(target),
        }

        let version = match version {
            "HTTP/1.1" => Version::Http11,
            "HTTP/1.0" => Version::Http10,
            other => return Err(ParseError::InvalidVersion(other.to_owned())),
        };
        self.request.set_version(version);
        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = str::from_utf8(line).map_err(|_| ParseError::InvalidHeader)?;
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        self.request.add_header(name, value.trim());
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<(), ParseError> {
        if !self.request.method().requires_body_length() {
            self.state = ParserState::Complete;
            return Ok(());
        }

        let raw = self
            .request
            .header("Content-Length")
            .ok_or(ParseError::MissingContentLength)?;
        let length: usize = raw
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(raw.to_owned()))?;

        self.content_length = length;
        self.state = if length == 0 {
            ParserState::Complete
        } else {
            ParserState::ExpectBody
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    const POST: &[u8] = b"POST /users/42?page=2&sort=name&page=3 HTTP/1.1\r\n\
Host: example.com\r\n\
Content-Type: application/json\r\n\
Content-Length: 13\r\n\
\r\n\
{\"name\":\"x\"}\n";

    fn parse_all(raw: &[u8]) -> Result<(ParseStatus, RequestParser, BytesMut), ParseError> {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(raw);
        let status = parser.parse(&mut buf, SystemTime::UNIX_EPOCH)?;
        Ok((status, parser, buf))
    }

    #[test]
    fn parse_simple_get() {
        let (status, parser, rest) = parse_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert!(rest.is_empty());
        let req = parser.request();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header("host"), Some("localhost"));
        assert_eq!(req.received_at(), Some(SystemTime::UNIX_EPOCH));
    }

    #[test]
    fn parse_post_with_query_and_body() {
        let (status, parser, _) = parse_all(POST).unwrap();
        assert_eq!(status, ParseStatus::Complete);
        let req = parser.request();
        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.path(), "/users/42");
        assert_eq!(req.query_param("page"), Some("3"));
        assert_eq!(req.query_param("sort"), Some("name"));
        assert_eq!(&req.body()[..], b"{\"name\":\"x\"}\n");
    }

    #[test]
    fn split_at_every_boundary_yields_same_request() {
        let (_, whole, _) = parse_all(POST).unwrap();

        for split in 0..=POST.len() {
            let mut parser = RequestParser::new();
            let mut buf = BytesMut::from(&POST[..split]);
            let first = parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap();
            if split < POST.len() {
                assert_eq!(first, ParseStatus::Incomplete, "split at {split}");
            }
            buf.extend_from_slice(&POST[split..]);
            let second = parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap();
            assert_eq!(second, ParseStatus::Complete, "split at {split}");
            assert_eq!(parser.request(), whole.request(), "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let (_, whole, _) = parse_all(POST).unwrap();
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::new();
        let mut status = ParseStatus::Incomplete;
        for byte in POST {
            buf.extend_from_slice(&[*byte]);
            status = parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap();
        }
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(parser.request(), whole.request());
    }

    #[test]
    fn incomplete_request_line_consumes_nothing() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"GET /partial HT"[..]);
        assert_eq!(
            parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Incomplete
        );
        assert_eq!(&buf[..], b"GET /partial HT");
        assert_eq!(parser.state(), ParserState::ExpectRequestLine);
    }

    #[test]
    fn header_lines_consumed_as_they_arrive() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: a\r\nAcc"[..]);
        assert_eq!(
            parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Incomplete
        );
        assert_eq!(&buf[..], b"Acc");
        assert_eq!(parser.state(), ParserState::ExpectHeaders);
        assert_eq!(parser.request().header("Host"), Some("a"));
    }

    #[test]
    fn content_length_waits_for_full_body() {
        let mut parser = RequestParser::new();
        let mut buf =
            BytesMut::from(&b"POST /submit HTTP/1.1\r\nContent-Length: 10\r\n\r\n12345"[..]);
        assert_eq!(
            parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Incomplete
        );
        assert_eq!(&buf[..], b"12345");

        buf.extend_from_slice(b"67890");
        assert_eq!(
            parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Complete
        );
        assert_eq!(&parser.request().body()[..], b"1234567890");
        assert!(buf.is_empty());
    }

    #[test]
    fn trailing_bytes_are_left_for_next_request() {
        let raw = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (status, mut parser, mut rest) = parse_all(raw).unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(&rest[..], b"GET /b HTTP/1.1\r\n\r\n");
        assert_eq!(parser.take_request().path(), "/a");

        assert_eq!(
            parser.parse(&mut rest, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Complete
        );
        assert_eq!(parser.request().path(), "/b");
    }

    #[test]
    fn complete_state_is_sticky_until_reset() {
        let (_, mut parser, _) = parse_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut more = BytesMut::from(&b"GET /next HTTP/1.1\r\n\r\n"[..]);
        assert_eq!(
            parser.parse(&mut more, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Complete
        );
        assert_eq!(more.len(), 22);
        assert_eq!(parser.request().path(), "/");
    }

    #[test]
    fn reset_allows_unrelated_request() {
        let (_, mut parser, _) = parse_all(POST).unwrap();
        parser.reset();
        assert_eq!(parser.state(), ParserState::ExpectRequestLine);
        assert_eq!(parser.request(), &Request::default());

        let mut buf = BytesMut::from(&b"DELETE /items/9 HTTP/1.0\r\nX-Trace: 1\r\n\r\n"[..]);
        assert_eq!(
            parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Complete
        );
        let req = parser.request();
        assert_eq!(req.method(), Method::Delete);
        assert_eq!(req.version(), Version::Http10);
        assert!(req.query_params().is_empty());
        assert!(req.body().is_empty());
        assert_eq!(req.header("content-type"), None);
    }

    #[test]
    fn get_ignores_content_length() {
        let (status, parser, rest) =
            parse_all(b"GET / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody").unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert!(parser.request().body().is_empty());
        assert_eq!(&rest[..], b"body");
    }

    #[test]
    fn zero_length_post_completes_without_body() {
        let (status, parser, _) =
            parse_all(b"PUT /x HTTP/1.1\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert_eq!(status, ParseStatus::Complete);
        assert!(parser.request().body().is_empty());
    }

    #[test]
    fn header_value_trimmed_and_duplicates_overwrite() {
        let (_, parser, _) =
            parse_all(b"GET / HTTP/1.1\r\nX-Id:   first  \r\nX-Id:\tsecond\t\r\n\r\n").unwrap();
        assert_eq!(parser.request().header("X-Id"), Some("second"));
        assert_eq!(parser.request().headers().len(), 1);
    }

    #[test]
    fn unknown_method_is_error() {
        let err = parse_all(b"PATCH / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidMethod("PATCH".into()));
        assert!(err.is_request_line());
    }

    #[test]
    fn lowercase_method_is_error() {
        assert!(matches!(
            parse_all(b"get / HTTP/1.1\r\n\r\n"),
            Err(ParseError::InvalidMethod(_))
        ));
    }

    #[test]
    fn bad_version_is_error() {
        for line in [
            &b"GET / HTTP/1.2\r\n\r\n"[..],
            b"GET / HTTP/2.0\r\n\r\n",
            b"GET / HTTP/1.10\r\n\r\n",
        ] {
            assert!(matches!(parse_all(line), Err(ParseError::InvalidVersion(_))));
        }
    }

    #[test]
    fn missing_target_is_error() {
        assert_eq!(
            parse_all(b"GET\r\n\r\n").unwrap_err(),
            ParseError::InvalidRequestLine
        );
        assert_eq!(
            parse_all(b"GET /only-path\r\n\r\n").unwrap_err(),
            ParseError::InvalidRequestLine
        );
    }

    #[test]
    fn header_without_colon_is_error() {
        let err = parse_all(b"GET / HTTP/1.1\r\nBroken header\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidHeader);
        assert!(!err.is_request_line());
    }

    #[test]
    fn post_without_content_length_is_error() {
        assert_eq!(
            parse_all(b"POST /x HTTP/1.1\r\nHost: a\r\n\r\n").unwrap_err(),
            ParseError::MissingContentLength
        );
    }

    #[test]
    fn non_numeric_content_length_is_error() {
        assert!(matches!(
            parse_all(b"POST /x HTTP/1.1\r\nContent-Length: -3\r\n\r\n"),
            Err(ParseError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn head_bytes_count_request_line_and_headers() {
        let raw = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&raw[..]);
        assert_eq!(
            parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap(),
            ParseStatus::Complete
        );
        assert_eq!(parser.head_bytes(), raw.len());

        parser.reset();
        assert_eq!(parser.head_bytes(), 0);
    }

    #[test]
    fn endless_headers_hit_head_limit_before_being_stored() {
        let mut parser = RequestParser::new();
        parser.set_head_limit(64);
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        for i in 0..100 {
            buf.extend_from_slice(format!("X-H{i}: vvvvvvvv\r\n").as_bytes());
        }

        let err = parser.parse(&mut buf, SystemTime::UNIX_EPOCH).unwrap_err();
        assert_eq!(err, ParseError::HeadTooLarge { limit: 64 });
        assert!(!err.is_request_line());
        assert!(parser.head_bytes() <= 64);
        assert!(parser.request().headers().len() < 5);
    }
}
