//! Per-connection protocol state: TLS bridge, parser and outbound queue.
//!
//! A [`Connection`] is owned by exactly one task. It is fed raw bytes and
//! leaves everything it wants written in its [`OutboundBuffer`]; the task
//! does the socket I/O.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::BytesMut;
use tracing::{debug, warn};

use super::Shared;
use crate::http::{ParseError, ParseStatus, RequestParser, Response, StatusCode};
use crate::tls::TlsSession;
use crate::transport::{OutboundBuffer, Transport};

pub(crate) struct Connection {
    shared: Arc<Shared>,
    peer: SocketAddr,
    tls: Option<TlsSession>,
    parser: RequestParser,
    plaintext: BytesMut,
    out: OutboundBuffer,
}

impl Connection {
    pub(crate) fn new(shared: Arc<Shared>, peer: SocketAddr, tls: Option<TlsSession>) -> Self {
        let mut parser = RequestParser::new();
        parser.set_head_limit(shared.max_request_bytes);
        Self {
            shared,
            peer,
            tls,
            parser,
            plaintext: BytesMut::with_capacity(4096),
            out: OutboundBuffer::new(),
        }
    }

    /// Returns the queue of bytes waiting to be written to the socket.
    pub(crate) fn outbound(&mut self) -> &mut OutboundBuffer {
        &mut self.out
    }

    /// Returns `true` once the connection should be closed after flushing.
    pub(crate) fn is_closing(&self) -> bool {
        self.out.is_shutdown_requested()
    }

    /// Handles bytes read from the socket at `received_at`.
    pub(crate) fn on_data(&mut self, data: &[u8], received_at: SystemTime) {
        if self.is_closing() {
            return;
        }

        match &mut self.tls {
            Some(tls) => {
                if let Err(e) = tls.on_read(&mut self.out, data, &mut self.plaintext) {
                    debug!(peer = %self.peer, error = %e, "dropping TLS connection");
                    return;
                }
            }
            None => self.plaintext.extend_from_slice(data),
        }

        self.process(received_at);
    }

    /// Starts an orderly close: close_notify on TLS, then transport shutdown.
    pub(crate) fn close(&mut self) {
        match &mut self.tls {
            Some(tls) => tls.close(&mut self.out),
            None => self.out.shutdown(),
        }
    }

    // Parses and answers every complete request in the plaintext buffer, one
    // at a time.
    fn process(&mut self, received_at: SystemTime) {
        while !self.is_closing() {
            match self.parser.parse(&mut self.plaintext, received_at) {
                Ok(ParseStatus::Incomplete) => {
                    self.enforce_size_limit();
                    return;
                }
                Ok(ParseStatus::Complete) => {
                    let request = self.parser.take_request();
                    let response = self.shared.handle_request(request);
                    self.write_response(&response);
                    if response.is_close_connection() {
                        debug!(peer = %self.peer, "closing after response");
                        self.close();
                    }
                }
                Err(e @ ParseError::HeadTooLarge { .. }) => {
                    warn!(peer = %self.peer, error = %e, "request head too large; sending 413");
                    self.reject_too_large();
                }
                Err(e) if e.is_request_line() => {
                    warn!(peer = %self.peer, error = %e, "malformed request line; closing");
                    self.close();
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "malformed request; sending 400");
                    let response = Response::new(StatusCode::BadRequest)
                        .body(format!("Bad Request: {e}"))
                        .close_connection(true);
                    self.write_response(&response);
                    self.close();
                }
            }
        }
    }

    fn enforce_size_limit(&mut self) {
        let declared = self.parser.request().content_length().unwrap_or(0);
        let pending = self.parser.head_bytes() + self.plaintext.len().max(declared);
        if pending <= self.shared.max_request_bytes {
            return;
        }

        warn!(
            peer = %self.peer,
            pending,
            limit = self.shared.max_request_bytes,
            "request too large; sending 413"
        );
        self.reject_too_large();
    }

    fn reject_too_large(&mut self) {
        let response = Response::new(StatusCode::PayloadTooLarge)
            .body("Request entity too large")
            .close_connection(true);
        self.write_response(&response);
        self.close();
    }

    fn write_response(&mut self, response: &Response) {
        let mut wire = BytesMut::new();
        response.write_to(&mut wire);

        match &mut self.tls {
            Some(tls) => {
                if let Err(e) = tls.send(&mut self.out, &wire) {
                    warn!(peer = %self.peer, error = %e, "failed to encrypt response");
                    self.out.shutdown();
                }
            }
            None => self.out.send(&wire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpServer;
    use crate::config::Config;

    fn connection(server: HttpServer) -> Connection {
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        Connection::new(server.into_shared(), peer, None)
    }

    fn feed(conn: &mut Connection, data: &[u8]) -> String {
        conn.on_data(data, SystemTime::now());
        String::from_utf8(conn.outbound().take().to_vec()).unwrap()
    }

    fn hello_server() -> HttpServer {
        let mut server = HttpServer::new(Config::default()).unwrap();
        server.get("/hello", |_req, resp| {
            resp.set_body("hi");
        });
        server
    }

    #[test]
    fn request_split_across_reads_is_answered_once() {
        let mut conn = connection(hello_server());
        assert_eq!(feed(&mut conn, b"GET /hel"), "");
        assert_eq!(feed(&mut conn, b"lo HTTP/1.1\r\nHost: x\r\n"), "");
        let out = feed(&mut conn, b"\r\n");
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("\r\n\r\nhi"));
        assert!(!conn.is_closing());
    }

    #[test]
    fn pipelined_requests_are_answered_in_order() {
        let mut conn = connection(hello_server());
        let out = feed(
            &mut conn,
            b"GET /hello HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\n\r\n",
        );
        let first = out.find("200 OK").unwrap();
        let second = out.find("404 Not Found").unwrap();
        assert!(first < second);
    }

    #[test]
    fn bad_request_line_closes_silently() {
        let mut conn = connection(hello_server());
        let out = feed(&mut conn, b"BREW /pot HTTP/1.1\r\n\r\n");
        assert_eq!(out, "");
        assert!(conn.is_closing());
    }

    #[test]
    fn bad_header_gets_400_then_close() {
        let mut conn = connection(hello_server());
        let out = feed(&mut conn, b"GET /hello HTTP/1.1\r\nno colon here\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(conn.is_closing());
    }

    #[test]
    fn post_without_content_length_gets_400() {
        let mut conn = connection(hello_server());
        let out = feed(&mut conn, b"POST /hello HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(conn.is_closing());
    }

    #[test]
    fn oversized_body_declaration_gets_413() {
        let mut config = Config::default();
        config.listener.max_request_bytes = 64;
        let mut conn = connection(HttpServer::new(config).unwrap());
        let out = feed(&mut conn, b"POST /upload HTTP/1.1\r\nContent-Length: 1000\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(conn.is_closing());
    }

    #[test]
    fn header_flood_gets_413_before_headers_pile_up() {
        let mut config = Config::default();
        config.listener.max_request_bytes = 1024;
        let mut conn = connection(HttpServer::new(config).unwrap());

        let mut flood = b"GET /hello HTTP/1.1\r\n".to_vec();
        for i in 0..500 {
            flood.extend_from_slice(format!("X-H{i}: {}\r\n", "v".repeat(32)).as_bytes());
        }
        let out = feed(&mut conn, &flood);

        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(conn.is_closing());
        assert!(conn.parser.request().headers().len() < 30);
        assert!(conn.parser.head_bytes() <= 1024);
    }

    #[test]
    fn head_and_buffered_body_count_toward_limit() {
        let mut config = Config::default();
        config.listener.max_request_bytes = 64;
        let mut conn = connection(HttpServer::new(config).unwrap());

        // 45-byte head, 20 bytes declared: neither alone is over the cap.
        let out = feed(&mut conn, b"POST /upload HTTP/1.1\r\nContent-Length: 20\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(conn.is_closing());
    }

    #[test]
    fn connection_close_request_closes_after_response() {
        let mut conn = connection(hello_server());
        let out = feed(&mut conn, b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(out.contains("Connection: close\r\n"));
        assert!(conn.is_closing());

        assert_eq!(feed(&mut conn, b"GET /hello HTTP/1.1\r\n\r\n"), "");
    }
}
