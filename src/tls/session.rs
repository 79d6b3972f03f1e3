use std::io::{Read, Write};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use rustls::{ServerConfig, ServerConnection};
use tracing::{debug, error, info, warn};

use super::{TlsError, TlsState};
use crate::transport::Transport;

/// Per-connection TLS state machine.
///
/// The session never owns the transport: every operation that may produce
/// ciphertext borrows it for the duration of the call. Inbound ciphertext is
/// staged until rustls has framed it; outbound ciphertext is staged and handed
/// to the transport in one `send` per operation.
///
/// # Examples
///
/// ```no_run
/// use bytes::BytesMut;
/// use wirehttp::tls::{TlsSession, TlsSettings, build_server_config};
/// use wirehttp::transport::OutboundBuffer;
///
/// # fn demo(settings: &TlsSettings, ciphertext: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
/// let config = build_server_config(settings)?;
/// let mut session = TlsSession::new(config)?;
/// let mut out = OutboundBuffer::new();
/// let mut plaintext = BytesMut::new();
///
/// session.on_read(&mut out, ciphertext, &mut plaintext)?;
/// // `out` now holds handshake bytes for the peer; `plaintext` any request data.
/// # Ok(())
/// # }
/// ```
pub struct TlsSession {
    conn: ServerConnection,
    state: TlsState,
    inbound: BytesMut,
    outbound: Vec<u8>,
}

impl TlsSession {
    /// Creates a session in [`TlsState::Handshaking`].
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Handshake`] if rustls refuses to start a connection
    /// with `config`.
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config).map_err(TlsError::Handshake)?;
        Ok(Self {
            conn,
            state: TlsState::Handshaking,
            inbound: BytesMut::with_capacity(16 * 1024),
            outbound: Vec::with_capacity(16 * 1024),
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> TlsState {
        self.state
    }

    /// Returns `true` once application data can flow.
    pub fn is_established(&self) -> bool {
        self.state == TlsState::Established
    }

    /// Returns the negotiated protocol version, once known.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Returns the negotiated cipher suite, once known.
    pub fn cipher_suite(&self) -> Option<rustls::SupportedCipherSuite> {
        self.conn.negotiated_cipher_suite()
    }

    /// Feeds ciphertext received from the peer through the engine.
    ///
    /// Drives the handshake while [`TlsState::Handshaking`] and appends every
    /// decrypted byte to `plaintext`. Handshake replies, alerts and
    /// close_notify responses are queued on `transport`. Returns the number
    /// of plaintext bytes appended, which may be zero.
    ///
    /// # Errors
    ///
    /// [`TlsError::Closed`] if the session is already terminal. Engine
    /// failures move the session to [`TlsState::Failed`], request transport
    /// shutdown, and are returned as [`TlsError::Handshake`] or
    /// [`TlsError::Record`].
    pub fn on_read(
        &mut self,
        transport: &mut impl Transport,
        data: &[u8],
        plaintext: &mut BytesMut,
    ) -> Result<usize, TlsError> {
        if self.state.is_terminal() {
            return Err(TlsError::Closed);
        }

        self.inbound.extend_from_slice(data);
        let result = self.drain_inbound(plaintext);
        self.flush(transport);

        match result {
            Ok(delivered) => {
                if self.state == TlsState::ShuttingDown {
                    transport.shutdown();
                }
                Ok(delivered)
            }
            Err(e) if e.is_retryable() => Ok(0),
            Err(e) => {
                self.fail(transport, &e);
                Err(e)
            }
        }
    }

    /// Encrypts `data` and queues the resulting records on `transport`.
    ///
    /// # Errors
    ///
    /// [`TlsError::NotEstablished`] unless the session is
    /// [`TlsState::Established`]; nothing is buffered in that case.
    pub fn send(&mut self, transport: &mut impl Transport, data: &[u8]) -> Result<(), TlsError> {
        if self.state != TlsState::Established {
            return Err(TlsError::NotEstablished);
        }

        let mut rest = data;
        while !rest.is_empty() {
            let written = self.conn.writer().write(rest)?;
            rest = &rest[written..];
            self.flush(transport);
            if written == 0 && !self.conn.wants_write() {
                return Err(TlsError::Closed);
            }
        }
        Ok(())
    }

    /// Starts a server-initiated shutdown: queues close_notify, moves to
    /// [`TlsState::ShuttingDown`] and asks the transport to close.
    ///
    /// A session that is already terminal is left as it is.
    pub fn close(&mut self, transport: &mut impl Transport) {
        if self.state.is_terminal() {
            return;
        }
        self.conn.send_close_notify();
        self.state = TlsState::ShuttingDown;
        self.flush(transport);
        transport.shutdown();
        debug!("TLS close_notify sent");
    }

    fn drain_inbound(&mut self, plaintext: &mut BytesMut) -> Result<usize, TlsError> {
        let mut delivered = 0;

        while !self.inbound.is_empty() {
            let mut staged: &[u8] = &self.inbound;
            let before = staged.len();
            self.conn.read_tls(&mut staged)?;
            let consumed = before - staged.len();
            self.inbound.advance(consumed);

            let io = match self.conn.process_new_packets() {
                Ok(io) => io,
                Err(e) if self.state == TlsState::Handshaking => {
                    return Err(TlsError::Handshake(e));
                }
                Err(e) => return Err(TlsError::Record(e)),
            };

            if self.state == TlsState::Handshaking && !self.conn.is_handshaking() {
                self.state = TlsState::Established;
                info!(
                    version = ?self.conn.protocol_version(),
                    suite = ?self.conn.negotiated_cipher_suite().map(|s| s.suite()),
                    "TLS handshake complete"
                );
            }

            // Data sent in the same flight as the client's Finished is
            // readable as soon as the handshake completes.
            let available = io.plaintext_bytes_to_read();
            if available > 0 {
                let start = plaintext.len();
                plaintext.resize(start + available, 0);
                self.conn.reader().read_exact(&mut plaintext[start..])?;
                delivered += available;
            }

            if io.peer_has_closed() {
                debug!("peer sent close_notify");
                self.conn.send_close_notify();
                self.state = TlsState::ShuttingDown;
                break;
            }

            if consumed == 0 {
                break;
            }
        }

        Ok(delivered)
    }

    fn flush(&mut self, transport: &mut impl Transport) {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.outbound) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "failed to stage outbound TLS records");
                    break;
                }
            }
        }
        if !self.outbound.is_empty() {
            transport.send(&self.outbound);
            self.outbound.clear();
        }
    }

    fn fail(&mut self, transport: &mut impl Transport, cause: &TlsError) {
        error!(error = %cause, state = ?self.state, "fatal TLS error");
        self.state = TlsState::Failed;
        self.inbound.clear();
        transport.shutdown();
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("state", &self.state)
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}
