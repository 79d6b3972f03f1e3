//! Transport boundary — the byte-level contract between the protocol engine
//! and the socket that feeds it.
//!
//! The engine never touches a socket directly. Bytes arrive through the
//! connection task, and everything the engine wants to put on the wire goes
//! through a [`Transport`], which only queues. The connection task drains the
//! queue after each processing round.

use bytes::{Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// The outbound half of a connection as seen by the protocol engine.
///
/// Both operations are non-blocking: `send` queues bytes and `shutdown`
/// records that the connection should close once queued bytes are flushed.
pub trait Transport {
    /// Queues `data` for delivery to the peer.
    fn send(&mut self, data: &[u8]);

    /// Requests that the connection be closed after pending bytes are written.
    fn shutdown(&mut self);
}

/// In-memory [`Transport`] used by the connection task.
///
/// # Examples
///
/// ```
/// use wirehttp::transport::{OutboundBuffer, Transport};
///
/// let mut out = OutboundBuffer::new();
/// out.send(b"HTTP/1.1 204 No Content\r\n\r\n");
/// assert_eq!(out.len(), 27);
/// assert!(!out.is_shutdown_requested());
///
/// out.shutdown();
/// assert!(out.is_shutdown_requested());
/// assert_eq!(out.take().len(), 27);
/// assert!(out.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    pending: BytesMut,
    shutdown: bool,
}

impl OutboundBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every queued byte.
    pub fn take(&mut self) -> Bytes {
        self.pending.split().freeze()
    }

    /// Returns the number of queued bytes.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns `true` once [`Transport::shutdown`] has been called.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown
    }
}

impl Transport for OutboundBuffer {
    fn send(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    fn shutdown(&mut self) {
        self.shutdown = true;
    }
}

/// Returns the offset of the first `\r\n` in `buf`, if any.
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, CRLF)
}
