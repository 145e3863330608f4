use super::error::ConnectionError;
use super::handle::Handle;
use crate::net::Transport;

/// Bytes waiting to be written to one connection.
///
/// Appending never blocks and never touches the socket; the loop drains the
/// front of the buffer in later ticks.
#[derive(Debug, Default)]
pub struct Outbox {
    buf: Vec<u8>,
}

impl Outbox {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Up to `max` bytes from the front.
    #[must_use]
    pub fn front(&self, max: usize) -> &[u8] {
        &self.buf[..self.buf.len().min(max)]
    }

    /// Drops `n` bytes from the front after a successful write.
    pub fn consume(&mut self, n: usize) {
        self.buf.drain(..n.min(self.buf.len()));
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Per-connection protocol logic, called from `tick()` on the loop's thread.
pub trait LinkHandler {
    /// The connection is usable: immediately for attached transports, on the
    /// first writable readiness for outgoing connects.
    fn on_connected(&mut self, _handle: Handle, _outbox: &mut Outbox) {}

    /// `bytes` were read (never empty). An error closes the connection and
    /// is passed back to `on_disconnect`.
    ///
    /// # Errors
    ///
    /// Whatever the protocol considers fatal for this connection.
    fn on_readable(
        &mut self,
        handle: Handle,
        bytes: &[u8],
        outbox: &mut Outbox,
    ) -> Result<(), ConnectionError>;

    /// `written` bytes left the outbox.
    fn on_writable(&mut self, _handle: Handle, _written: usize, _outbox: &mut Outbox) {}

    /// The connection failed and has already been removed from the table.
    fn on_disconnect(&mut self, _handle: Handle, _error: &ConnectionError) {}
}

/// One entry of the connection table.
pub struct Connection<H> {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) outbox: Outbox,
    pub(crate) handler: H,
    pub(crate) established: bool,
    peer: String,
}

impl<H> Connection<H> {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        handler: H,
        peer: impl Into<String>,
        established: bool,
    ) -> Self {
        Self {
            transport,
            outbox: Outbox::default(),
            handler,
            established,
            peer: peer.into(),
        }
    }

    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    #[must_use]
    pub const fn is_established(&self) -> bool {
        self.established
    }

    /// Human-readable peer description used in logs.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write interest is needed to learn that a connect finished, or to
    /// flush queued bytes.
    pub(crate) fn wants_write(&self) -> bool {
        !self.established || !self.outbox.is_empty()
    }

    pub(crate) fn into_handler(self) -> H {
        self.handler
    }
}
