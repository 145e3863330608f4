use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsFd;

use super::connection::{Connection, LinkHandler};
use super::connector::{Connector, TcpConnector};
use super::error::ConnectionError;
use super::handle::{ConnectionTable, Handle};
use super::selector::{PollSelector, Readiness, Selector, Watch};
use crate::net::Transport;
use crate::trace::{debug, info, trace, warn};

/// Upper bound on bytes moved per connection per direction in one tick.
pub const IO_CHUNK: usize = 4096;

/// Owns every connection and services them from the caller's thread.
///
/// `H` is the per-connection protocol handler. `C` opens new transports and
/// `S` performs the readiness check; both are swappable for tests.
pub struct ConnectionLoop<H, C = TcpConnector, S = PollSelector> {
    table: ConnectionTable<H>,
    connector: C,
    selector: S,
    ready: Vec<Readiness>,
}

impl<H: LinkHandler> ConnectionLoop<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(TcpConnector, PollSelector)
    }
}

impl<H: LinkHandler> Default for ConnectionLoop<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: LinkHandler, C: Connector, S: Selector> ConnectionLoop<H, C, S> {
    pub fn with_parts(connector: C, selector: S) -> Self {
        Self {
            table: ConnectionTable::default(),
            connector,
            selector,
            ready: Vec::new(),
        }
    }

    /// Services every connection once, without blocking.
    ///
    /// Returns the number of connections that had any readiness. A failed
    /// readiness check aborts the tick and leaves the table untouched;
    /// a failure on one connection removes only that connection.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Poll`] if the readiness check itself failed.
    pub fn tick(&mut self) -> Result<usize, ConnectionError> {
        if self.table.is_empty() {
            return Ok(0);
        }

        let handles: Vec<Handle> = self.table.handles().collect();
        self.ready.clear();
        self.ready.resize(handles.len(), Readiness::default());

        let ready_count = {
            let watches: Vec<Watch<'_>> = self
                .table
                .iter()
                .map(|(_, conn)| Watch {
                    fd: conn.transport.as_fd(),
                    write: conn.wants_write(),
                })
                .collect();
            self.selector
                .select(&watches, &mut self.ready)
                .map_err(ConnectionError::Poll)?
        };
        if ready_count == 0 {
            return Ok(0);
        }

        let mut dispatched = 0;
        for (i, handle) in handles.into_iter().enumerate() {
            let readiness = self.ready[i];
            if readiness.is_idle() {
                continue;
            }
            dispatched += 1;

            let Some(conn) = self.table.get_mut(handle) else {
                continue;
            };
            if let Err(error) = service(handle, conn, readiness) {
                self.drop_failed(handle, &error);
            }
        }
        Ok(dispatched)
    }

    /// Opens a connection through the connector and registers it under the
    /// lowest unused handle. The handshake completes during later ticks.
    ///
    /// # Errors
    ///
    /// Connector failures and [`ConnectionError::TableFull`].
    pub fn connect(&mut self, host: &str, port: u16, handler: H) -> Result<Handle, ConnectionError> {
        let transport = self.connector.connect(host, port)?;
        let handle = self
            .table
            .insert(Connection::new(transport, handler, format!("{host}:{port}"), false))?;
        info!(%handle, host, port, "connecting");
        Ok(handle)
    }

    /// Registers an already-connected transport. The handler's
    /// `on_connected` runs before this returns.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::TableFull`].
    pub fn attach(
        &mut self,
        transport: impl Transport + 'static,
        handler: H,
    ) -> Result<Handle, ConnectionError> {
        let handle = self
            .table
            .insert(Connection::new(Box::new(transport), handler, "attached", true))?;
        if let Some(conn) = self.table.get_mut(handle) {
            conn.handler.on_connected(handle, &mut conn.outbox);
        }
        debug!(%handle, "transport attached");
        Ok(handle)
    }

    /// Removes and closes a connection, returning its handler. Calling it
    /// again for the same handle is a no-op.
    pub fn disconnect(&mut self, handle: Handle) -> Option<H> {
        let conn = self.table.remove(handle)?;
        info!(%handle, peer = conn.peer(), "disconnected");
        Some(conn.into_handler())
    }

    /// Queues bytes for `handle`. Nothing is written until a later tick.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::UnknownHandle`].
    pub fn send(&mut self, handle: Handle, bytes: &[u8]) -> Result<(), ConnectionError> {
        let conn = self
            .table
            .get_mut(handle)
            .ok_or(ConnectionError::UnknownHandle(handle))?;
        conn.outbox.push(bytes);
        Ok(())
    }

    #[must_use]
    pub fn handler(&self, handle: Handle) -> Option<&H> {
        self.table.get(handle).map(Connection::handler)
    }

    pub fn handler_mut(&mut self, handle: Handle) -> Option<&mut H> {
        self.table.get_mut(handle).map(|conn| &mut conn.handler)
    }

    #[must_use]
    pub fn connection(&self, handle: Handle) -> Option<&Connection<H>> {
        self.table.get(handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.table.contains(handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.table.handles()
    }

    pub fn selector(&self) -> &S {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut S {
        &mut self.selector
    }

    fn drop_failed(&mut self, handle: Handle, error: &ConnectionError) {
        let Some(mut conn) = self.table.remove(handle) else {
            return;
        };
        match error {
            ConnectionError::Closed => {
                info!(%handle, peer = conn.peer(), "peer closed connection");
            }
            _ => {
                warn!(%handle, peer = conn.peer(), %error, "connection failed");
            }
        }
        conn.handler.on_disconnect(handle, error);
    }
}

/// One bounded read then one bounded write for a ready connection.
fn service<H: LinkHandler>(
    handle: Handle,
    conn: &mut Connection<H>,
    readiness: Readiness,
) -> Result<(), ConnectionError> {
    if readiness.invalid {
        return Err(ConnectionError::Io(io::Error::new(
            ErrorKind::InvalidInput,
            "descriptor is not open",
        )));
    }
    if readiness.error {
        return Err(match conn.transport.take_error()? {
            Some(e) => ConnectionError::Io(e),
            None => ConnectionError::Closed,
        });
    }

    if readiness.readable {
        let mut buf = [0u8; IO_CHUNK];
        match conn.transport.read(&mut buf) {
            Ok(0) => return Err(ConnectionError::Closed),
            Ok(n) => {
                trace!(%handle, bytes = n, "read");
                conn.handler.on_readable(handle, &buf[..n], &mut conn.outbox)?;
            }
            Err(e) if would_retry(&e) => {}
            Err(e) => return Err(e.into()),
        }
    } else if readiness.hangup {
        return Err(ConnectionError::Closed);
    }

    if readiness.writable {
        if !conn.established {
            conn.established = true;
            debug!(%handle, peer = conn.peer(), "connection established");
            conn.handler.on_connected(handle, &mut conn.outbox);
        }
        if !conn.outbox.is_empty() {
            match conn.transport.write(conn.outbox.front(IO_CHUNK)) {
                Ok(0) => return Err(ConnectionError::Closed),
                Ok(n) => {
                    conn.outbox.consume(n);
                    trace!(%handle, bytes = n, "wrote");
                    conn.handler.on_writable(handle, n, &mut conn.outbox);
                }
                Err(e) if would_retry(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

fn would_retry(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Outbox;
    use std::os::unix::net::UnixStream;

    #[derive(Default)]
    struct Echo {
        received: Vec<u8>,
    }

    impl LinkHandler for Echo {
        fn on_readable(
            &mut self,
            _handle: Handle,
            bytes: &[u8],
            outbox: &mut Outbox,
        ) -> Result<(), ConnectionError> {
            self.received.extend_from_slice(bytes);
            outbox.push(bytes);
            Ok(())
        }
    }

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn empty_loop_ticks_to_zero() {
        let mut link: ConnectionLoop<Echo> = ConnectionLoop::new();
        assert_eq!(link.tick().unwrap(), 0);
    }

    #[test]
    fn echoes_across_two_ticks() {
        let (local, mut remote) = pair();
        let mut link = ConnectionLoop::new();
        let h = link.attach(local, Echo::default()).unwrap();

        remote.write_all(b"abc").unwrap();
        assert_eq!(link.tick().unwrap(), 1);
        assert_eq!(link.handler(h).unwrap().received, b"abc");
        assert_eq!(link.connection(h).unwrap().outbox().len(), 3);

        link.tick().unwrap();
        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn read_is_bounded_per_tick() {
        let (local, mut remote) = pair();
        let mut link = ConnectionLoop::new();
        let h = link.attach(local, Echo::default()).unwrap();

        remote.write_all(&vec![7u8; IO_CHUNK + 100]).unwrap();
        link.tick().unwrap();
        assert_eq!(link.handler(h).unwrap().received.len(), IO_CHUNK);
        link.tick().unwrap();
        assert_eq!(link.handler(h).unwrap().received.len(), IO_CHUNK + 100);
    }

    #[test]
    fn send_is_deferred_to_tick() {
        let (local, mut remote) = pair();
        remote.set_nonblocking(true).unwrap();
        let mut link = ConnectionLoop::new();
        let h = link.attach(local, Echo::default()).unwrap();

        link.send(h, b"goto").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            remote.read(&mut buf).unwrap_err().kind(),
            ErrorKind::WouldBlock
        );

        link.tick().unwrap();
        assert_eq!(remote.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"goto");
    }

    #[test]
    fn peer_close_removes_connection() {
        let (local, remote) = pair();
        let mut link = ConnectionLoop::new();
        let h = link.attach(local, Echo::default()).unwrap();
        drop(remote);

        link.tick().unwrap();
        assert!(!link.contains(h));
        assert!(link.is_empty());
    }

    #[test]
    fn send_to_unknown_handle_fails() {
        let mut link: ConnectionLoop<Echo> = ConnectionLoop::new();
        let err = link.send(Handle::new(3), b"x").unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownHandle(h) if h == Handle::new(3)));
    }
}
