//! Non-blocking byte streams the connection loop can drive.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use mio::net::TcpStream as MioTcpStream;

use super::Endpoint;

/// A duplex, non-blocking byte stream with a pollable descriptor.
///
/// Reads and writes must return `WouldBlock` instead of blocking.
pub trait Transport: Read + Write + AsFd + Send {
    /// Takes the pending socket error (`SO_ERROR`), if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be read.
    fn take_error(&self) -> io::Result<Option<io::Error>>;
}

/// A non-blocking TCP stream.
///
/// `connect` returns immediately; the handshake completes in the background
/// and the stream reports writable once it is established. A failed
/// handshake surfaces as `POLLERR` plus [`Transport::take_error`].
pub struct TcpStream {
    inner: MioTcpStream,
}

impl TcpStream {
    /// Starts a non-blocking connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or the connect is
    /// refused synchronously.
    pub fn connect(endpoint: Endpoint) -> io::Result<Self> {
        let inner = MioTcpStream::connect(endpoint.into())?;
        Ok(Self { inner })
    }

    /// Wraps an already-connected std stream, switching it to non-blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the mode cannot be changed.
    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            inner: MioTcpStream::from_std(stream),
        })
    }

    /// # Errors
    ///
    /// Returns an error while the handshake is still in progress.
    pub fn peer_addr(&self) -> io::Result<Endpoint> {
        self.inner.peer_addr().map(Endpoint::from)
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.inner.set_nodelay(nodelay)
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_send_buffer_size(&self, size: usize) -> io::Result<()> {
        // mio does not expose buffer sizing
        rustix::net::sockopt::set_socket_send_buffer_size(self.inner.as_fd(), size)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        rustix::net::sockopt::set_socket_recv_buffer_size(self.inner.as_fd(), size)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be retrieved.
    pub fn send_buffer_size(&self) -> io::Result<usize> {
        Ok(rustix::net::sockopt::socket_send_buffer_size(self.inner.as_fd())?)
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be retrieved.
    pub fn recv_buffer_size(&self) -> io::Result<usize> {
        Ok(rustix::net::sockopt::socket_recv_buffer_size(self.inner.as_fd())?)
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsFd for TcpStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl Transport for TcpStream {
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.inner.take_error()
    }
}

impl Transport for UnixStream {
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        UnixStream::take_error(self)
    }
}
