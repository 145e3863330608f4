use super::error::ConnectionError;
use crate::net::{Endpoint, TcpStream, Transport};
use crate::trace::debug;

/// Opens transports for [`ConnectionLoop::connect`](super::ConnectionLoop::connect).
pub trait Connector {
    /// Starts a connection to `host:port`. The returned transport may still
    /// be completing its handshake.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Resolve`] or [`ConnectionError::Connect`].
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn Transport>, ConnectionError>;
}

/// Non-blocking TCP with Nagle disabled.
///
/// Resolution goes through the system resolver and blocks for host names;
/// literal addresses return immediately.
#[derive(Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn Transport>, ConnectionError> {
        let endpoint = Endpoint::resolve(host, port).map_err(|source| ConnectionError::Resolve {
            host: host.to_string(),
            source,
        })?;
        let stream = TcpStream::connect(endpoint).map_err(|source| ConnectionError::Connect {
            address: endpoint.to_string(),
            source,
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%endpoint, error = %e, "set_nodelay failed");
        }
        Ok(Box::new(stream))
    }
}
