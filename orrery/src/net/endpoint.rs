//! Network endpoint types.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// A network endpoint (IP address + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    #[must_use]
    pub const fn new(addr: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(addr, port))
    }

    #[must_use]
    pub const fn localhost(port: u16) -> Self {
        Self(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
    }

    /// Resolves `host` through the system resolver. IPv4 results win over
    /// IPv6 when both are returned.
    ///
    /// This blocks on DNS for names that are not literal addresses.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error, or `NotFound` if the name has no
    /// addresses.
    pub fn resolve(host: &str, port: u16) -> io::Result<Self> {
        let mut fallback = None;
        for addr in (host, port).to_socket_addrs()? {
            if addr.is_ipv4() {
                return Ok(Self(addr));
            }
            fallback.get_or_insert(addr);
        }
        fallback.map(Self).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}:{port}"),
            )
        })
    }

    #[must_use]
    pub const fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.0.port()
    }

    #[must_use]
    pub const fn as_socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        ep.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
