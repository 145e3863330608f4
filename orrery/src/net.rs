//! Transport primitives shared by the connection loop and its connectors.

mod endpoint;
mod stream;

pub use endpoint::Endpoint;
pub use stream::{TcpStream, Transport};
