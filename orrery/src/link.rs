//! Multiplexed connection loop.
//!
//! A single control thread owns a table of non-blocking connections and
//! services them with [`ConnectionLoop::tick`]:
//!
//! ```text
//!   tick()
//!     ├─ table empty?          → return, no syscalls
//!     ├─ poll(fds, timeout=0)  → one readiness check for every connection
//!     └─ ascending handle order:
//!          read  ≤ 4 KiB → LinkHandler::on_readable
//!          write ≤ 4 KiB → LinkHandler::on_writable
//!          failure       → remove, LinkHandler::on_disconnect
//! ```
//!
//! Nothing here blocks except name resolution inside [`TcpConnector`].

mod connection;
mod connector;
mod error;
mod event_loop;
mod handle;
mod selector;

pub use connection::{Connection, LinkHandler, Outbox};
pub use connector::{Connector, TcpConnector};
pub use error::ConnectionError;
pub use event_loop::{ConnectionLoop, IO_CHUNK};
pub use handle::{ConnectionTable, Handle};
pub use selector::{PollSelector, Readiness, Selector, Watch};
