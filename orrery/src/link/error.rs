use std::io;

use thiserror::Error;

use super::handle::Handle;

/// Connection loop failures.
///
/// `Poll` aborts a whole `tick()`. Every other variant concerns a single
/// connection, which is removed and reported to its handler.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("readiness check failed: {0}")]
    Poll(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("connection table is full")]
    TableFull,

    #[error("no connection with handle {0}")]
    UnknownHandle(Handle),
}
