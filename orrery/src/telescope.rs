//! Telescope control over the connection loop.
//!
//! Each configured slot (0..=8) holds one telescope server speaking the
//! binary position/goto protocol in [`protocol`]. [`TelescopeManager`] keeps
//! the connections alive, forwards goto commands and exposes the last known
//! pointing of every telescope.

mod client;
mod direction;
mod manager;
pub mod protocol;
mod url;

use thiserror::Error;

use crate::link::ConnectionError;

pub use client::{HISTORY_LEN, PositionSample, TelescopeLink};
pub use direction::Direction;
pub use manager::{MAX_OCULARS, MAX_SLOT, RECONNECT_DELAY, TelescopeManager};
pub use protocol::ProtocolError;
pub use url::TelescopeUrl;

/// Telescope configuration and control failures.
#[derive(Debug, Error)]
pub enum TelescopeError {
    #[error("invalid telescope url '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    #[error("unsupported telescope kind '{0}', only TCP is available")]
    UnsupportedKind(String),

    #[error("telescope slot {0} is out of range 0..={max}", max = MAX_SLOT)]
    InvalidSlot(u8),

    #[error("telescope slot {0} is configured twice")]
    DuplicateSlot(u8),

    #[error("no telescope in slot {0}")]
    UnknownSlot(u8),

    #[error("telescope in slot {0} is not connected")]
    NotConnected(u8),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
