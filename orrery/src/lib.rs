//! Control-thread plumbing for a planetarium: one background job at a time
//! for scene loading, and a non-blocking multiplexed loop for telescope links.
//!
//! Everything here is driven from a single control thread that calls
//! [`scenery::SceneryManager::update`] and
//! [`telescope::TelescopeManager::communicate`] once per iteration. Only
//! the job worker runs elsewhere.

pub mod config;
pub mod job;
pub mod link;
pub mod net;
pub mod scenery;
pub mod sync;
pub mod telescope;

mod trace;

pub use trace::init_tracing;
