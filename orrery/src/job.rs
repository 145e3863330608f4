//! Background job coordinator.
//!
//! Runs one unit of work at a time on a worker thread while the control thread
//! keeps ticking. Completion is never delivered from the worker: the control
//! thread observes it from its own loop by calling
//! [`JobCoordinator::poll`].
//!
//! # Lifecycle
//!
//! ```text
//!  control thread                          worker thread
//!  ──────────────                          ─────────────
//!  submit(req)
//!    ├─ active job? raise CancelFlag ───────> body notices, returns early
//!    │             join ◄──────────────────── thread exits
//!    │             Failed(Cancelled)
//!    │             clear CancelFlag
//!    ├─ Started(label)
//!    └─ spawn ─────────────────────────────> body(req, ctx)
//!                                               ctx.report(..) ──┐
//!  poll()                                                          │ SPSC
//!    ├─ Progress(..) ◄─────────────────────────────────────────────┘
//!    └─ worker finished? join
//!         ├─ Ok  → finalize → Succeeded(artifact)
//!         └─ Err → Failed(error)
//! ```
//!
//! Cancellation is cooperative. A body that never calls
//! [`JobContext::checkpoint`] or [`JobContext::is_cancelled`] runs to
//! completion and `submit` blocks until it does.

mod cancel;
mod coordinator;
mod event;

pub use cancel::CancelFlag;
pub use coordinator::{
    Finalize, JobBody, JobContext, JobCoordinator, JobRequest, PROGRESS_QUEUE_CAPACITY, Submitter,
};
pub use event::{JobError, JobEvent, JobId, JobObserver, Progress};
