//! Synchronization primitives for handing data between the control thread
//! and the job worker.

pub mod spsc;
