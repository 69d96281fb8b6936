//! Coordinators for discovery and request/response exchanges
//!
//! Every exchange follows the same shape:
//! - register listener(s) under fresh correlation ids
//! - start a retransmission task
//! - wait on a [`ResponseGate`](crate::gate::ResponseGate) with a bounded timeout
//! - remove the listener(s), then stop retransmission
//!
//! Cleanup runs on every exit path; listener guards and retransmission handles
//! also clean up when dropped.

mod core;
mod discovery;
mod guard;
mod request;

pub use core::Coordinator;
