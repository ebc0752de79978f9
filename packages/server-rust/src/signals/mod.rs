//! Process-wide write-event signals.
//!
//! The persistence layer sends a pre-write and a post-write event around
//! every save; request interceptors connect receivers for the lifetime of a
//! single request.

pub mod dispatcher;

pub use dispatcher::{handler, Signal, WriteHandler, WriteSignals};
