//! An in-process event log implementing [`EventSource`].
//!
//! Useful for tests, embedding and benchmarks: it exposes the same paged
//! reads and live feeds a remote store would, with no I/O.
//!
//! [`EventSource`]: crate::source::EventSource

mod hub;
mod log;

pub use log::{AllSource, InMemoryEventLog, StreamSource, ALL_STREAM};
