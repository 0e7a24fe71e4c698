//! Event transports.
//!
//! A transport owns one notifier connection and delivers its events to a
//! consumer outside the process core.

pub mod console;

pub use console::{ConsoleTransport, TransportSummary};
