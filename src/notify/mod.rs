//! Progress notification.
//!
//! This module provides the event wire types and the publish/subscribe hub
//! the orchestrator reports through.

pub mod events;
pub mod hub;

pub use events::{Event, FrameworkUpdate, RunUpdate, SectionUpdate};
pub use hub::{EventStream, Notifier, PublishReport, DEFAULT_CONNECTION_CAPACITY};
