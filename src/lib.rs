//! Threatloom - orchestration engine for multi-framework security analysis.
//!
//! A run executes one or more analysis frameworks over a system
//! description. Each framework is an [`agent::AgentExecutor`] producing
//! sections; the [`orchestrator::Orchestrator`] drives them concurrently,
//! stores results in the [`store::ArtifactStore`], streams progress through
//! the [`notify::Notifier`], and validates any STPA control structure the
//! frameworks produce.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod report;
pub mod store;
pub mod transport;
pub mod validate;
