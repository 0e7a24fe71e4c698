//! Artifact storage and context retrieval.

pub mod artifacts;
pub mod retrieval;

pub use artifacts::{Artifact, ArtifactKind, ArtifactStore, ConversationEntry};
pub use retrieval::{value_text, ContextHit, ContextRetriever, KeywordRetriever, NullRetriever};
