//! Lexis SDK
//!
//! Shared library providing error and wire types for Lexis components.
//! This crate is used by the engine and by anything embedding it.

/// Error types and handling
pub mod errors;

/// Wire types shared across crates
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ErrorBody, LexisErrorExt};
pub use types::{MessageMetadata, Role, SearchResult};
