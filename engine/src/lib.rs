//! Lexis Engine Library
//!
//! Legal research orchestration: decides whether a question needs legal
//! search, researches it in bounded adaptive rounds, verifies the evidence
//! and assembles a grounded context for a downstream model.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Query classification module
pub mod classifier;

/// Query complexity scoring module
pub mod complexity;

/// Database persistence module
pub mod db;

/// Conversation memory module
pub mod memory;

/// External legal search module
pub mod search;

/// Case document passage retrieval interface
pub mod retrieval;

/// Research conductor module
pub mod conductor;

/// Document requirement tracking module
pub mod requirements;

/// Downstream model abstraction layer
pub mod llm;

/// Response streaming module
pub mod streaming;

/// Research agent module
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
