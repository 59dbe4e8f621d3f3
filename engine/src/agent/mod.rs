//! Research agent
//!
//! Ties research, document requirements and the downstream model together
//! into one streamed turn per user message.

pub mod core;

pub use core::{build_messages, ResearchAgent, TurnRequest};
