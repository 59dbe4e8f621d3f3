//! Research Conductor
//!
//! Runs the bounded research loop for a query: classification, adaptive
//! search rounds, verification, query refinement and context assembly.

pub mod context;
pub mod orchestrator;
pub mod planner;
pub mod types;
pub mod verifier;

pub use context::{ContextAssembler, ContextInput};
pub use orchestrator::RoundOrchestrator;
pub use planner::QueryPlanner;
pub use types::{
    Gap, OutcomeSummary, ResearchMode, ResearchOutcome, ResearchPhase, RoundReport, StopReason,
    Verification,
};
pub use verifier::Verifier;
