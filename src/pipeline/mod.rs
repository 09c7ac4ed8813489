//! Comparison pipeline: fetch, normalize, match, compare, report

pub mod comparator;
pub mod fetch;
pub mod matching;
pub mod normalize;
pub mod orchestrator;
pub mod report;

pub use fetch::Selectors;
pub use orchestrator::{Orchestrator, RunOutcome};
