//! Conflict resolution for linked items that disagree on `checked`

mod resolver;
mod strategy;

pub use resolver::{
    ConflictResolution, ConflictResolver, ConflictSummary, PredictedResolution, ResolutionFailure,
    ResolveOutcome,
};
pub use strategy::{decide_by_timestamps, ConflictStrategy, Decision, DecisionBasis};
