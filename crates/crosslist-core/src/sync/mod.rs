//! Sync passes
//!
//! A pass runs strictly in order: snapshot, resolve lists, fetch, persist,
//! link, create missing counterparts, resolve conflicts. Cancellation is
//! honored between steps.

mod cancel;
mod orchestrator;
mod result;

pub use cancel::CancellationToken;
pub use orchestrator::SyncOrchestrator;
pub use result::{
    CreateCounts, ItemFailure, LinkCounts, PassError, PassErrorKind, SyncResult, SyncStage,
    SyncStatus,
};
