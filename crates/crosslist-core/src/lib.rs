//! Crosslist Core - two-sided list reconciliation
//!
//! Keeps two independently edited lists of named, checkable items consistent:
//!
//! - **Persistence**: SQLite state store for both sides, their links and an operation log
//! - **Linking**: Exact and fuzzy name matching of unlinked items
//! - **Conflict**: Settling linked pairs that disagree on `checked`
//! - **Sync**: One ordered pass per list pair, with dry run and cancellation
//! - **Multi**: Every configured pair in turn, one database per pair
//! - **External**: The capability trait each list system implements
//! - **Config**: Linker, resolver and pass settings loaded from TOML or JSON
//!
//! # Pass order
//!
//! ```text
//! snapshot → resolve lists → fetch → persist → link → create missing → resolve conflicts
//! ```
//!
//! Side A does not report trustworthy modification times, so the store derives
//! them from observed changes. Side B's own `updated_at` is kept as reported.

pub mod config;
pub mod conflict;
pub mod error;
pub mod external;
pub mod linking;
pub mod model;
pub mod multi;
pub mod persistence;
pub mod sync;

pub use config::{CrosslistConfig, LinkerConfig, ListPairConfig, ResolverConfig, SyncConfig};
pub use conflict::{
    ConflictResolution, ConflictResolver, ConflictStrategy, ConflictSummary, Decision,
    DecisionBasis,
};
pub use error::{ConfigError, CrosslistError, ExternalError, PersistenceError, Result};
pub use external::ListSystem;
pub use linking::{ItemLinker, LinkMatch, LinkingSummary, MatchStrategy};
pub use model::{
    ItemA, ItemAId, ItemB, ItemBId, Link, LinkId, LinkView, OperationKind, OperationLogEntry,
    PairState, RemoteItem, Side, Snapshot,
};
pub use multi::{MultiPairRunner, MultiSyncResult, MultiSyncTotals, PairSyncResult};
pub use persistence::{Projection, StateStore, StoreStatistics};
pub use sync::{CancellationToken, ItemFailure, SyncOrchestrator, SyncResult, SyncStatus};

/// Returns the version of crosslist-core
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
