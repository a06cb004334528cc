//! Reports produced by a sync pass

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::{ConflictResolution, ConflictSummary};
use crate::error::CrosslistError;
use crate::linking::LinkingSummary;
use crate::persistence::StoreStatistics;

/// Step of a pass in which an item-level failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Creating a missing counterpart on side A
    CreateOnA,
    /// Creating a missing counterpart on side B
    CreateOnB,
    ResolveConflict,
}

/// A failed item-level operation; the pass continued past it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: SyncStage,
    pub item: String,
    pub message: String,
}

impl ItemFailure {
    pub fn new(stage: SyncStage, item: impl Into<String>, error: &CrosslistError) -> Self {
        Self {
            stage,
            item: item.into(),
            message: error.to_string(),
        }
    }
}

/// Category of the error that aborted a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassErrorKind {
    Authentication,
    ExternalRequest,
    ListNotFound,
    Persistence,
    Config,
    Cancelled,
    Other,
}

/// The error that aborted a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassError {
    pub kind: PassErrorKind,
    pub message: String,
}

impl From<&CrosslistError> for PassError {
    fn from(err: &CrosslistError) -> Self {
        let kind = match err {
            CrosslistError::Authentication { .. } => PassErrorKind::Authentication,
            CrosslistError::ExternalRequest { .. } => PassErrorKind::ExternalRequest,
            CrosslistError::ListNotFound { .. } => PassErrorKind::ListNotFound,
            CrosslistError::Persistence(_) => PassErrorKind::Persistence,
            CrosslistError::Config(_) => PassErrorKind::Config,
            CrosslistError::Cancelled => PassErrorKind::Cancelled,
            CrosslistError::DuplicateLink { .. } | CrosslistError::NotFound(_) => {
                PassErrorKind::Other
            }
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounts {
    pub exact: usize,
    pub fuzzy: usize,
}

impl LinkCounts {
    pub fn total(&self) -> usize {
        self.exact + self.fuzzy
    }
}

/// Counterparts created, by the side they were created on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCounts {
    pub a: usize,
    pub b: usize,
}

impl CreateCounts {
    pub fn total(&self) -> usize {
        self.a + self.b
    }
}

/// Outcome of one pass.
///
/// In dry run every count is a projection; nothing was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub pass_id: Uuid,
    pub dry_run: bool,
    /// Items fetched from side A
    pub items_a: usize,
    /// Items fetched from side B
    pub items_b: usize,
    pub links_created: LinkCounts,
    pub items_created: CreateCounts,
    pub conflicts_resolved: usize,
    pub resolutions: Vec<ConflictResolution>,
    pub tombstoned: usize,
    pub duration_ms: u64,
    pub errors: Vec<ItemFailure>,
    pub error: Option<PassError>,
    pub success: bool,
}

impl SyncResult {
    pub(crate) fn new(pass_id: Uuid, dry_run: bool) -> Self {
        Self {
            pass_id,
            dry_run,
            items_a: 0,
            items_b: 0,
            links_created: LinkCounts::default(),
            items_created: CreateCounts::default(),
            conflicts_resolved: 0,
            resolutions: Vec::new(),
            tombstoned: 0,
            duration_ms: 0,
            errors: Vec::new(),
            error: None,
            success: false,
        }
    }

    /// Result for a pass that could not start
    pub(crate) fn aborted(dry_run: bool, err: &CrosslistError) -> Self {
        let mut result = Self::new(Uuid::new_v4(), dry_run);
        result.error = Some(PassError::from(err));
        result
    }

    /// Whether the pass stopped on an authentication failure
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self.error,
            Some(PassError {
                kind: PassErrorKind::Authentication,
                ..
            })
        )
    }

    /// Total number of changes the pass made (or would make in dry run)
    pub fn total_changes(&self) -> usize {
        self.links_created.total() + self.items_created.total() + self.conflicts_resolved
    }
}

/// Current state of one list pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub list_a: String,
    pub list_b: String,
    /// Resolved list ids; `None` when the lookup failed
    pub list_id_a: Option<String>,
    pub list_id_b: Option<String>,
    pub statistics: StoreStatistics,
    pub linking: LinkingSummary,
    pub conflicts: ConflictSummary,
}
