//! Conflict resolver: settles linked pairs that disagree on `checked`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::strategy::{decide_by_timestamps, ConflictStrategy, Decision, DecisionBasis};
use crate::config::ResolverConfig;
use crate::error::{CrosslistError, Result};
use crate::external::ListSystem;
use crate::model::{LinkId, LinkView, OperationKind, Side, Snapshot};
use crate::persistence::StateStore;

/// Outcome of one conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub link_id: LinkId,
    pub name: String,
    pub winner: Side,
    /// Value both sides hold after the resolution is applied
    pub checked: bool,
    pub basis: DecisionBasis,
    pub confidence: f64,
    pub timestamp_a: Option<DateTime<Utc>>,
    pub timestamp_b: Option<DateTime<Utc>>,
    /// False in dry run
    pub applied: bool,
}

/// A conflict whose resolution could not be applied
#[derive(Debug)]
pub struct ResolutionFailure {
    pub name: String,
    pub error: CrosslistError,
}

/// Resolutions from one pass plus per-item failures
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub resolutions: Vec<ConflictResolution>,
    pub failures: Vec<ResolutionFailure>,
}

/// Predicted winner for a current conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedResolution {
    pub name: String,
    pub winner: Side,
    pub basis: DecisionBasis,
    pub confidence: f64,
}

/// Current conflicts and how they would resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub conflicts: usize,
    pub checked_on_a: usize,
    pub checked_on_b: usize,
    pub strategy: ConflictStrategy,
    pub predictions: Vec<PredictedResolution>,
}

/// Resolves conflicting links and writes the winning value to the losing side.
pub struct ConflictResolver<'a> {
    store: &'a StateStore,
    system_a: &'a dyn ListSystem,
    system_b: &'a dyn ListSystem,
    config: &'a ResolverConfig,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(
        store: &'a StateStore,
        system_a: &'a dyn ListSystem,
        system_b: &'a dyn ListSystem,
        config: &'a ResolverConfig,
    ) -> Self {
        Self {
            store,
            system_a,
            system_b,
            config,
        }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.config.strategy
    }

    /// Resolve every current conflict.
    ///
    /// Failures on single conflicts are collected; an authentication failure
    /// ends the loop and is returned as the error.
    pub fn resolve_all(&self, snapshot: &Snapshot, dry_run: bool) -> Result<ResolveOutcome> {
        let conflicts = self.store.conflicting_links()?;
        info!(
            count = conflicts.len(),
            strategy = %self.config.strategy,
            dry_run,
            "Resolving conflicts"
        );

        let mut outcome = ResolveOutcome::default();
        for view in &conflicts {
            match self.resolve_conflict(view, snapshot, dry_run) {
                Ok(resolution) => {
                    info!(
                        name = %resolution.name,
                        winner = %resolution.winner,
                        checked = resolution.checked,
                        basis = %resolution.basis,
                        confidence = resolution.confidence,
                        "Resolved conflict"
                    );
                    outcome.resolutions.push(resolution);
                }
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => {
                    error!(name = %view.item_a.name, error = %e, "Failed to resolve conflict");
                    outcome.failures.push(ResolutionFailure {
                        name: view.item_a.name.clone(),
                        error: e,
                    });
                }
            }
        }

        info!(
            resolved = outcome.resolutions.len(),
            total = conflicts.len(),
            "Conflict resolution complete"
        );
        Ok(outcome)
    }

    /// Decide and, unless `dry_run`, apply one conflict.
    pub fn resolve_conflict(
        &self,
        view: &LinkView,
        snapshot: &Snapshot,
        dry_run: bool,
    ) -> Result<ConflictResolution> {
        let decision = self.determine_winner(view, Some(snapshot));
        let checked = match decision.winner {
            Side::A => view.item_a.checked,
            Side::B => view.item_b.checked,
        };

        let mut resolution = ConflictResolution {
            link_id: view.link.id,
            name: view.item_a.name.clone(),
            winner: decision.winner,
            checked,
            basis: decision.basis,
            confidence: decision.confidence,
            timestamp_a: Some(view.item_a.last_modified_at),
            timestamp_b: view.item_b.updated_at,
            applied: false,
        };

        if !dry_run {
            self.apply(view, &resolution)?;
            resolution.applied = true;
        }

        Ok(resolution)
    }

    /// Pick the winning side for a conflicting pair.
    ///
    /// Without a snapshot, change-source detection is skipped.
    pub fn determine_winner(&self, view: &LinkView, snapshot: Option<&Snapshot>) -> Decision {
        match self.config.strategy {
            ConflictStrategy::AWins => Decision::new(Side::A, DecisionBasis::Strategy, 1.0),
            ConflictStrategy::BWins => Decision::new(Side::B, DecisionBasis::Strategy, 1.0),
            ConflictStrategy::Prompt => {
                warn!(name = %view.item_a.name, "Prompting is not available, side A wins");
                Decision::new(Side::A, DecisionBasis::PromptFallback, 0.8)
            }
            ConflictStrategy::NewestWins => {
                if let Some(side) = snapshot.and_then(|s| detect_change_source(view, s)) {
                    return Decision::new(side, DecisionBasis::ChangeSource, 0.95);
                }
                let decision = decide_by_timestamps(
                    Some(view.item_a.last_modified_at),
                    view.item_b.updated_at,
                    self.config.tolerance(),
                    self.config.default_winner,
                );
                debug!(
                    name = %view.item_a.name,
                    timestamp_a = %view.item_a.last_modified_at,
                    timestamp_b = ?view.item_b.updated_at,
                    winner = %decision.winner,
                    "Timestamp comparison"
                );
                decision
            }
        }
    }

    fn apply(&self, view: &LinkView, resolution: &ConflictResolution) -> Result<()> {
        let loser = resolution.winner.other();
        match loser {
            Side::B => {
                self.system_b
                    .update_item(&view.item_b.external_id, resolution.checked, None)
                    .map_err(|e| CrosslistError::from_external(loser, e))?;
                self.store.set_checked_b(view.item_b.id, resolution.checked)?;
            }
            Side::A => {
                self.system_a
                    .update_item(&view.item_a.external_id, resolution.checked, None)
                    .map_err(|e| CrosslistError::from_external(loser, e))?;
                self.store.set_checked_a(view.item_a.id, resolution.checked)?;
            }
        }

        let details = serde_json::json!({
            "name": resolution.name,
            "winner": resolution.winner,
            "checked": resolution.checked,
            "reason": resolution.basis,
            "confidence": resolution.confidence,
            "timestamp_a": resolution.timestamp_a,
            "timestamp_b": resolution.timestamp_b,
        });
        self.store.log_operation(
            OperationKind::Conflict,
            Some(view.item_a.id),
            Some(view.item_b.id),
            &details.to_string(),
        );
        Ok(())
    }

    /// Current conflicts with predicted winners; mutates nothing.
    pub fn conflict_summary(&self) -> Result<ConflictSummary> {
        let conflicts = self.store.conflicting_links()?;
        let checked_on_a = conflicts.iter().filter(|v| v.item_a.checked).count();

        let predictions = conflicts
            .iter()
            .map(|view| {
                let decision = self.determine_winner(view, None);
                PredictedResolution {
                    name: view.item_a.name.clone(),
                    winner: decision.winner,
                    basis: decision.basis,
                    confidence: decision.confidence,
                }
            })
            .collect();

        Ok(ConflictSummary {
            conflicts: conflicts.len(),
            checked_on_a,
            checked_on_b: conflicts.len() - checked_on_a,
            strategy: self.config.strategy,
            predictions,
        })
    }
}

/// The side whose `checked` moved since the snapshot, if exactly one did
fn detect_change_source(view: &LinkView, snapshot: &Snapshot) -> Option<Side> {
    let Some(before) = snapshot.get(&view.snapshot_key()) else {
        debug!(name = %view.item_a.name, "No snapshot entry, using timestamps");
        return None;
    };

    let changed_a = view.item_a.checked != before.checked_a;
    let changed_b = view.item_b.checked != before.checked_b;
    match (changed_a, changed_b) {
        (true, false) => Some(Side::A),
        (false, true) => Some(Side::B),
        (true, true) => {
            debug!(name = %view.item_a.name, "Both sides changed, using timestamps");
            None
        }
        (false, false) => {
            warn!(name = %view.item_a.name, "Conflict without a change since the snapshot");
            None
        }
    }
}
