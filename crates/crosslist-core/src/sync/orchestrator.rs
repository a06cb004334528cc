//! One reconciliation pass over a list pair

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use super::cancel::CancellationToken;
use super::result::{ItemFailure, LinkCounts, PassError, SyncResult, SyncStage, SyncStatus};
use crate::config::{CrosslistConfig, LinkerConfig, ListPairConfig, ResolverConfig, SyncConfig};
use crate::conflict::{ConflictResolver, ConflictSummary};
use crate::error::{ConfigError, CrosslistError, Result};
use crate::external::ListSystem;
use crate::linking::{ItemLinker, LinkingSummary};
use crate::model::{ItemA, ItemB, RemoteItem, Side};
use crate::persistence::StateStore;

/// List ids resolved for the current pass
#[derive(Debug, Clone)]
struct PassContext {
    list_id_a: String,
    list_id_b: String,
}

/// Runs passes for one list pair against its own state store.
pub struct SyncOrchestrator<A: ListSystem, B: ListSystem> {
    system_a: A,
    system_b: B,
    store: StateStore,
    list_a: String,
    list_b: String,
    sync: SyncConfig,
    linking: LinkerConfig,
    conflict: ResolverConfig,
    cancel: CancellationToken,
}

impl<A: ListSystem, B: ListSystem> SyncOrchestrator<A, B> {
    /// Create an orchestrator for `pair`, applying its strategy override.
    pub fn new(
        system_a: A,
        system_b: B,
        store: StateStore,
        pair: &ListPairConfig,
        config: &CrosslistConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut conflict = config.conflict.clone();
        if let Some(strategy) = pair.strategy {
            conflict.strategy = strategy;
        }

        Ok(Self {
            system_a,
            system_b,
            store,
            list_a: pair.list_a.clone(),
            list_b: pair.list_b.clone(),
            sync: config.sync.clone(),
            linking: config.linking.clone(),
            conflict,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run one pass.
    ///
    /// Failures never escape as `Err`: pass-level errors land in
    /// `SyncResult::error`, item-level ones in `SyncResult::errors`.
    pub fn sync(&self, dry_run: bool) -> SyncResult {
        let pass_id = Uuid::new_v4();
        let span = info_span!(
            "sync_pass",
            %pass_id,
            list_a = %self.list_a,
            list_b = %self.list_b,
            dry_run
        );
        let _enter = span.enter();

        let started = Instant::now();
        let mut result = SyncResult::new(pass_id, dry_run);
        info!("Starting sync pass");

        let outcome = if dry_run {
            match self.store.begin_projection() {
                Ok(projection) => {
                    let outcome = self.run_pass(&mut result, dry_run);
                    if let Err(e) = projection.discard() {
                        error!(error = %e, "Failed to discard dry-run changes");
                    }
                    outcome
                }
                Err(e) => Err(e),
            }
        } else {
            self.run_pass(&mut result, dry_run)
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(attempted) => {
                let all_failed = attempted > 0 && result.errors.len() >= attempted;
                result.success = !all_failed;
                info!(
                    items_a = result.items_a,
                    items_b = result.items_b,
                    exact_links = result.links_created.exact,
                    fuzzy_links = result.links_created.fuzzy,
                    created_on_a = result.items_created.a,
                    created_on_b = result.items_created.b,
                    conflicts_resolved = result.conflicts_resolved,
                    tombstoned = result.tombstoned,
                    errors = result.errors.len(),
                    duration_ms = result.duration_ms,
                    "Sync pass complete"
                );
            }
            Err(e) => {
                if matches!(e, CrosslistError::Cancelled) {
                    warn!("Sync pass cancelled");
                } else {
                    error!(error = %e, "Sync pass failed");
                }
                result.error = Some(PassError::from(&e));
                result.success = false;
            }
        }

        result
    }

    /// Returns the number of item-level operations attempted against the systems.
    fn run_pass(&self, result: &mut SyncResult, dry_run: bool) -> Result<usize> {
        let snapshot = self.store.snapshot()?;
        self.cancel.check()?;

        let ctx = self.resolve_lists()?;
        self.cancel.check()?;

        let fetched_a = self
            .system_a
            .fetch_items(&ctx.list_id_a)
            .map_err(|e| CrosslistError::from_external(Side::A, e))?;
        let fetched_b = self
            .system_b
            .fetch_items(&ctx.list_id_b)
            .map_err(|e| CrosslistError::from_external(Side::B, e))?;
        result.items_a = fetched_a.len();
        result.items_b = fetched_b.len();
        debug!(items_a = result.items_a, items_b = result.items_b, "Fetched both lists");
        self.cancel.check()?;

        result.tombstoned = self.persist(&ctx, &fetched_a, &fetched_b)?;
        self.cancel.check()?;

        let linked = ItemLinker::new(&self.store, &self.linking).link_all_items()?;
        let exact = linked.iter().filter(|m| m.strategy.is_exact()).count();
        result.links_created = LinkCounts {
            exact,
            fuzzy: linked.len() - exact,
        };
        self.cancel.check()?;

        let mut attempted = self.create_missing(&ctx, result, dry_run)?;
        self.cancel.check()?;

        let outcome = self.resolver().resolve_all(&snapshot, dry_run)?;
        if !dry_run {
            attempted += outcome.resolutions.len() + outcome.failures.len();
        }
        result.conflicts_resolved = outcome.resolutions.len();
        result.resolutions = outcome.resolutions;
        result.errors.extend(
            outcome
                .failures
                .iter()
                .map(|f| ItemFailure::new(SyncStage::ResolveConflict, f.name.clone(), &f.error)),
        );

        Ok(attempted)
    }

    fn resolve_lists(&self) -> Result<PassContext> {
        Ok(PassContext {
            list_id_a: find_list(&self.system_a, Side::A, &self.list_a)?,
            list_id_b: find_list(&self.system_b, Side::B, &self.list_b)?,
        })
    }

    /// Upsert everything fetched and tombstone what went unseen. Returns the tombstone count.
    fn persist(
        &self,
        ctx: &PassContext,
        fetched_a: &[RemoteItem],
        fetched_b: &[RemoteItem],
    ) -> Result<usize> {
        let now = Utc::now();
        for item in fetched_a {
            self.store.upsert_item_a_at(item, &ctx.list_id_a, now)?;
        }
        for item in fetched_b {
            self.store.upsert_item_b_at(item, &ctx.list_id_b, now)?;
        }

        let cutoff = now
            .checked_sub_signed(self.sync.grace_window()?)
            .ok_or_else(|| {
                ConfigError::OutOfRange(format!(
                    "grace window of {}s reaches before the earliest timestamp",
                    self.sync.grace_window_seconds
                ))
            })?;
        let mut tombstoned = self.store.tombstone_stale_items_a(cutoff)?;
        if self.sync.tombstone_side_b {
            tombstoned += self.store.tombstone_stale_items_b(cutoff)?;
        }
        Ok(tombstoned)
    }

    /// Create counterparts for items still unlinked after linking.
    fn create_missing(
        &self,
        ctx: &PassContext,
        result: &mut SyncResult,
        dry_run: bool,
    ) -> Result<usize> {
        let mut attempted = 0;

        for item in self.store.unlinked_items_a()? {
            if dry_run {
                debug!(name = %item.name, "Would create on side B");
                result.items_created.b += 1;
                continue;
            }
            attempted += 1;
            match self.create_on_b(ctx, &item) {
                Ok(()) => result.items_created.b += 1,
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => {
                    error!(name = %item.name, error = %e, "Failed to create item on side B");
                    let failure = ItemFailure::new(SyncStage::CreateOnB, item.name.clone(), &e);
                    result.errors.push(failure);
                }
            }
        }

        for item in self.store.unlinked_items_b()? {
            if dry_run {
                debug!(name = %item.name, "Would create on side A");
                result.items_created.a += 1;
                continue;
            }
            attempted += 1;
            match self.create_on_a(ctx, &item) {
                Ok(()) => result.items_created.a += 1,
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => {
                    error!(name = %item.name, error = %e, "Failed to create item on side A");
                    let failure = ItemFailure::new(SyncStage::CreateOnA, item.name.clone(), &e);
                    result.errors.push(failure);
                }
            }
        }

        Ok(attempted)
    }

    fn create_on_b(&self, ctx: &PassContext, item: &ItemA) -> Result<()> {
        let external_id = self
            .system_b
            .create_item(&ctx.list_id_b, &item.name, item.checked)
            .map_err(|e| CrosslistError::from_external(Side::B, e))?;

        let now = Utc::now();
        let created =
            RemoteItem::new(external_id, item.name.clone(), item.checked).with_timestamp(now);
        let item_b = self.store.upsert_item_b_at(&created, &ctx.list_id_b, now)?;
        self.store.create_link(item.id, item_b.id, 1.0)?;
        info!(name = %item.name, checked = item.checked, "Created item on side B");
        Ok(())
    }

    fn create_on_a(&self, ctx: &PassContext, item: &ItemB) -> Result<()> {
        let external_id = self
            .system_a
            .create_item(&ctx.list_id_a, &item.name, item.checked)
            .map_err(|e| CrosslistError::from_external(Side::A, e))?;

        let created = RemoteItem::new(external_id, item.name.clone(), item.checked);
        let item_a = self.store.upsert_item_a(&created, &ctx.list_id_a)?;
        self.store.create_link(item_a.id, item.id, 1.0)?;
        info!(name = %item.name, checked = item.checked, "Created item on side A");
        Ok(())
    }

    pub fn linking_summary(&self) -> Result<LinkingSummary> {
        ItemLinker::new(&self.store, &self.linking).linking_summary()
    }

    pub fn conflict_summary(&self) -> Result<ConflictSummary> {
        self.resolver().conflict_summary()
    }

    fn resolver(&self) -> ConflictResolver<'_> {
        ConflictResolver::new(&self.store, &self.system_a, &self.system_b, &self.conflict)
    }

    /// Store, linking and conflict state for this pair. List lookups are best effort.
    pub fn sync_status(&self) -> Result<SyncStatus> {
        let lookup = |system: &dyn ListSystem, side: Side, name: &str| {
            match find_list(system, side, name) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(side = %side, list = name, error = %e, "List lookup failed");
                    None
                }
            }
        };

        Ok(SyncStatus {
            list_a: self.list_a.clone(),
            list_b: self.list_b.clone(),
            list_id_a: lookup(&self.system_a, Side::A, &self.list_a),
            list_id_b: lookup(&self.system_b, Side::B, &self.list_b),
            statistics: self.store.statistics()?,
            linking: self.linking_summary()?,
            conflicts: self.conflict_summary()?,
        })
    }
}

fn find_list(system: &dyn ListSystem, side: Side, name: &str) -> Result<String> {
    system
        .find_list(name)
        .map_err(|e| CrosslistError::from_external(side, e))?
        .ok_or_else(|| CrosslistError::ListNotFound {
            side,
            list: name.to_string(),
        })
}
