//! Runner for every configured list pair

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{CrosslistConfig, ListPairConfig};
use crate::error::{CrosslistError, Result};
use crate::external::ListSystem;
use crate::persistence::StateStore;
use crate::sync::{CancellationToken, SyncOrchestrator, SyncResult, SyncStatus};

/// Result of syncing one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSyncResult {
    pub list_a: String,
    pub list_b: String,
    pub result: SyncResult,
}

/// Sums over every pair that ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSyncTotals {
    pub items_a: usize,
    pub items_b: usize,
    pub links_created: usize,
    pub items_created: usize,
    pub conflicts_resolved: usize,
    pub errors: usize,
}

/// Outcome of a run over all enabled pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiSyncResult {
    pub dry_run: bool,
    pub pairs: Vec<PairSyncResult>,
    /// Pairs not attempted because an earlier pair failed authentication
    pub skipped: Vec<String>,
    pub totals: MultiSyncTotals,
    pub successful_pairs: usize,
    pub duration_ms: u64,
    /// Every enabled pair ran and succeeded
    pub success: bool,
}

impl MultiSyncResult {
    fn push(&mut self, pair: PairSyncResult) {
        let r = &pair.result;
        self.totals.items_a += r.items_a;
        self.totals.items_b += r.items_b;
        self.totals.links_created += r.links_created.total();
        self.totals.items_created += r.items_created.total();
        self.totals.conflicts_resolved += r.conflicts_resolved;
        self.totals.errors += r.errors.len() + usize::from(r.error.is_some());
        if r.success {
            self.successful_pairs += 1;
        }
        self.pairs.push(pair);
    }
}

/// Syncs each enabled pair in turn, each against its own state database.
pub struct MultiPairRunner<A: ListSystem, B: ListSystem> {
    system_a: A,
    system_b: B,
    config: CrosslistConfig,
    cancel: CancellationToken,
}

impl<A: ListSystem, B: ListSystem> MultiPairRunner<A, B> {
    pub fn new(system_a: A, system_b: B, config: CrosslistConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            system_a,
            system_b,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Token shared with every pass this runner starts
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &CrosslistConfig {
        &self.config
    }

    /// Sync every enabled pair. An authentication failure skips the rest.
    pub fn sync_all(&self, dry_run: bool) -> MultiSyncResult {
        let started = Instant::now();
        let pairs: Vec<&ListPairConfig> = self.config.enabled_pairs().collect();
        info!(pairs = pairs.len(), dry_run, "Starting multi-pair sync");

        let mut multi = MultiSyncResult {
            dry_run,
            ..MultiSyncResult::default()
        };

        let mut remaining = pairs.iter();
        for pair in remaining.by_ref() {
            let result = self.sync_pair(pair, dry_run);
            let auth_failed = result.is_authentication_failure();
            multi.push(PairSyncResult {
                list_a: pair.list_a.clone(),
                list_b: pair.list_b.clone(),
                result,
            });
            if auth_failed {
                error!(
                    list_a = %pair.list_a,
                    list_b = %pair.list_b,
                    "Authentication failed, skipping remaining pairs"
                );
                break;
            }
        }
        multi.skipped = remaining
            .map(|p| format!("{} <-> {}", p.list_a, p.list_b))
            .collect();

        multi.success = multi.skipped.is_empty() && multi.successful_pairs == multi.pairs.len();
        multi.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            successful = multi.successful_pairs,
            total = pairs.len(),
            changes = multi.totals.links_created
                + multi.totals.items_created
                + multi.totals.conflicts_resolved,
            "Multi-pair sync complete"
        );
        multi
    }

    /// Sync one configured pair by its list names
    pub fn sync_single(&self, list_a: &str, list_b: &str, dry_run: bool) -> Result<SyncResult> {
        let pair = self.find_pair(list_a, list_b)?;
        Ok(self.sync_pair(pair, dry_run))
    }

    /// Status of every enabled pair; pairs whose store cannot be opened are left out.
    ///
    /// Never creates files: a pair that has not synced yet reports an empty store.
    pub fn pair_status(&self) -> Vec<SyncStatus> {
        self.config
            .enabled_pairs()
            .filter_map(|pair| {
                let status = self
                    .status_store(pair)
                    .and_then(|store| self.orchestrator_with(pair, store))
                    .and_then(|o| o.sync_status());
                match status {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!(
                            list_a = %pair.list_a,
                            list_b = %pair.list_b,
                            error = %e,
                            "Failed to read pair status"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    fn status_store(&self, pair: &ListPairConfig) -> Result<StateStore> {
        let path = pair.database_path(&self.config.data_dir);
        if path.exists() {
            StateStore::open(path)
        } else {
            debug!(path = %path.display(), "Pair has no state yet");
            StateStore::open_in_memory()
        }
    }

    fn find_pair(&self, list_a: &str, list_b: &str) -> Result<&ListPairConfig> {
        self.config
            .pairs
            .iter()
            .find(|p| p.list_a == list_a && p.list_b == list_b)
            .ok_or_else(|| {
                CrosslistError::NotFound(format!("list pair {} <-> {}", list_a, list_b))
            })
    }

    fn sync_pair(&self, pair: &ListPairConfig, dry_run: bool) -> SyncResult {
        match self.orchestrator(pair) {
            Ok(orchestrator) => orchestrator.sync(dry_run),
            Err(e) => {
                error!(
                    list_a = %pair.list_a,
                    list_b = %pair.list_b,
                    error = %e,
                    "Failed to prepare pair"
                );
                SyncResult::aborted(dry_run, &e)
            }
        }
    }

    fn orchestrator(&self, pair: &ListPairConfig) -> Result<SyncOrchestrator<&A, &B>> {
        let store = StateStore::open(pair.database_path(&self.config.data_dir))?;
        self.orchestrator_with(pair, store)
    }

    fn orchestrator_with(
        &self,
        pair: &ListPairConfig,
        store: StateStore,
    ) -> Result<SyncOrchestrator<&A, &B>> {
        Ok(
            SyncOrchestrator::new(&self.system_a, &self.system_b, store, pair, &self.config)?
                .with_cancellation(self.cancel.clone()),
        )
    }
}
