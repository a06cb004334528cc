//! Shared helpers for integration tests
#![allow(dead_code)]

pub mod fake;

use crosslist_core::{CrosslistConfig, ListPairConfig, StateStore, SyncOrchestrator};

pub use fake::FakeSystem;

pub const LIST_A: &str = "My Grocery List";
pub const LIST_B: &str = "Groceries";

/// Route `tracing` output through the test harness; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A side-A system (no timestamps) and a side-B system (timestamps), each with the test list
pub fn systems() -> (FakeSystem, FakeSystem) {
    let a = FakeSystem::new("pap", false);
    a.add_list(LIST_A);
    let b = FakeSystem::new("sky", true);
    b.add_list(LIST_B);
    (a, b)
}

pub fn pair() -> ListPairConfig {
    ListPairConfig::new(LIST_A, LIST_B)
}

/// Orchestrator over an in-memory store
pub fn orchestrator<'s>(
    a: &'s FakeSystem,
    b: &'s FakeSystem,
    config: &CrosslistConfig,
) -> SyncOrchestrator<&'s FakeSystem, &'s FakeSystem> {
    init_tracing();
    let store = StateStore::open_in_memory().expect("in-memory store");
    SyncOrchestrator::new(a, b, store, &pair(), config).expect("valid config")
}
