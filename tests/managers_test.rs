//! Cache Manager Integration Tests
//!
//! Exercises UtxoManager and TransactionManager directly against the
//! scripted backend: chunking, all-or-nothing reconciliation, paginated
//! history with cursors and persistence.
//!
//! Run with: cargo test --test managers_test -- --nocapture

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use shelley_wallet::config::BackendConfig;
use shelley_wallet::{KeyValueStore, MemoryStore, TransactionManager, UtxoManager, PRIMARY_TOKEN_ID};

fn addresses(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("addr_{:03}", i)).collect()
}

// ============================================================================
// Test 1: UTXO Reconciliation
// ============================================================================

#[tokio::test]
async fn test_utxo_sync_is_idempotent_and_chunked() {
    init_logger();
    let backend = MockBackend::new();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let manager = UtxoManager::new(store.clone(), backend.as_backend(), BackendConfig::default());
    let all = addresses(120);
    backend.set_utxos(vec![
        raw_utxo("aa", 0, &all[3], 5 * ADA),
        raw_utxo("bb", 1, &all[110], 7 * ADA),
    ]);

    let diff = manager.sync(&all).await.expect("sync");
    assert_eq!(diff.added.len(), 2);
    assert_eq!(backend.utxo_calls.load(Ordering::SeqCst), 3);
    assert_eq!(manager.balance().get(PRIMARY_TOKEN_ID).copied(), Some(12 * ADA));

    let again = manager.sync(&all).await.expect("sync");
    assert!(again.is_empty());

    backend.set_utxos(vec![raw_utxo("bb", 1, &all[110], 7 * ADA)]);
    let spent = manager.sync(&all).await.expect("sync");
    assert_eq!(spent.removed.len(), 1);
    assert_eq!(spent.removed[0].tx_hash, "aa");

    // The persisted copy reloads into a fresh manager
    let reloaded = UtxoManager::new(store, backend.as_backend(), BackendConfig::default());
    reloaded.load().await.expect("load");
    assert_eq!(reloaded.get_cached_utxos(), manager.get_cached_utxos());
}

#[tokio::test]
async fn test_utxo_sync_failure_changes_nothing() {
    let backend = MockBackend::new();
    let manager = UtxoManager::new(
        Arc::new(MemoryStore::new()),
        backend.as_backend(),
        BackendConfig::default(),
    );
    let all = addresses(10);
    backend.set_utxos(vec![raw_utxo("aa", 0, &all[0], 5 * ADA)]);
    manager.sync(&all).await.expect("sync");

    backend.set_utxos(Vec::new());
    backend.fail_utxos.store(true, Ordering::SeqCst);
    assert!(manager.sync(&all).await.is_err());
    assert_eq!(manager.get_cached_utxos().len(), 1);
}

// ============================================================================
// Test 2: Paginated History
// ============================================================================

#[tokio::test]
async fn test_history_pages_until_last() {
    init_logger();
    let backend = Arc::new(MockBackend::with_page_size(2));
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let manager = TransactionManager::new(store.clone(), backend.as_backend(), BackendConfig::default());
    let own = addresses(3);
    for i in 0..5u64 {
        backend.push_tx(raw_tx(&format!("tx{}", i), i + 1, 0, "foreign", &own[(i % 3) as usize], ADA));
    }

    let changed = manager.do_sync(&[own.clone()]).await.expect("sync");
    assert!(changed);
    assert_eq!(manager.transactions().len(), 5);
    // Pages of 2, 2 and 1
    assert_eq!(backend.history_calls.load(Ordering::SeqCst), 3);
    assert!(manager.is_address_used(&own[2]));

    // Nothing new: one request from the newest cursor
    let changed = manager.do_sync(&[own.clone()]).await.expect("sync");
    assert!(!changed);
    assert_eq!(backend.history_calls.load(Ordering::SeqCst), 4);

    backend.push_tx(raw_tx("tx5", 20, 0, "foreign", &own[0], ADA));
    assert!(manager.do_sync(&[own.clone()]).await.expect("sync"));
    assert_eq!(manager.transactions().len(), 6);
    assert_eq!(manager.tip().map(|t| t.height), Some(20));

    let reloaded = TransactionManager::new(store, backend.as_backend(), BackendConfig::default());
    reloaded.load().await.expect("load");
    assert_eq!(reloaded.transactions(), manager.transactions());
    assert_eq!(reloaded.confirmation_counts().get("tx0").copied(), Some(19));
}

#[tokio::test]
async fn test_history_notifies_changed_ids() {
    let backend = MockBackend::new();
    let manager = TransactionManager::new(
        Arc::new(MemoryStore::new()),
        backend.as_backend(),
        BackendConfig::default(),
    );
    let own = addresses(1);
    backend.push_tx(raw_tx("tx0", 2, 0, "foreign", &own[0], ADA));

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.subscribe(move |ids| sink.lock().extend(ids.iter().cloned()));

    manager.do_sync(&[own.clone()]).await.expect("sync");
    manager.do_sync(&[own]).await.expect("sync");
    assert_eq!(*seen.lock(), vec!["tx0".to_string()]);
}
