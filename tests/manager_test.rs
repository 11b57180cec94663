//! WalletManager Integration Tests
//!
//! Covers the lifecycle of persisted wallets: create, list, close, reopen
//! and remove, on both the in-memory and the file-system store.
//!
//! Run with: cargo test --test manager_test -- --nocapture

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use shelley_wallet::wallet::WalletKind;
use shelley_wallet::{
    FileSystemStore, KeyManager, KeyValueStore, MemoryStore, SyncOutcome, WalletError, WalletManager,
};

fn memory_manager() -> (Arc<MockBackend>, WalletManager) {
    let backend = MockBackend::new();
    let manager = WalletManager::new(Arc::new(MemoryStore::new()), backend.as_backend(), test_config());
    (backend, manager)
}

// ============================================================================
// Test 1: Creation Rules
// ============================================================================

#[tokio::test]
async fn test_names_must_be_unique_and_non_empty() {
    init_logger();
    let (_backend, manager) = memory_manager();
    manager
        .create_wallet("savings", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");

    let duplicate = manager.create_wallet("savings", OTHER_MNEMONIC, PASSWORD).await;
    assert!(matches!(duplicate, Err(WalletError::WalletExists(_))));

    let empty = manager.create_wallet("  ", OTHER_MNEMONIC, PASSWORD).await;
    assert!(matches!(empty, Err(WalletError::InvalidInput(_))));
}

#[tokio::test]
async fn test_rejects_weak_password_and_bad_mnemonic() {
    let (_backend, manager) = memory_manager();

    let weak = manager.create_wallet("a", MNEMONIC, "short").await;
    assert!(matches!(weak, Err(WalletError::InvalidInput(_))));

    let garbage = manager
        .create_wallet("b", "not a real mnemonic at all", PASSWORD)
        .await;
    assert!(matches!(garbage, Err(WalletError::InvalidInput(_))));

    assert!(manager.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn test_generated_mnemonic_creates_wallet() -> anyhow::Result<()> {
    let (_backend, manager) = memory_manager();
    let mnemonic = KeyManager::generate_mnemonic()?;
    assert_eq!(mnemonic.word_count(), 15);

    let wallet = manager
        .create_wallet("fresh", &mnemonic.to_string(), PASSWORD)
        .await?;
    assert_eq!(wallet.receive_addresses().len(), 1);
    Ok(())
}

// ============================================================================
// Test 2: Listing and Reopening
// ============================================================================

#[tokio::test]
async fn test_list_close_and_reopen() {
    let (_backend, manager) = memory_manager();
    let first = manager
        .create_wallet("first", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");
    let second = manager
        .create_read_only_wallet("second", &first.account_public_key().to_hex())
        .await
        .expect("Failed to create read-only wallet");

    let listed = manager.list().await.expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, "first");
    assert_eq!(listed[0].kind, WalletKind::Software);
    assert_eq!(listed[1].kind, WalletKind::ReadOnly);
    assert_eq!(manager.open_wallets().len(), 2);

    manager.close(second.id()).expect("close");
    assert!(second.is_closed());
    assert!(manager.get(second.id()).is_none());
    assert!(matches!(manager.close(second.id()), Err(WalletError::WalletNotFound(_))));

    let reopened = manager.open(second.id()).await.expect("reopen");
    assert!(!Arc::ptr_eq(&reopened, &second));
    assert_eq!(reopened.external_addresses(), first.external_addresses());

    // Opening an open wallet hands back the same instance
    let again = manager.open(first.id()).await.expect("open");
    assert!(Arc::ptr_eq(&again, &first));
}

#[tokio::test]
async fn test_remove_wallet_wipes_storage() {
    let backend = MockBackend::new();
    let store = Arc::new(MemoryStore::new());
    let manager = WalletManager::new(store.clone(), backend.as_backend(), test_config());
    let wallet = manager
        .create_wallet("doomed", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");
    let id = wallet.id().to_string();
    assert!(!store.is_empty());

    manager.remove_wallet(&id).await.expect("remove");
    assert!(wallet.is_closed());
    assert!(store.keys("").await.expect("keys").is_empty());
    assert!(matches!(manager.open(&id).await, Err(WalletError::WalletNotFound(_))));
    assert!(matches!(manager.remove_wallet(&id).await, Err(WalletError::WalletNotFound(_))));
}

#[tokio::test]
async fn test_remove_during_sync_leaves_nothing_behind() {
    init_logger();
    let backend = MockBackend::new();
    let store = Arc::new(MemoryStore::new());
    let manager = WalletManager::new(store.clone(), backend.as_backend(), test_config());
    let wallet = manager
        .create_wallet("racy", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");
    let receive = wallet.external_addresses()[0].clone();
    backend.push_tx(raw_tx("tx01", 3, 0, &foreign_address(), &receive, 5 * ADA));
    backend.set_utxos(vec![raw_utxo("tx01", 0, &receive, 5 * ADA)]);

    // Discovery takes one round trip, the cache fetches a second
    backend.set_latency(Duration::from_millis(50));
    let syncing = wallet.clone();
    let handle = tokio::spawn(async move { syncing.sync().await });
    tokio::time::sleep(Duration::from_millis(75)).await;

    let id = wallet.id().to_string();
    manager.remove_wallet(&id).await.expect("remove");
    let outcome = handle.await.expect("join").expect("sync");

    assert_eq!(outcome, SyncOutcome::Cancelled);
    assert!(store.keys(&format!("wallet/{}/", id)).await.expect("keys").is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_closed_wallet_discards_in_flight_results() {
    let backend = MockBackend::new();
    let store = Arc::new(MemoryStore::new());
    let manager = WalletManager::new(store.clone(), backend.as_backend(), test_config());
    let wallet = manager
        .create_wallet("closing", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");
    let receive = wallet.external_addresses()[0].clone();
    backend.push_tx(raw_tx("tx01", 3, 0, &foreign_address(), &receive, 5 * ADA));
    backend.set_utxos(vec![raw_utxo("tx01", 0, &receive, 5 * ADA)]);

    backend.set_latency(Duration::from_millis(50));
    let syncing = wallet.clone();
    let handle = tokio::spawn(async move { syncing.sync().await });
    tokio::time::sleep(Duration::from_millis(75)).await;
    manager.close(wallet.id()).expect("close");

    assert_eq!(handle.await.expect("join").expect("sync"), SyncOutcome::Cancelled);
    let prefix = format!("wallet/{}/", wallet.id());
    let keys = store.keys(&prefix).await.expect("keys");
    assert!(!keys.contains(&format!("{}utxos", prefix)));
    assert!(!keys.contains(&format!("{}txs", prefix)));

    // Reopening starts from what was persisted before the close
    backend.set_latency(Duration::ZERO);
    let reopened = manager.open(wallet.id()).await.expect("reopen");
    assert!(reopened.utxos().is_empty());
    assert!(reopened.transactions().is_empty());
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let temp_dir = tempfile::TempDir::new().expect("temp dir");
    let backend = MockBackend::new();
    let receive;
    let id;
    {
        let store = Arc::new(FileSystemStore::new_with_base_dir(temp_dir.path().to_path_buf()));
        let manager = WalletManager::new(store, backend.as_backend(), test_config());
        let wallet = manager
            .create_wallet("disk", MNEMONIC, PASSWORD)
            .await
            .expect("Failed to create wallet");
        receive = wallet.external_addresses()[2].clone();
        backend.push_tx(raw_tx("tx02", 3, 0, &foreign_address(), &receive, 4 * ADA));
        backend.set_utxos(vec![raw_utxo("tx02", 0, &receive, 4 * ADA)]);
        wallet.sync().await.expect("Sync failed");
        wallet.save_memo("tx02", "rent").await.expect("memo");
        id = wallet.id().to_string();
        manager.close_all();
    }

    let store = Arc::new(FileSystemStore::new_with_base_dir(temp_dir.path().to_path_buf()));
    let manager = WalletManager::new(store, backend.as_backend(), test_config());
    let wallet = manager.open(&id).await.expect("reopen");

    // Cached state is available before any network call
    assert_eq!(wallet.utxos().len(), 1);
    assert_eq!(wallet.receive_addresses().len(), 3);
    let info = wallet.transactions().remove("tx02").expect("Transaction missing");
    assert_eq!(info.memo.as_deref(), Some("rent"));
    wallet
        .get_decrypted_root_key(PASSWORD)
        .await
        .expect("Root key must decrypt after restart");
}
