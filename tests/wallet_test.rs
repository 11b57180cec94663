//! ShelleyWallet Integration Tests
//!
//! Drives whole wallets against the scripted in-process backend from
//! `common`: creation and restore, full sync, receive-address policy,
//! transaction building and the three signing paths.
//!
//! Run with: cargo test --test wallet_test -- --nocapture

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use shelley_wallet::tx::signer::witness;
use shelley_wallet::tx::{verify_witnesses, HwFeatures, LedgerSignRequest, LedgerSignResponse, LedgerWitness};
use shelley_wallet::{
    HardwareSigner, HwDeviceInfo, KeyManager, MemoryStore, NetworkId, RootKey, SendToken, ShelleyWallet, StakingInfo,
    SyncOutcome, SyncStatus, TransactionDirection, Transport, TxStatus, WalletError, WalletEvent, WalletManager,
    WalletMode, PRIMARY_TOKEN_ID,
};

fn manager(backend: &Arc<MockBackend>) -> WalletManager {
    WalletManager::new(Arc::new(MemoryStore::new()), backend.as_backend(), test_config())
}

async fn software_wallet(backend: &Arc<MockBackend>) -> (WalletManager, Arc<ShelleyWallet>) {
    let manager = manager(backend);
    let wallet = manager
        .create_wallet("main", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");
    (manager, wallet)
}

/// Wallet holding a single 100 ADA output on its first receive address
async fn funded_wallet(backend: &Arc<MockBackend>) -> (WalletManager, Arc<ShelleyWallet>) {
    let (manager, wallet) = software_wallet(backend).await;
    let receive = wallet.external_addresses()[0].clone();
    backend.push_tx(raw_tx("fund01", 5, 0, &foreign_address(), &receive, 100 * ADA));
    backend.set_utxos(vec![raw_utxo("fund01", 0, &receive, 100 * ADA)]);
    wallet.sync().await.expect("Sync failed");
    (manager, wallet)
}

fn device_info(wallet: &ShelleyWallet) -> HwDeviceInfo {
    HwDeviceInfo {
        account_public_key_hex: wallet.account_public_key().to_hex(),
        hw_features: HwFeatures {
            vendor: "ledger.com".to_string(),
            model: "NanoS".to_string(),
            device_id: None,
            serial_hex: None,
        },
    }
}

/// Software stand-in for a Ledger: signs every requested path
struct SoftDevice {
    root: RootKey,
    calls: AtomicUsize,
}

#[async_trait]
impl HardwareSigner for SoftDevice {
    async fn sign(
        &self,
        request: &LedgerSignRequest,
        _device: &HwDeviceInfo,
        transport: Transport,
    ) -> shelley_wallet::Result<LedgerSignResponse> {
        assert_eq!(transport, Transport::Usb);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hash: [u8; 32] = hex::decode(&request.body_hash_hex)
            .expect("hex body hash")
            .try_into()
            .expect("32-byte body hash");
        let account = self.root.account_private_key()?;
        let witnesses = request
            .signing_paths
            .iter()
            .map(|path| {
                let secret = account.derive(path[3], path[4]).expect("derivable path");
                LedgerWitness {
                    path: path.clone(),
                    signature_hex: witness(&secret, hash).signature,
                }
            })
            .collect();
        Ok(LedgerSignResponse {
            body_hash_hex: request.body_hash_hex.clone(),
            witnesses,
        })
    }
}

// ============================================================================
// Test 1: Creation and Restore
// ============================================================================

#[tokio::test]
async fn test_create_generates_first_blocks_and_restores() {
    init_logger();
    let backend = MockBackend::new();
    let store = Arc::new(MemoryStore::new());
    let first = WalletManager::new(store.clone(), backend.as_backend(), test_config());

    let wallet = first
        .create_wallet("main", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");
    assert_eq!(wallet.external_addresses().len(), 50);
    assert_eq!(wallet.internal_addresses().len(), 50);
    assert_eq!(wallet.receive_addresses().len(), 1);
    assert!(wallet.external_addresses()[0].starts_with("addr_test1"));
    assert!(wallet.capabilities().sign);

    let second = WalletManager::new(store, backend.as_backend(), test_config());
    let restored = second.open(wallet.id()).await.expect("Failed to open wallet");
    assert_eq!(restored.external_addresses(), wallet.external_addresses());
    assert_eq!(restored.internal_addresses(), wallet.internal_addresses());
    assert_eq!(restored.reward_address_hex(), wallet.reward_address_hex());
    assert_eq!(*restored.mode(), WalletMode::Software);
}

#[tokio::test]
async fn test_restore_rejects_other_network() {
    let backend = MockBackend::new();
    let store = Arc::new(MemoryStore::new());
    let preprod = WalletManager::new(store.clone(), backend.as_backend(), test_config());
    let wallet = preprod
        .create_wallet("main", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");

    let mut mainnet_config = test_config();
    mainnet_config.network = NetworkId::Mainnet;
    let mainnet = WalletManager::new(store, backend.as_backend(), mainnet_config);
    let result = mainnet.open(wallet.id()).await;
    assert!(matches!(result, Err(WalletError::InvalidState(_))));
}

// ============================================================================
// Test 2: Full Sync
// ============================================================================

#[tokio::test]
async fn test_sync_picks_up_history_and_utxos() {
    init_logger();
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;
    let receive = wallet.external_addresses()[3].clone();
    backend.push_tx(raw_tx("tx01", 4, 0, &foreign_address(), &receive, 25 * ADA));
    backend.set_utxos(vec![raw_utxo("tx01", 0, &receive, 25 * ADA)]);

    let outcome = wallet.sync().await.expect("Sync failed");
    assert_eq!(outcome, SyncOutcome::Completed);
    assert_eq!(wallet.sync_status(), SyncStatus::Idle);

    assert_eq!(wallet.balance().get(PRIMARY_TOKEN_ID).copied(), Some(25 * ADA));
    assert_eq!(wallet.utxos().len(), 1);
    assert!(wallet.is_used_address(&receive));

    let txs = wallet.transactions();
    let info = txs.get("tx01").expect("Transaction missing");
    assert_eq!(info.direction, TransactionDirection::Received);
    assert_eq!(info.status, TxStatus::Successful);
    // Tip is at height 10
    assert_eq!(info.confirmations, 6);
    assert_eq!(info.amount.get(PRIMARY_TOKEN_ID).copied(), Some(25 * ADA as i128));

    // Receive window follows the highest used external address
    assert_eq!(wallet.last_generated_address_index(), 3);
    assert_eq!(wallet.receive_addresses().len(), 4);
}

#[tokio::test]
async fn test_sync_extends_external_chain_past_gap() {
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;
    let far = wallet.external_addresses()[45].clone();
    backend.push_tx(raw_tx("tx45", 3, 0, &foreign_address(), &far, 3 * ADA));

    wallet.sync().await.expect("Sync failed");
    assert_eq!(wallet.external_addresses().len(), 100);
    assert_eq!(wallet.internal_addresses().len(), 50);
}

#[tokio::test]
async fn test_concurrent_sync_is_skipped() {
    init_logger();
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;
    backend.set_latency(std::time::Duration::from_millis(30));

    let (first, second) = tokio::join!(wallet.try_do_full_sync(), wallet.try_do_full_sync());
    let mut outcomes = vec![first.expect("sync"), second.expect("sync")];
    outcomes.sort_by_key(|o| format!("{:?}", o));
    assert_eq!(outcomes, vec![SyncOutcome::Completed, SyncOutcome::Skipped]);
    assert_eq!(backend.best_block_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_blocking_sync_waits_its_turn() {
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;
    backend.set_latency(std::time::Duration::from_millis(20));

    let (background, user) = tokio::join!(wallet.try_do_full_sync(), wallet.sync());
    assert_eq!(background.expect("sync"), SyncOutcome::Completed);
    assert_eq!(user.expect("sync"), SyncOutcome::Completed);
    assert_eq!(backend.best_block_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_utxo_fetch_keeps_cache() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    assert_eq!(wallet.utxos().len(), 1);

    backend.set_utxos(Vec::new());
    backend.fail_utxos.store(true, Ordering::SeqCst);
    let result = wallet.sync().await;

    assert!(matches!(result, Err(WalletError::Network(_))));
    assert!(matches!(wallet.sync_status(), SyncStatus::Failed(_)));
    assert_eq!(wallet.utxos().len(), 1);
    assert_eq!(wallet.balance().get(PRIMARY_TOKEN_ID).copied(), Some(100 * ADA));
}

#[tokio::test]
async fn test_sync_after_close_is_cancelled() {
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;
    wallet.close();
    assert_eq!(wallet.sync().await.expect("sync"), SyncOutcome::Cancelled);
    assert_eq!(backend.best_block_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resync_refetches_from_scratch() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    let history_calls = backend.history_calls.load(Ordering::SeqCst);

    wallet.resync().await.expect("Resync failed");
    assert!(backend.history_calls.load(Ordering::SeqCst) > history_calls);
    assert_eq!(wallet.transactions().len(), 1);
    assert_eq!(wallet.utxos().len(), 1);
}

#[tokio::test]
async fn test_sync_emits_state_events() {
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;
    let receive = wallet.external_addresses()[0].clone();
    backend.push_tx(raw_tx("tx01", 2, 0, &foreign_address(), &receive, 2 * ADA));
    backend.set_utxos(vec![raw_utxo("tx01", 0, &receive, 2 * ADA)]);

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = wallet.subscribe(move |event| sink.lock().push(event.clone()));
    wallet.sync().await.expect("Sync failed");

    {
        let seen = seen.lock();
        assert!(seen.contains(&WalletEvent::TransactionsUpdated));
        assert!(seen.contains(&WalletEvent::UtxosUpdated));
        assert_eq!(seen.last(), Some(&WalletEvent::StateUpdated));
    }

    assert!(wallet.unsubscribe(id));
    let before = seen.lock().len();
    wallet.sync().await.expect("Sync failed");
    assert_eq!(seen.lock().len(), before);
}

// ============================================================================
// Test 3: Background Scheduling
// ============================================================================

#[tokio::test]
async fn test_background_sync_runs_and_stops() {
    let backend = MockBackend::new();
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config();
    config.background_sync = true;
    let manager = WalletManager::new(store, backend.as_backend(), config);
    let wallet = manager
        .create_wallet("bg", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");

    wallet.start_sync();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(wallet.is_background_sync_running());
    assert_eq!(backend.best_block_calls.load(Ordering::SeqCst), 1);

    wallet.stop_sync();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!wallet.is_background_sync_running());
}

#[tokio::test]
async fn test_background_sync_retries_after_failure() {
    let backend = MockBackend::new();
    let mut config = test_config();
    config.background_sync = true;
    let manager = WalletManager::new(Arc::new(MemoryStore::new()), backend.as_backend(), config);
    let wallet = manager
        .create_wallet("flaky", MNEMONIC, PASSWORD)
        .await
        .expect("Failed to create wallet");
    backend.fail_utxos.store(true, Ordering::SeqCst);

    wallet.start_sync();
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    // The failure is logged and the next attempt still runs a second later
    assert!(backend.best_block_calls.load(Ordering::SeqCst) >= 2);
    assert!(wallet.is_background_sync_running());
    assert!(matches!(wallet.sync_status(), SyncStatus::Failed(_)));

    backend.fail_utxos.store(false, Ordering::SeqCst);
    wallet.stop_sync();
}

#[tokio::test]
async fn test_single_sync_when_background_disabled() {
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;

    wallet.start_sync();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(backend.best_block_calls.load(Ordering::SeqCst), 1);
    assert!(!wallet.is_background_sync_running());
}

// ============================================================================
// Test 4: Receive Addresses
// ============================================================================

#[tokio::test]
async fn test_receive_address_generation_is_capped() {
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;

    assert!(!wallet
        .generate_new_receive_address_if_needed()
        .await
        .expect("generate"));

    let mut generated = 0;
    while wallet.generate_new_receive_address().await.expect("generate") {
        generated += 1;
    }
    assert_eq!(generated, 19);
    assert_eq!(wallet.receive_addresses().len(), 20);
    assert!(!wallet.can_generate_new_receive_address());
}

#[tokio::test]
async fn test_new_address_after_newest_is_used() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    assert_eq!(wallet.receive_addresses().len(), 1);

    assert!(wallet
        .generate_new_receive_address_if_needed()
        .await
        .expect("generate"));
    assert_eq!(wallet.receive_addresses().len(), 2);
}

// ============================================================================
// Test 5: Building and Signing
// ============================================================================

#[tokio::test]
async fn test_send_more_than_balance_fails() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;

    let result = wallet
        .create_unsigned_tx(&foreign_address(), &[SendToken::ada(150 * ADA)], None)
        .await;
    match result {
        Err(WalletError::NotEnoughMoney { available, required }) => {
            assert_eq!(available, 100 * ADA);
            assert!(required > 150 * ADA);
        }
        other => panic!("Expected NotEnoughMoney, got {:?}", other.map(|tx| tx.fee())),
    }
}

#[tokio::test]
async fn test_send_signs_and_submits() {
    init_logger();
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    let receiver = foreign_address();

    let unsigned = wallet
        .create_unsigned_tx(&receiver, &[SendToken::ada(50 * ADA)], None)
        .await
        .expect("Failed to build transaction");

    assert_eq!(unsigned.inputs().len(), 1);
    assert_eq!(unsigned.inputs()[0].tx_hash, "fund01");
    assert_eq!(unsigned.outputs()[0].address, receiver);
    assert_eq!(unsigned.outputs()[0].amount, 50 * ADA);
    assert_eq!(unsigned.change().len(), 1);
    assert_eq!(unsigned.change()[0].address, wallet.internal_addresses()[0]);
    assert_eq!(
        unsigned.change()[0].amount + unsigned.fee() + 50 * ADA,
        100 * ADA
    );

    let signed = wallet
        .sign_tx_with_password(&unsigned, PASSWORD)
        .await
        .expect("Failed to sign");
    assert_eq!(signed.witnesses().len(), 1);
    verify_witnesses(&signed).expect("Witnesses must verify");
    assert_eq!(signed.id, unsigned.id().expect("id"));

    wallet.submit_transaction(&signed).await.expect("Submit failed");
    assert_eq!(backend.submitted.lock().len(), 1);
    let info = wallet.transactions().remove(&signed.id).expect("Pending transaction missing");
    assert_eq!(info.status, TxStatus::Pending);
    assert!(info.submitted_at.is_some());
}

#[tokio::test]
async fn test_rejected_submission_can_be_retried() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    let unsigned = wallet
        .create_unsigned_tx(&foreign_address(), &[SendToken::ada(10 * ADA)], None)
        .await
        .expect("Failed to build transaction");
    let signed = wallet
        .sign_tx_with_password(&unsigned, PASSWORD)
        .await
        .expect("Failed to sign");

    backend.reject_submissions.store(1, Ordering::SeqCst);
    let failed = wallet.submit_transaction(&signed).await;
    assert!(matches!(failed, Err(WalletError::Backend { status: 503, .. })));
    assert!(backend.submitted.lock().is_empty());
    assert!(!wallet.transactions().contains_key(&signed.id));

    // Same signed transaction, no rebuilding or re-signing
    wallet.submit_transaction(&signed).await.expect("Retry failed");
    assert_eq!(backend.submitted.lock().len(), 1);
    assert_eq!(backend.submitted.lock()[0], signed.encoded);
    assert_eq!(
        wallet.transactions().get(&signed.id).map(|t| t.status),
        Some(TxStatus::Pending)
    );
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    let unsigned = wallet
        .create_unsigned_tx(&foreign_address(), &[SendToken::ada(5 * ADA)], None)
        .await
        .expect("Failed to build transaction");

    let result = wallet.sign_tx_with_password(&unsigned, "not the password").await;
    assert!(matches!(result, Err(WalletError::WrongPassword)));
}

#[tokio::test]
async fn test_change_password() {
    let backend = MockBackend::new();
    let (_manager, wallet) = software_wallet(&backend).await;

    wallet
        .change_password(PASSWORD, "a brand new password")
        .await
        .expect("Failed to change password");
    assert!(matches!(
        wallet.get_decrypted_root_key(PASSWORD).await,
        Err(WalletError::WrongPassword)
    ));
    wallet
        .get_decrypted_root_key("a brand new password")
        .await
        .expect("New password must decrypt");
}

#[tokio::test]
async fn test_ttl_falls_back_to_local_clock() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    let with_server = wallet
        .create_unsigned_tx(&foreign_address(), &[SendToken::ada(5 * ADA)], None)
        .await
        .expect("build");

    backend.fail_status.store(true, Ordering::SeqCst);
    let with_clock = wallet
        .create_unsigned_tx(&foreign_address(), &[SendToken::ada(5 * ADA)], None)
        .await
        .expect("build");

    assert!(with_clock.ttl().abs_diff(with_server.ttl()) < 60);
}

// ============================================================================
// Test 6: Staking
// ============================================================================

#[tokio::test]
async fn test_delegation_registers_key_first() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    assert_eq!(
        wallet.get_staking_info().await.expect("staking info"),
        StakingInfo::NotRegistered
    );

    let unsigned = wallet
        .create_delegation_tx("pool1abc")
        .await
        .expect("Failed to build delegation");
    assert_eq!(unsigned.certificates().len(), 2);
    assert_eq!(unsigned.deposit(), 2 * ADA);
    assert!(unsigned.needs_staking_key());

    let signed = wallet
        .sign_tx_with_password(&unsigned, PASSWORD)
        .await
        .expect("Failed to sign");
    assert_eq!(signed.witnesses().len(), 2);
    verify_witnesses(&signed).expect("Witnesses must verify");
}

#[tokio::test]
async fn test_deregistering_unregistered_key_fails() {
    let backend = MockBackend::new();
    let (_manager, wallet) = funded_wallet(&backend).await;
    let result = wallet.create_withdrawal_tx(true).await;
    assert!(matches!(result, Err(WalletError::InvalidState(_))));
}

// ============================================================================
// Test 7: Hardware and Read-Only Wallets
// ============================================================================

#[tokio::test]
async fn test_hardware_wallet_signs_through_device() {
    init_logger();
    let backend = MockBackend::new();
    let (manager, software) = funded_wallet(&backend).await;
    let hw = manager
        .create_hw_wallet("ledger", &software.account_public_key().to_hex(), device_info(&software))
        .await
        .expect("Failed to create hardware wallet");
    hw.sync().await.expect("Sync failed");
    assert!(!hw.capabilities().sign);
    assert!(hw.capabilities().sign_with_ledger);

    let unsigned = hw
        .create_unsigned_tx(&foreign_address(), &[SendToken::ada(10 * ADA)], None)
        .await
        .expect("Failed to build transaction");
    let device = SoftDevice {
        root: KeyManager::root_key_from_mnemonic(MNEMONIC, NetworkId::Preprod).expect("root"),
        calls: AtomicUsize::new(0),
    };
    let signed = hw
        .sign_tx_with_ledger(&unsigned, true, &device)
        .await
        .expect("Device signing failed");

    assert_eq!(device.calls.load(Ordering::SeqCst), 1);
    verify_witnesses(&signed).expect("Witnesses must verify");
    assert!(matches!(
        hw.sign_tx_with_password(&unsigned, PASSWORD).await,
        Err(WalletError::SigningUnsupported(_))
    ));
}

#[tokio::test]
async fn test_ledger_signing_needs_device_info() {
    let backend = MockBackend::new();
    let (manager, software) = funded_wallet(&backend).await;
    let unsigned = software
        .create_unsigned_tx(&foreign_address(), &[SendToken::ada(10 * ADA)], None)
        .await
        .expect("Failed to build transaction");
    let device = SoftDevice {
        root: KeyManager::root_key_from_mnemonic(MNEMONIC, NetworkId::Preprod).expect("root"),
        calls: AtomicUsize::new(0),
    };

    let result = software.sign_tx_with_ledger(&unsigned, true, &device).await;
    assert!(matches!(result, Err(WalletError::InvalidState(_))));

    let read_only = manager
        .create_read_only_wallet("watch", &software.account_public_key().to_hex())
        .await
        .expect("Failed to create read-only wallet");
    let result = read_only.sign_tx_with_ledger(&unsigned, true, &device).await;
    assert!(matches!(result, Err(WalletError::SigningUnsupported(_))));
    assert!(matches!(
        read_only.sign_tx_with_password(&unsigned, PASSWORD).await,
        Err(WalletError::SigningUnsupported(_))
    ));
    assert!(matches!(
        read_only.create_delegation_tx("pool1abc").await,
        Err(WalletError::SigningUnsupported(_))
    ));
    assert_eq!(device.calls.load(Ordering::SeqCst), 0);
}
