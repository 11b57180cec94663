//! Common test utilities for wallet integration tests
//!
//! This module provides shared test infrastructure including:
//! - A scripted in-process `Backend` with call counters and failure injection
//! - Fast wallet configuration (cheap key stretching, no background loop)
//! - Builders for backend wire records

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use shelley_wallet::backend::types::*;
use shelley_wallet::config::KdfParams;
use shelley_wallet::{
    AddressGenerator, Backend, ChainType, KeyManager, NetworkId, Result, ShelleyAddressGenerator, WalletConfig,
    WalletError,
};

pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const OTHER_MNEMONIC: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";
pub const PASSWORD: &str = "correct horse battery";
pub const ADA: u64 = 1_000_000;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Preprod config with cheap key stretching and no repeating sync loop
pub fn test_config() -> WalletConfig {
    let mut config = WalletConfig::for_network(NetworkId::Preprod);
    config.kdf = KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };
    config.background_sync = false;
    config.history_refresh_secs = 1;
    config
}

/// First external address of another account, a valid preprod receiver
pub fn foreign_address() -> String {
    let root = KeyManager::root_key_from_mnemonic(OTHER_MNEMONIC, NetworkId::Preprod).expect("root key");
    let account = root.account_public_key().expect("account key");
    let generator =
        ShelleyAddressGenerator::new(account, ChainType::External, NetworkId::Preprod).expect("generator");
    generator.generate(0..1).expect("address").remove(0)
}

pub fn raw_utxo(tx_hash: &str, index: u32, address: &str, amount: u64) -> RawUtxo {
    RawUtxo {
        utxo_id: format!("{}{}", tx_hash, index),
        tx_hash: tx_hash.to_string(),
        tx_index: index,
        receiver: address.to_string(),
        amount,
        assets: Vec::new(),
        block_num: 1,
    }
}

/// A successful payment from `from` to `to`
pub fn raw_tx(hash: &str, block: u64, ordinal: u64, from: &str, to: &str, amount: u64) -> RawTransaction {
    RawTransaction {
        hash: hash.to_string(),
        fee: Some(170_000),
        tx_type: Some("shelley".to_string()),
        withdrawals: Vec::new(),
        certificates: Vec::new(),
        tx_ordinal: Some(ordinal),
        tx_state: RawTxState::Successful,
        last_update: None,
        block_num: Some(block),
        block_hash: Some(block_hash(block)),
        time: None,
        epoch: Some(0),
        slot: Some(block * 20),
        inputs: vec![RawTxInput {
            address: from.to_string(),
            amount: amount + 170_000,
            id: format!("{}-in", hash),
            index: 0,
            tx_hash: format!("{}-src", hash),
            assets: Vec::new(),
        }],
        outputs: vec![RawTxOutput {
            address: to.to_string(),
            amount,
            assets: Vec::new(),
        }],
    }
}

pub fn block_hash(height: u64) -> String {
    format!("block{:04}", height)
}

fn touches(tx: &RawTransaction, addresses: &HashSet<&str>) -> bool {
    tx.inputs.iter().any(|i| addresses.contains(i.address.as_str()))
        || tx.outputs.iter().any(|o| addresses.contains(o.address.as_str()))
        || tx.withdrawals.iter().any(|w| addresses.contains(w.address.as_str()))
        || tx
            .certificates
            .iter()
            .filter_map(|c| c.reward_address.as_deref())
            .any(|a| addresses.contains(a))
}

/// Scripted backend; every call is counted
pub struct MockBackend {
    pub used: RwLock<HashSet<String>>,
    pub utxos: RwLock<Vec<RawUtxo>>,
    pub history: RwLock<Vec<RawTransaction>>,
    pub account_states: RwLock<AccountStateResponse>,
    pub height: RwLock<u64>,
    pub page_size: usize,
    pub latency: RwLock<Duration>,
    pub fail_utxos: AtomicBool,
    pub fail_status: AtomicBool,
    /// Number of upcoming submissions to reject
    pub reject_submissions: AtomicUsize,
    pub submitted: Mutex<Vec<Vec<u8>>>,
    pub filter_used_calls: AtomicUsize,
    pub utxo_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub best_block_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_page_size(50))
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            used: RwLock::new(HashSet::new()),
            utxos: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            account_states: RwLock::new(AccountStateResponse::new()),
            height: RwLock::new(10),
            page_size,
            latency: RwLock::new(Duration::ZERO),
            fail_utxos: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            reject_submissions: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            filter_used_calls: AtomicUsize::new(0),
            utxo_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            best_block_calls: AtomicUsize::new(0),
        }
    }

    pub fn as_backend(self: &Arc<Self>) -> Arc<dyn Backend> {
        self.clone()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    pub fn mark_used(&self, addresses: &[String]) {
        self.used.write().extend(addresses.iter().cloned());
    }

    pub fn set_utxos(&self, utxos: Vec<RawUtxo>) {
        *self.utxos.write() = utxos;
    }

    /// Append to history; touched addresses become used
    pub fn push_tx(&self, tx: RawTransaction) {
        {
            let mut used = self.used.write();
            used.extend(tx.inputs.iter().map(|i| i.address.clone()));
            used.extend(tx.outputs.iter().map(|o| o.address.clone()));
        }
        let block = tx.block_num.unwrap_or_default();
        let mut height = self.height.write();
        if block > *height {
            *height = block;
        }
        self.history.write().push(tx);
    }

    async fn delay(&self) {
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn filter_used_addresses(&self, addresses: &[String]) -> Result<Vec<String>> {
        self.filter_used_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let used = self.used.read();
        Ok(addresses.iter().filter(|a| used.contains(*a)).cloned().collect())
    }

    async fn fetch_tx_history(&self, request: &TxHistoryRequest) -> Result<TxHistoryPage> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let wanted: HashSet<&str> = request.addresses.iter().map(String::as_str).collect();
        let mut matching: Vec<RawTransaction> = self
            .history
            .read()
            .iter()
            .filter(|tx| touches(tx, &wanted))
            .cloned()
            .collect();
        matching.sort_by_key(|tx| (tx.block_num, tx.tx_ordinal));

        let start = match &request.after {
            Some(cursor) => {
                let position = matching
                    .iter()
                    .position(|tx| tx.hash == cursor.tx)
                    .ok_or_else(|| WalletError::Backend {
                        status: 404,
                        message: format!("Unknown transaction {}", cursor.tx),
                    })?;
                position + 1
            }
            None => 0,
        };
        let transactions: Vec<RawTransaction> = matching.into_iter().skip(start).take(self.page_size).collect();
        let is_last = transactions.len() < self.page_size;
        Ok(TxHistoryPage {
            transactions,
            is_last,
        })
    }

    async fn fetch_utxos_for_addresses(&self, addresses: &[String]) -> Result<Vec<RawUtxo>> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_utxos.load(Ordering::SeqCst) {
            return Err(WalletError::Network("connection reset".to_string()));
        }
        let wanted: HashSet<&str> = addresses.iter().map(String::as_str).collect();
        Ok(self
            .utxos
            .read()
            .iter()
            .filter(|u| wanted.contains(u.receiver.as_str()))
            .cloned()
            .collect())
    }

    async fn submit_transaction(&self, signed_tx: &[u8]) -> Result<SubmitReceipt> {
        let rejected = self
            .reject_submissions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(WalletError::Backend {
                status: 503,
                message: "node busy".to_string(),
            });
        }
        self.submitted.lock().push(signed_tx.to_vec());
        Ok(SubmitReceipt::default())
    }

    async fn get_account_state(&self, reward_addresses: &[String]) -> Result<AccountStateResponse> {
        let states = self.account_states.read();
        Ok(reward_addresses
            .iter()
            .map(|a| (a.clone(), states.get(a).cloned().flatten()))
            .collect())
    }

    async fn get_best_block(&self) -> Result<BestBlock> {
        self.best_block_calls.fetch_add(1, Ordering::SeqCst);
        let height = *self.height.read();
        Ok(BestBlock {
            epoch: Some(0),
            slot: Some(height * 20),
            hash: Some(block_hash(height)),
            height,
        })
    }

    async fn check_server_status(&self) -> Result<ServerStatus> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(WalletError::Network("status unavailable".to_string()));
        }
        Ok(ServerStatus {
            is_server_ok: true,
            is_maintenance: false,
            server_time: Some(chrono::Utc::now().timestamp_millis()),
        })
    }
}
