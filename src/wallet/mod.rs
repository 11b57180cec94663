//! Shelley wallet
//!
//! - `mod.rs` - `ShelleyWallet`: lifecycle, views, receive addresses, keys
//!   and transactions
//! - `sync.rs` - sync lock, full sync and the background scheduler
//! - `state.rs` - persisted snapshot and listing metadata
//! - `manager.rs` - `WalletManager`, the owner of open wallets

pub mod manager;
pub mod state;
pub mod sync;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::backend::{fetch_account_state_chunked, AccountState, Backend, SubmitReceipt};
use crate::chain::AddressChain;
use crate::config::WalletConfig;
use crate::crypto::address::reward_address_hex;
use crate::crypto::keys::{ROLE_EXTERNAL, ROLE_INTERNAL};
use crate::crypto::{
    validate_password, AccountPublicKey, ChainType, EncryptedRootKey, RootKey, ShelleyAddressGenerator,
};
use crate::error::{Result, WalletError};
use crate::events::{Listeners, SubscriptionId, WalletEvent};
use crate::memos::MemosManager;
use crate::storage::{read_json, write_json, KeyValueStore};
use crate::transactions::{
    delegation_status, process_transaction, DelegationStatus, Transaction, TransactionInfo, TransactionManager,
    TxStatus,
};
use crate::tx::builder::{AddressedUtxo, SendPlan, TransactionBuilder, TxRequest};
use crate::tx::ledger::{assemble_signed_tx, build_sign_request, HardwareSigner, Transport};
use crate::tx::types::{
    Addressing, AuxiliaryData, Balance, Certificate, SendToken, SignedTx, TxOutput, UnsignedTx, Withdrawal,
    PRIMARY_TOKEN_ID,
};
use crate::utxo::{Utxo, UtxoManager};

pub use manager::WalletManager;
pub use state::{Capabilities, WalletKind, WalletMeta, WalletMode, WalletSnapshot, WALLET_STATE_VERSION};
pub use sync::{SyncLock, SyncOutcome, SyncStatus};

use sync::BackgroundSync;

const DATA_KEY: &str = "data";
const ROOT_KEY_KEY: &str = "root-key";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum StakingInfo {
    NotRegistered,
    Registered,
    Staked { pool_id: String, amount: u64, rewards: u64 },
}

pub struct ShelleyWallet {
    id: String,
    config: WalletConfig,
    mode: WalletMode,
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn Backend>,
    account_public_key: AccountPublicKey,
    reward_address_hex: String,
    internal_chain: AddressChain,
    external_chain: AddressChain,
    utxo_manager: UtxoManager,
    transaction_manager: TransactionManager,
    memos_manager: MemosManager,
    builder: TransactionBuilder,
    last_generated_address_index: RwLock<usize>,
    events: Arc<Listeners<WalletEvent>>,
    sync_lock: SyncLock,
    save_lock: tokio::sync::Mutex<()>,
    sync_status: RwLock<SyncStatus>,
    closed: Arc<AtomicBool>,
    background: Mutex<Option<BackgroundSync>>,
}

impl ShelleyWallet {
    fn assemble(
        id: &str,
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn Backend>,
        config: WalletConfig,
        mode: WalletMode,
        account_public_key: AccountPublicKey,
        chains: Option<&WalletSnapshot>,
    ) -> Result<Self> {
        let network = config.network;
        let discovery = config.discovery;
        let internal_gen = Arc::new(ShelleyAddressGenerator::new(
            account_public_key.clone(),
            ChainType::Internal,
            network,
        )?);
        let external_gen = Arc::new(ShelleyAddressGenerator::new(
            account_public_key.clone(),
            ChainType::External,
            network,
        )?);

        let (internal_chain, external_chain, last_generated) = match chains {
            Some(snapshot) => (
                AddressChain::from_json(snapshot.internal_chain.clone(), internal_gen)?,
                AddressChain::from_json(snapshot.external_chain.clone(), external_gen)?,
                snapshot.last_generated_address_index,
            ),
            None => (
                AddressChain::new(internal_gen, discovery.block_size, discovery.gap_limit),
                AddressChain::new(external_gen, discovery.block_size, discovery.gap_limit),
                0,
            ),
        };

        let events: Arc<Listeners<WalletEvent>> = Arc::new(Listeners::new());
        for chain in [&internal_chain, &external_chain] {
            let events = events.clone();
            chain.subscribe_new_addresses(move |_| events.notify(&WalletEvent::AddressesUpdated));
        }

        let closed = Arc::new(AtomicBool::new(false));
        let transaction_manager = TransactionManager::new(store.clone(), backend.clone(), config.backend.clone())
            .with_close_flag(closed.clone());
        {
            let events = events.clone();
            transaction_manager.subscribe(move |_| events.notify(&WalletEvent::TransactionsUpdated));
        }

        let reward_address_hex = reward_address_hex(network, &account_public_key.staking_key()?);

        Ok(Self {
            id: id.to_string(),
            utxo_manager: UtxoManager::new(store.clone(), backend.clone(), config.backend.clone())
                .with_close_flag(closed.clone()),
            memos_manager: MemosManager::new(store.clone()),
            builder: TransactionBuilder::new(config.protocol, network),
            transaction_manager,
            internal_chain,
            external_chain,
            reward_address_hex,
            account_public_key,
            last_generated_address_index: RwLock::new(last_generated),
            events,
            sync_lock: SyncLock::new(),
            save_lock: tokio::sync::Mutex::new(()),
            sync_status: RwLock::new(SyncStatus::Idle),
            closed,
            background: Mutex::new(None),
            config,
            mode,
            store,
            backend,
        })
    }

    /// New wallet with freshly generated first blocks. Software wallets must
    /// pass their encrypted root key.
    pub async fn create(
        id: &str,
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn Backend>,
        config: WalletConfig,
        mode: WalletMode,
        account_public_key: AccountPublicKey,
        root_key: Option<EncryptedRootKey>,
    ) -> Result<Arc<Self>> {
        match (&mode, &root_key) {
            (WalletMode::Software, None) => {
                return Err(WalletError::InvalidInput(
                    "Software wallet needs an encrypted root key".to_string(),
                ))
            }
            (WalletMode::Hardware(info), _) if info.account_public_key_hex != account_public_key.to_hex() => {
                return Err(WalletError::InvalidInput(
                    "Device info belongs to another account".to_string(),
                ))
            }
            _ => {}
        }

        let wallet = Self::assemble(id, store, backend, config, mode, account_public_key, None)?;
        wallet.internal_chain.initialize()?;
        wallet.external_chain.initialize()?;
        if let Some(root_key) = root_key {
            write_json(wallet.store.as_ref(), ROOT_KEY_KEY, &root_key).await?;
        }
        wallet.save().await?;

        log::info!("Created {:?} wallet {}", wallet.mode.kind(), wallet.id);
        wallet.events.notify(&WalletEvent::Initialized);
        Ok(Arc::new(wallet))
    }

    /// Load a wallet from its snapshot and cached managers
    pub async fn restore(
        id: &str,
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn Backend>,
        config: WalletConfig,
    ) -> Result<Arc<Self>> {
        let snapshot: WalletSnapshot = read_json(store.as_ref(), DATA_KEY)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(id.to_string()))?;
        if snapshot.network != config.network {
            return Err(WalletError::InvalidState(format!(
                "Wallet {} belongs to {:?}, configured for {:?}",
                id, snapshot.network, config.network
            )));
        }
        let mode = snapshot.mode()?;
        let account_public_key = AccountPublicKey::from_hex(&snapshot.public_key_hex)
            .map_err(|e| WalletError::InvalidState(format!("Stored account key: {}", e)))?;

        let wallet = Self::assemble(id, store, backend, config, mode, account_public_key, Some(&snapshot))?;
        wallet.internal_chain.initialize()?;
        wallet.external_chain.initialize()?;
        wallet.utxo_manager.load().await?;
        wallet.transaction_manager.load().await?;
        wallet.memos_manager.load().await?;

        log::info!(
            "Restored wallet {} ({} external, {} internal addresses)",
            id,
            wallet.external_chain.size(),
            wallet.internal_chain.size()
        );
        wallet.events.notify(&WalletEvent::Initialized);
        Ok(Arc::new(wallet))
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            version: WALLET_STATE_VERSION,
            network: self.config.network,
            public_key_hex: self.account_public_key.to_hex(),
            last_generated_address_index: *self.last_generated_address_index.read(),
            internal_chain: self.internal_chain.to_json(),
            external_chain: self.external_chain.to_json(),
            is_hw: matches!(self.mode, WalletMode::Hardware(_)),
            hw_device_info: self.mode.device_info().cloned(),
            is_read_only: self.mode == WalletMode::ReadOnly,
        }
    }

    /// Snapshot writes are serialized so the last one carries the newest state
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        write_json(self.store.as_ref(), DATA_KEY, &self.snapshot()).await?;
        Ok(())
    }

    /// Wipe cached chain data and every persisted record of this wallet.
    /// Waits for an in-flight sync so nothing it writes outlives the wipe.
    pub async fn clear(&self) -> Result<()> {
        let _sync = self.sync_lock.acquire().await;
        let _save = self.save_lock.lock().await;
        self.utxo_manager.clear().await?;
        self.transaction_manager.clear().await?;
        self.memos_manager.clear().await?;
        for key in self.store.keys("").await? {
            self.store.remove(&key).await?;
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn mode(&self) -> &WalletMode {
        &self.mode
    }

    pub fn capabilities(&self) -> Capabilities {
        self.mode.capabilities()
    }

    pub fn account_public_key(&self) -> &AccountPublicKey {
        &self.account_public_key
    }

    pub fn reward_address_hex(&self) -> &str {
        &self.reward_address_hex
    }

    pub fn internal_addresses(&self) -> Vec<String> {
        self.internal_chain.addresses()
    }

    pub fn external_addresses(&self) -> Vec<String> {
        self.external_chain.addresses()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop background sync; in-flight results are discarded
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_sync();
        log::info!("Closed wallet {}", self.id);
    }

    // Events

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&WalletEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // Receive addresses

    fn last_used_index(&self, chain: &AddressChain) -> Option<usize> {
        chain
            .addresses()
            .iter()
            .rposition(|a| self.transaction_manager.is_address_used(a))
    }

    pub(crate) fn update_last_generated_index(&self) {
        if let Some(last_used) = self.last_used_index(&self.external_chain) {
            let mut last_generated = self.last_generated_address_index.write();
            if last_used > *last_generated {
                *last_generated = last_used;
            }
        }
    }

    pub fn last_generated_address_index(&self) -> usize {
        *self.last_generated_address_index.read()
    }

    pub fn receive_addresses(&self) -> Vec<String> {
        let mut addresses = self.external_chain.addresses();
        addresses.truncate(self.num_receive_addresses());
        addresses
    }

    pub fn num_receive_addresses(&self) -> usize {
        (self.last_generated_address_index() + 1).min(self.external_chain.size())
    }

    /// At most `max_generated_unused` addresses may be handed out past the
    /// last used one
    pub fn can_generate_new_receive_address(&self) -> bool {
        if self.num_receive_addresses() >= self.external_chain.size() {
            return false;
        }
        let last_used = self
            .last_used_index(&self.external_chain)
            .map_or(-1, |i| i as i64);
        (self.last_generated_address_index() as i64) - last_used
            < self.config.discovery.max_generated_unused as i64
    }

    pub async fn generate_new_receive_address(&self) -> Result<bool> {
        if !self.can_generate_new_receive_address() {
            return Ok(false);
        }
        *self.last_generated_address_index.write() += 1;
        self.save().await?;
        self.events.notify(&WalletEvent::StateUpdated);
        Ok(true)
    }

    /// Hand out a new address only when the newest one has been used
    pub async fn generate_new_receive_address_if_needed(&self) -> Result<bool> {
        let newest = self.receive_addresses().last().cloned();
        match newest {
            Some(address) if self.transaction_manager.is_address_used(&address) => {
                self.generate_new_receive_address().await
            }
            _ => Ok(false),
        }
    }

    // Views

    pub fn utxos(&self) -> Vec<Utxo> {
        self.utxo_manager.get_cached_utxos()
    }

    pub fn balance(&self) -> Balance {
        self.utxo_manager.balance()
    }

    pub fn is_used_address(&self, address: &str) -> bool {
        self.transaction_manager.is_address_used(address)
    }

    fn own_addresses(&self) -> HashSet<String> {
        self.internal_chain
            .addresses()
            .into_iter()
            .chain(self.external_chain.addresses())
            .chain(std::iter::once(self.reward_address_hex.clone()))
            .collect()
    }

    /// Every stored transaction interpreted for this wallet
    pub fn transactions(&self) -> BTreeMap<String, TransactionInfo> {
        let own = self.own_addresses();
        let confirmations = self.transaction_manager.confirmation_counts();
        let memos = self.memos_manager.get_memos();
        self.transaction_manager
            .transactions()
            .values()
            .map(|tx| {
                let info = process_transaction(
                    tx,
                    &own,
                    confirmations.get(&tx.id).copied().unwrap_or(0),
                    memos.get(&tx.id).cloned(),
                );
                (tx.id.clone(), info)
            })
            .collect()
    }

    pub fn get_delegation_status(&self) -> DelegationStatus {
        delegation_status(&self.transaction_manager.certificates_for(&self.reward_address_hex))
    }

    pub async fn fetch_account_state(&self) -> Result<Option<AccountState>> {
        let mut states = fetch_account_state_chunked(
            self.backend.as_ref(),
            std::slice::from_ref(&self.reward_address_hex),
            self.config.backend.account_state_max_addresses,
        )
        .await?;
        Ok(states.remove(&self.reward_address_hex).flatten())
    }

    pub async fn get_staking_info(&self) -> Result<StakingInfo> {
        let status = self.get_delegation_status();
        if !status.is_registered {
            return Ok(StakingInfo::NotRegistered);
        }
        let Some(pool_id) = status.pool_key_hash else {
            return Ok(StakingInfo::Registered);
        };
        let rewards = self
            .fetch_account_state()
            .await?
            .map(|s| s.remaining_amount)
            .unwrap_or(0);
        let utxo_ada = self.balance().get(PRIMARY_TOKEN_ID).copied().unwrap_or(0);
        Ok(StakingInfo::Staked {
            pool_id,
            amount: utxo_ada + rewards,
            rewards,
        })
    }

    pub async fn save_memo(&self, tx_id: &str, memo: &str) -> Result<()> {
        self.memos_manager.save_memo(tx_id, memo).await?;
        self.events.notify(&WalletEvent::TransactionsUpdated);
        Ok(())
    }

    // Keys

    pub async fn get_decrypted_root_key(&self, password: &str) -> Result<RootKey> {
        if self.mode != WalletMode::Software {
            return Err(WalletError::SigningUnsupported(format!(
                "{:?} wallet holds no root key",
                self.mode.kind()
            )));
        }
        let encrypted: EncryptedRootKey = read_json(self.store.as_ref(), ROOT_KEY_KEY)
            .await?
            .ok_or_else(|| WalletError::InvalidState("Encrypted root key is missing".to_string()))?;
        encrypted.decrypt(password)
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        validate_password(new_password)?;
        let root_key = self.get_decrypted_root_key(old_password).await?;
        let encrypted = EncryptedRootKey::encrypt(&root_key, new_password, self.config.kdf)?;
        write_json(self.store.as_ref(), ROOT_KEY_KEY, &encrypted).await?;
        log::info!("Password changed for wallet {}", self.id);
        Ok(())
    }

    // Transactions

    fn addressing_of(&self, address: &str) -> Option<Addressing> {
        if let Ok(index) = self.external_chain.get_index_of_address(address) {
            return Some(Addressing {
                role: ROLE_EXTERNAL,
                index: index as u32,
            });
        }
        self.internal_chain
            .get_index_of_address(address)
            .ok()
            .map(|index| Addressing {
                role: ROLE_INTERNAL,
                index: index as u32,
            })
    }

    fn addressed_utxos(&self) -> Vec<AddressedUtxo> {
        self.utxos()
            .into_iter()
            .filter_map(|utxo| match self.addressing_of(&utxo.receiver) {
                Some(addressing) => Some(AddressedUtxo { utxo, addressing }),
                None => {
                    log::warn!("Skipping utxo {} at a foreign address", utxo.utxo_id);
                    None
                }
            })
            .collect()
    }

    /// First internal address with no history
    fn change_address(&self) -> Result<(String, Addressing)> {
        self.internal_chain
            .addresses()
            .into_iter()
            .enumerate()
            .find(|(_, a)| !self.transaction_manager.is_address_used(a))
            .map(|(index, address)| {
                (
                    address,
                    Addressing {
                        role: ROLE_INTERNAL,
                        index: index as u32,
                    },
                )
            })
            .ok_or_else(|| WalletError::InvalidState("No unused internal address for change".to_string()))
    }

    /// Current absolute slot plus the TTL offset, from server time when the
    /// backend answers
    async fn compute_ttl(&self) -> u64 {
        let server_ms = match self.backend.check_server_status().await {
            Ok(status) => status.server_time,
            Err(e) => {
                log::warn!("Server status unavailable, using local clock: {}", e);
                None
            }
        };
        let now_secs = server_ms
            .map(|ms| ms / 1000)
            .unwrap_or_else(|| Utc::now().timestamp());
        self.config.network_time.absolute_slot_at(now_secs) + self.config.protocol.ttl_offset
    }

    fn request(&self, outputs: Vec<TxOutput>, ttl: u64) -> Result<TxRequest> {
        let (change_address, change_addressing) = self.change_address()?;
        Ok(TxRequest {
            utxos: self.addressed_utxos(),
            outputs,
            change_address,
            change_addressing,
            ttl,
            certificates: Vec::new(),
            withdrawals: Vec::new(),
            deposit: 0,
            refund: 0,
            auxiliary_data: None,
        })
    }

    pub async fn create_unsigned_tx(
        &self,
        receiver: &str,
        tokens: &[SendToken],
        auxiliary_data: Option<AuxiliaryData>,
    ) -> Result<UnsignedTx> {
        let utxos = self.utxos();
        let plan = self.builder.plan_send(receiver, tokens, &utxos)?;
        let ttl = self.compute_ttl().await;
        match plan {
            SendPlan::Outputs(outputs) => {
                let mut request = self.request(outputs, ttl)?;
                request.auxiliary_data = auxiliary_data;
                self.builder.build(request)
            }
            SendPlan::All { receiver } => {
                self.builder
                    .build_send_all(self.addressed_utxos(), &receiver, ttl, auxiliary_data)
            }
        }
    }

    fn ensure_can_stake(&self) -> Result<()> {
        if !self.capabilities().stake {
            return Err(WalletError::SigningUnsupported(
                "Read-only wallets cannot stake".to_string(),
            ));
        }
        Ok(())
    }

    /// Delegate to `pool_key_hash`, registering the staking key first when needed
    pub async fn create_delegation_tx(&self, pool_key_hash: &str) -> Result<UnsignedTx> {
        self.ensure_can_stake()?;
        let status = self.get_delegation_status();
        let ttl = self.compute_ttl().await;
        let mut request = self.request(Vec::new(), ttl)?;
        if !status.is_registered {
            request.certificates.push(Certificate::StakeRegistration {
                reward_address: self.reward_address_hex.clone(),
            });
            request.deposit = self.config.protocol.key_deposit;
        }
        request.certificates.push(Certificate::StakeDelegation {
            reward_address: self.reward_address_hex.clone(),
            pool_key_hash: pool_key_hash.to_string(),
        });
        self.builder.build(request)
    }

    /// Withdraw every accumulated reward; deregistering also refunds the deposit
    pub async fn create_withdrawal_tx(&self, deregister: bool) -> Result<UnsignedTx> {
        self.ensure_can_stake()?;
        let rewards = self
            .fetch_account_state()
            .await?
            .map(|s| s.remaining_amount)
            .unwrap_or(0);
        let ttl = self.compute_ttl().await;
        let mut request = self.request(Vec::new(), ttl)?;
        if rewards > 0 {
            request.withdrawals.push(Withdrawal {
                reward_address: self.reward_address_hex.clone(),
                amount: rewards,
            });
        }
        if deregister {
            if !self.get_delegation_status().is_registered {
                return Err(WalletError::InvalidState("Staking key is not registered".to_string()));
            }
            request.certificates.push(Certificate::StakeDeregistration {
                reward_address: self.reward_address_hex.clone(),
            });
            request.refund = self.config.protocol.key_deposit;
        }
        self.builder.build(request)
    }

    /// Sign with a decrypted root key; the key is only borrowed for the call
    pub fn sign_tx(&self, unsigned: &UnsignedTx, root_key: &RootKey) -> Result<SignedTx> {
        if !self.capabilities().sign {
            return Err(WalletError::SigningUnsupported(format!(
                "{:?} wallet cannot sign with a root key",
                self.mode.kind()
            )));
        }
        if root_key.account_public_key()? != self.account_public_key {
            return Err(WalletError::InvalidInput(
                "Root key does not belong to this wallet".to_string(),
            ));
        }
        crate::tx::signer::sign_tx(unsigned, root_key)
    }

    /// Decrypt, sign and drop the root key
    pub async fn sign_tx_with_password(&self, unsigned: &UnsignedTx, password: &str) -> Result<SignedTx> {
        let root_key = self.get_decrypted_root_key(password).await?;
        self.sign_tx(unsigned, &root_key)
    }

    pub async fn sign_tx_with_ledger(
        &self,
        unsigned: &UnsignedTx,
        use_usb: bool,
        signer: &dyn HardwareSigner,
    ) -> Result<SignedTx> {
        let device = match &self.mode {
            WalletMode::Hardware(info) => info,
            WalletMode::ReadOnly => {
                return Err(WalletError::SigningUnsupported(
                    "Read-only wallet cannot sign".to_string(),
                ))
            }
            WalletMode::Software => {
                return Err(WalletError::InvalidState(
                    "No hardware device info for this wallet".to_string(),
                ))
            }
        };
        let transport = Transport::from_use_usb(use_usb);
        let request = build_sign_request(unsigned, self.config.network)?;
        log::info!(
            "Requesting {} signatures from {} over {:?}",
            request.signing_paths.len(),
            device.hw_features.model,
            transport
        );
        let response = signer.sign(&request, device, transport).await?;
        assemble_signed_tx(unsigned, &response, &self.account_public_key)
    }

    /// Submit and record as pending. The signed transaction stays valid for
    /// another attempt if the backend rejects it.
    pub async fn submit_transaction(&self, signed: &SignedTx) -> Result<SubmitReceipt> {
        let receipt = self.backend.submit_transaction(&signed.encoded).await?;
        log::info!("Submitted transaction {}", signed.id);

        let body = signed.body();
        let pending = Transaction {
            id: signed.id.clone(),
            status: TxStatus::Pending,
            fee: Some(body.fee),
            inputs: body.inputs.clone(),
            outputs: body.outputs.clone(),
            certificates: body.certificates.clone(),
            withdrawals: body.withdrawals.clone(),
            block_num: None,
            block_hash: None,
            tx_ordinal: None,
            epoch: None,
            slot: None,
            last_updated_at: None,
            submitted_at: Some(Utc::now()),
        };
        self.transaction_manager.add_pending(pending).await?;
        Ok(receipt)
    }
}
