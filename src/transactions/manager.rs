use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::delegation::CertificateEntry;
use super::{Transaction, TxStatus};
use crate::backend::types::{BestBlock, HistoryCursor, TxHistoryRequest};
use crate::backend::Backend;
use crate::config::BackendConfig;
use crate::error::Result;
use crate::events::{Listeners, SubscriptionId};
use crate::storage::{read_json, write_json, KeyValueStore};

const TXS_KEY: &str = "txs";

#[derive(Default, Serialize, Deserialize)]
struct StoredHistory {
    transactions: Vec<Transaction>,
    #[serde(default)]
    tip: Option<BestBlock>,
}

#[derive(Default)]
struct HistoryState {
    transactions: BTreeMap<String, Transaction>,
    per_address_txs: HashMap<String, Vec<String>>,
    per_reward_address_certificates: HashMap<String, Vec<CertificateEntry>>,
    tip: Option<BestBlock>,
}

impl HistoryState {
    /// Insert or replace by id; a local submission timestamp survives replacement
    fn upsert(&mut self, incoming: Transaction) -> bool {
        match self.transactions.get(&incoming.id) {
            Some(existing) if *existing == incoming => false,
            Some(existing) => {
                let mut updated = incoming;
                if updated.submitted_at.is_none() {
                    updated.submitted_at = existing.submitted_at;
                }
                let changed = *existing != updated;
                self.transactions.insert(updated.id.clone(), updated);
                changed
            }
            None => {
                self.transactions.insert(incoming.id.clone(), incoming);
                true
            }
        }
    }

    fn rebuild_indices(&mut self) {
        let mut ordered: Vec<&Transaction> = self.transactions.values().collect();
        ordered.sort_by_key(|tx| (tx.chain_position(), tx.id.clone()));

        let mut per_address: HashMap<String, Vec<String>> = HashMap::new();
        let mut per_reward: HashMap<String, Vec<CertificateEntry>> = HashMap::new();

        for tx in ordered {
            for address in tx.touched_addresses() {
                per_address
                    .entry(address.to_string())
                    .or_default()
                    .push(tx.id.clone());
            }

            if tx.status != TxStatus::Successful {
                continue;
            }
            for (cert_index, certificate) in tx.certificates.iter().enumerate() {
                let entry = CertificateEntry {
                    tx_id: tx.id.clone(),
                    block_num: tx.block_num.unwrap_or_default(),
                    tx_ordinal: tx.tx_ordinal.unwrap_or_default(),
                    cert_index,
                    certificate: certificate.clone(),
                };
                per_reward
                    .entry(certificate.reward_address().to_string())
                    .or_default()
                    .push(entry);
            }
        }

        self.per_address_txs = per_address;
        self.per_reward_address_certificates = per_reward;
    }

    /// Newest in-ledger transaction touching any of `addresses`
    fn cursor_for(&self, addresses: &[String]) -> Option<HistoryCursor> {
        addresses
            .iter()
            .filter_map(|a| self.per_address_txs.get(a))
            .flatten()
            .filter_map(|id| self.transactions.get(id))
            .filter(|tx| tx.is_in_ledger())
            .max_by_key(|tx| tx.chain_position())
            .and_then(|tx| {
                Some(HistoryCursor {
                    block: tx.block_hash.clone()?,
                    tx: tx.id.clone(),
                })
            })
    }
}

/// Incrementally fetched transaction history with derived indices
pub struct TransactionManager {
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn Backend>,
    config: BackendConfig,
    state: RwLock<HistoryState>,
    listeners: Listeners<Vec<String>>,
    closed: Arc<AtomicBool>,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn KeyValueStore>, backend: Arc<dyn Backend>, config: BackendConfig) -> Self {
        Self {
            store,
            backend,
            config,
            state: RwLock::new(HistoryState::default()),
            listeners: Listeners::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Once `closed` is set, history is no longer written
    pub fn with_close_flag(mut self, closed: Arc<AtomicBool>) -> Self {
        self.closed = closed;
        self
    }

    pub async fn load(&self) -> Result<()> {
        let stored: Option<StoredHistory> = read_json(self.store.as_ref(), TXS_KEY).await?;
        if let Some(stored) = stored {
            let mut state = self.state.write();
            state.transactions = stored
                .transactions
                .into_iter()
                .map(|tx| (tx.id.clone(), tx))
                .collect();
            state.tip = stored.tip;
            state.rebuild_indices();
            log::debug!("Loaded {} stored transactions", state.transactions.len());
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("Owner closed, dropping history snapshot");
            return Ok(());
        }
        let snapshot = {
            let state = self.state.read();
            StoredHistory {
                transactions: state.transactions.values().cloned().collect(),
                tip: state.tip.clone(),
            }
        };
        write_json(self.store.as_ref(), TXS_KEY, &snapshot).await?;
        Ok(())
    }

    /// Merge a batch; returns the ids that were inserted or changed
    fn merge(&self, transactions: Vec<Transaction>) -> Vec<String> {
        let mut state = self.state.write();
        let mut changed = Vec::new();
        for tx in transactions {
            let id = tx.id.clone();
            if state.upsert(tx) && !changed.contains(&id) {
                changed.push(id);
            }
        }
        if !changed.is_empty() {
            state.rebuild_indices();
        }
        changed
    }

    /// Fetch history for every address block, page by page, merging as pages
    /// arrive. Returns whether anything changed, tip included.
    pub async fn do_sync(&self, address_blocks: &[Vec<String>]) -> Result<bool> {
        let tip = self.backend.get_best_block().await?;
        let mut changed = self.state.read().tip.as_ref() != Some(&tip);

        let Some(until_block) = tip.hash.clone() else {
            log::debug!("Backend has no best block yet, skipping history fetch");
            self.state.write().tip = Some(tip);
            if changed {
                self.persist().await?;
            }
            return Ok(changed);
        };

        let chunk_size = self.config.tx_history_max_addresses.max(1);
        for block in address_blocks {
            for chunk in block.chunks(chunk_size) {
                changed |= self.sync_chunk(chunk, &until_block).await?;
            }
        }

        self.state.write().tip = Some(tip);
        if changed {
            self.persist().await?;
        }
        Ok(changed)
    }

    async fn sync_chunk(&self, addresses: &[String], until_block: &str) -> Result<bool> {
        let mut changed = false;
        loop {
            let after = self.state.read().cursor_for(addresses);
            let request = TxHistoryRequest {
                addresses: addresses.to_vec(),
                until_block: until_block.to_string(),
                after: after.clone(),
            };
            let page = self.backend.fetch_tx_history(&request).await?;
            log::debug!(
                "History page for {} addresses: {} txs (last: {})",
                addresses.len(),
                page.transactions.len(),
                page.is_last
            );

            let updated = self.merge(page.transactions.into_iter().map(Transaction::from).collect());
            if !updated.is_empty() {
                changed = true;
                self.listeners.notify(&updated);
            }

            if page.is_last {
                break;
            }
            if self.state.read().cursor_for(addresses) == after {
                log::warn!("History cursor did not advance, stopping pagination early");
                break;
            }
        }
        Ok(changed)
    }

    /// Record a locally submitted transaction before the backend reports it
    pub async fn add_pending(&self, transaction: Transaction) -> Result<()> {
        let updated = self.merge(vec![transaction]);
        if !updated.is_empty() {
            self.persist().await?;
            self.listeners.notify(&updated);
        }
        Ok(())
    }

    pub fn transactions(&self) -> BTreeMap<String, Transaction> {
        self.state.read().transactions.clone()
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.state.read().transactions.get(id).cloned()
    }

    pub fn per_address_txs(&self) -> HashMap<String, Vec<String>> {
        self.state.read().per_address_txs.clone()
    }

    pub fn is_address_used(&self, address: &str) -> bool {
        self.state
            .read()
            .per_address_txs
            .get(address)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    pub fn per_reward_address_certificates(&self) -> HashMap<String, Vec<CertificateEntry>> {
        self.state.read().per_reward_address_certificates.clone()
    }

    pub fn certificates_for(&self, reward_address: &str) -> Vec<CertificateEntry> {
        self.state
            .read()
            .per_reward_address_certificates
            .get(reward_address)
            .cloned()
            .unwrap_or_default()
    }

    /// `tip.height - block_num` for successful transactions, 0 otherwise
    pub fn confirmation_counts(&self) -> HashMap<String, u64> {
        let state = self.state.read();
        let tip_height = state.tip.as_ref().map(|t| t.height).unwrap_or(0);
        state
            .transactions
            .values()
            .map(|tx| {
                let confirmations = match (tx.status, tx.block_num) {
                    (TxStatus::Successful, Some(block_num)) => tip_height.saturating_sub(block_num),
                    _ => 0,
                };
                (tx.id.clone(), confirmations)
            })
            .collect()
    }

    pub fn tip(&self) -> Option<BestBlock> {
        self.state.read().tip.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Vec<String>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Forget every transaction in memory; the stored copy is left alone
    pub fn reset_state(&self) {
        *self.state.write() = HistoryState::default();
    }

    pub async fn clear(&self) -> Result<()> {
        self.reset_state();
        self.store.remove(TXS_KEY).await?;
        Ok(())
    }
}
