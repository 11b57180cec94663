//! UTXO cache reconciled against the backend by full-replace-by-diff

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::types::{quantity, RawUtxo};
use crate::backend::Backend;
use crate::config::BackendConfig;
use crate::error::Result;
use crate::storage::{read_json, write_json, KeyValueStore};
use crate::tx::types::{add_tokens, Balance, TokenAmount};

const UTXOS_KEY: &str = "utxos";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub utxo_id: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub receiver: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    #[serde(default)]
    pub assets: Vec<TokenAmount>,
    #[serde(default)]
    pub block_num: u64,
}

impl Utxo {
    pub fn key(&self) -> (String, u32) {
        (self.tx_hash.clone(), self.tx_index)
    }

    pub fn quantity_of(&self, token_id: &str) -> u64 {
        self.assets
            .iter()
            .filter(|a| a.token_id == token_id)
            .map(|a| a.quantity)
            .sum()
    }
}

impl From<RawUtxo> for Utxo {
    fn from(raw: RawUtxo) -> Self {
        let assets = raw.assets.iter().map(TokenAmount::from).collect();
        Self {
            utxo_id: raw.utxo_id,
            tx_hash: raw.tx_hash,
            tx_index: raw.tx_index,
            receiver: raw.receiver,
            amount: raw.amount,
            assets,
            block_num: raw.block_num,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtxoDiff {
    pub added: Vec<Utxo>,
    pub removed: Vec<Utxo>,
}

impl UtxoDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

type UtxoSet = BTreeMap<(String, u32), Utxo>;

pub struct UtxoManager {
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn Backend>,
    config: BackendConfig,
    utxos: RwLock<UtxoSet>,
    closed: Arc<AtomicBool>,
}

impl UtxoManager {
    pub fn new(store: Arc<dyn KeyValueStore>, backend: Arc<dyn Backend>, config: BackendConfig) -> Self {
        Self {
            store,
            backend,
            config,
            utxos: RwLock::new(UtxoSet::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Once `closed` is set, snapshots are no longer written
    pub fn with_close_flag(mut self, closed: Arc<AtomicBool>) -> Self {
        self.closed = closed;
        self
    }

    /// Restore the persisted snapshot, if any
    pub async fn load(&self) -> Result<()> {
        let stored: Option<Vec<Utxo>> = read_json(self.store.as_ref(), UTXOS_KEY).await?;
        if let Some(stored) = stored {
            let set: UtxoSet = stored.into_iter().map(|u| (u.key(), u)).collect();
            log::debug!("Loaded {} cached utxos", set.len());
            *self.utxos.write() = set;
        }
        Ok(())
    }

    /// Fetch the authoritative set for `addresses` and reconcile the cache.
    /// The cache is only touched once every chunk has been fetched.
    pub async fn sync(&self, addresses: &[String]) -> Result<UtxoDiff> {
        let requests = addresses
            .chunks(self.config.fetch_utxos_max_addresses.max(1))
            .map(|chunk| self.backend.fetch_utxos_for_addresses(chunk));
        let responses = try_join_all(requests).await?;

        let remote: UtxoSet = responses
            .into_iter()
            .flatten()
            .map(Utxo::from)
            .map(|u| (u.key(), u))
            .collect();

        let diff = {
            let mut cached = self.utxos.write();
            let diff = diff_sets(&cached, &remote);
            if !diff.is_empty() {
                *cached = remote;
            }
            diff
        };

        if !diff.is_empty() {
            log::debug!(
                "UTXO set changed: +{} -{}",
                diff.added.len(),
                diff.removed.len()
            );
            self.persist().await?;
        }
        Ok(diff)
    }

    async fn persist(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!("Owner closed, dropping UTXO snapshot");
            return Ok(());
        }
        let snapshot = self.get_cached_utxos();
        write_json(self.store.as_ref(), UTXOS_KEY, &snapshot).await?;
        Ok(())
    }

    /// Current cache, ordered by outpoint; never touches the network
    pub fn get_cached_utxos(&self) -> Vec<Utxo> {
        self.utxos.read().values().cloned().collect()
    }

    pub fn balance(&self) -> Balance {
        let mut balance = Balance::new();
        for utxo in self.utxos.read().values() {
            add_tokens(&mut balance, utxo.amount, &utxo.assets);
        }
        balance
    }

    pub async fn clear(&self) -> Result<()> {
        self.utxos.write().clear();
        self.store.remove(UTXOS_KEY).await?;
        Ok(())
    }
}

fn diff_sets(cached: &UtxoSet, remote: &UtxoSet) -> UtxoDiff {
    let mut diff = UtxoDiff::default();
    for (key, utxo) in remote {
        match cached.get(key) {
            Some(existing) if existing == utxo => {}
            Some(existing) => {
                diff.removed.push(existing.clone());
                diff.added.push(utxo.clone());
            }
            None => diff.added.push(utxo.clone()),
        }
    }
    for (key, utxo) in cached {
        if !remote.contains_key(key) {
            diff.removed.push(utxo.clone());
        }
    }
    diff
}
