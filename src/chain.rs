//! HD address chain with gap-limit discovery
//!
//! A chain is an append-only list of addresses for one role (internal or
//! external) of one account. Addresses are generated in blocks and, once
//! assigned an index, are never regenerated, reordered or dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto::{AddressGenerator, ChainType};
use crate::error::{Result, WalletError};
use crate::events::{Listeners, SubscriptionId};

/// Answers which of a set of addresses have appeared on chain
#[async_trait]
pub trait UsedAddressOracle: Send + Sync {
    async fn filter_used(&self, addresses: &[String]) -> Result<Vec<String>>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressChainJson {
    pub account_pub_key_hex: String,
    pub chain_type: ChainType,
    pub addresses: Vec<String>,
    pub block_size: usize,
    pub gap_limit: usize,
}

#[derive(Default)]
struct ChainState {
    addresses: Vec<String>,
    index: HashMap<String, usize>,
}

impl ChainState {
    fn append(&mut self, new_addresses: &[String]) {
        for address in new_addresses {
            self.index.insert(address.clone(), self.addresses.len());
            self.addresses.push(address.clone());
        }
    }
}

pub struct AddressChain {
    generator: Arc<dyn AddressGenerator>,
    block_size: usize,
    gap_limit: usize,
    state: RwLock<ChainState>,
    listeners: Listeners<Vec<String>>,
}

impl AddressChain {
    pub fn new(generator: Arc<dyn AddressGenerator>, block_size: usize, gap_limit: usize) -> Self {
        Self {
            generator,
            block_size: block_size.max(1),
            gap_limit,
            state: RwLock::new(ChainState::default()),
            listeners: Listeners::new(),
        }
    }

    pub fn from_json(json: AddressChainJson, generator: Arc<dyn AddressGenerator>) -> Result<Self> {
        if json.account_pub_key_hex != generator.account_pub_key_hex() {
            return Err(WalletError::InvalidState(
                "Stored address chain belongs to another account".to_string(),
            ));
        }
        if json.chain_type != generator.chain_type() {
            return Err(WalletError::InvalidState(format!(
                "Stored address chain is {:?}, expected {:?}",
                json.chain_type,
                generator.chain_type()
            )));
        }
        if json.block_size == 0 {
            return Err(WalletError::InvalidState("Address chain block size is zero".to_string()));
        }

        let chain = Self::new(generator, json.block_size, json.gap_limit);
        {
            let mut state = chain.state.write();
            state.append(&json.addresses);
            if state.index.len() != state.addresses.len() {
                return Err(WalletError::InvalidState(
                    "Stored address chain contains duplicates".to_string(),
                ));
            }
        }
        Ok(chain)
    }

    pub fn to_json(&self) -> AddressChainJson {
        AddressChainJson {
            account_pub_key_hex: self.generator.account_pub_key_hex().to_string(),
            chain_type: self.generator.chain_type(),
            addresses: self.addresses(),
            block_size: self.block_size,
            gap_limit: self.gap_limit,
        }
    }

    pub fn chain_type(&self) -> ChainType {
        self.generator.chain_type()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn gap_limit(&self) -> usize {
        self.gap_limit
    }

    /// Generates the first block if the chain is empty
    pub fn initialize(&self) -> Result<()> {
        if self.size() == 0 {
            self.generate_block()?;
        }
        Ok(())
    }

    fn generate_block(&self) -> Result<Vec<String>> {
        let start = self.size();
        let range = index_u32(start)?..index_u32(start + self.block_size)?;
        let new_addresses = self.generator.generate(range)?;
        if new_addresses.is_empty() {
            return Ok(new_addresses);
        }

        {
            let mut state = self.state.write();
            if let Some(dup) = new_addresses.iter().find(|a| state.index.contains_key(*a)) {
                return Err(WalletError::InvalidState(format!(
                    "Address generator produced a collision: {}",
                    dup
                )));
            }
            state.append(&new_addresses);
        }

        log::debug!(
            "{:?} chain extended to {} addresses",
            self.chain_type(),
            self.size()
        );
        self.listeners.notify(&new_addresses);
        Ok(new_addresses)
    }

    /// Extends the chain until at least `gap_limit` unused addresses follow the
    /// highest used one. Returns how many addresses were appended.
    pub async fn sync(&self, oracle: &dyn UsedAddressOracle) -> Result<usize> {
        self.initialize()?;

        let mut appended = 0;
        let mut highest_used: Option<usize> = None;
        // Used addresses before the trailing window cannot shorten the gap
        let mut window: Vec<String> = {
            let state = self.state.read();
            let from = state.addresses.len().saturating_sub(self.gap_limit.max(1));
            state.addresses[from..].to_vec()
        };

        loop {
            let used = oracle.filter_used(&window).await?;
            for address in &used {
                if let Some(index) = self.index_of(address) {
                    highest_used = Some(highest_used.map_or(index, |h| h.max(index)));
                }
            }

            let size = self.size();
            let unused_tail = match highest_used {
                Some(index) => size - 1 - index,
                None => size,
            };
            if unused_tail >= self.gap_limit {
                break;
            }

            let new_addresses = self.generate_block()?;
            if new_addresses.is_empty() {
                break;
            }
            appended += new_addresses.len();
            window = new_addresses;
        }

        Ok(appended)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.state.read().addresses.clone()
    }

    pub fn address_at(&self, index: usize) -> Option<String> {
        self.state.read().addresses.get(index).cloned()
    }

    pub fn size(&self) -> usize {
        self.state.read().addresses.len()
    }

    fn index_of(&self, address: &str) -> Option<usize> {
        self.state.read().index.get(address).copied()
    }

    pub fn get_index_of_address(&self, address: &str) -> Result<usize> {
        self.index_of(address)
            .ok_or_else(|| WalletError::AddressNotFound(address.to_string()))
    }

    pub fn is_my_address(&self, address: &str) -> bool {
        self.state.read().index.contains_key(address)
    }

    /// Addresses grouped by generation block
    pub fn get_blocks(&self) -> Vec<Vec<String>> {
        self.state
            .read()
            .addresses
            .chunks(self.block_size)
            .map(|c| c.to_vec())
            .collect()
    }

    pub fn subscribe_new_addresses<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Vec<String>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }
}

fn index_u32(index: usize) -> Result<u32> {
    u32::try_from(index)
        .ok()
        .filter(|i| *i < 0x8000_0000)
        .ok_or_else(|| WalletError::InvalidState(format!("Address index {} out of range", index)))
}
