/// In-memory chain the mock server answers from
///
/// Blocks are produced on demand (`mine`, `fund`). Submitted transactions
/// wait in the mempool until the next block.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::types::*;

pub const KEY_DEPOSIT: u64 = 2_000_000;
pub const HISTORY_LIMIT: usize = 50;
const SLOTS_PER_BLOCK: u64 = 20;
const SLOTS_PER_EPOCH: u64 = 432_000;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    #[error("Unknown transaction: {0}")]
    UnknownTx(String),

    #[error("Malformed transaction: {0}")]
    Malformed(String),

    #[error("Input {0}#{1} is missing or already spent")]
    MissingInput(String, u32),

    #[error("Value not preserved: consumed {consumed}, produced {produced}")]
    ValueNotPreserved { consumed: u64, produced: u64 },

    #[error("Invalid staking operation: {0}")]
    Staking(String),
}

fn blake2b_256_hex(data: &[u8]) -> String {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct Block {
    hash: String,
    height: u64,
    slot: u64,
    time: String,
}

#[derive(Debug, Clone)]
struct Output {
    address: String,
    amount: u64,
    assets: Vec<AssetEntry>,
}

#[derive(Debug, Clone)]
struct Input {
    tx_hash: String,
    index: u32,
    output: Output,
}

#[derive(Debug, Clone)]
struct Certificate {
    kind: &'static str,
    reward_address: String,
    pool_key_hash: Option<String>,
}

#[derive(Debug, Clone)]
struct LedgerTx {
    hash: String,
    fee: u64,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    certificates: Vec<Certificate>,
    withdrawals: Vec<(String, u64)>,
}

#[derive(Debug, Clone)]
struct Confirmed {
    tx: LedgerTx,
    block_height: u64,
    ordinal: u64,
}

#[derive(Debug, Clone, Default)]
struct Account {
    registered: bool,
    pool: Option<String>,
    rewards: u64,
    withdrawn: u64,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    body: &'a RawValue,
    #[serde(default)]
    witnesses: Vec<SubmittedWitness>,
}

pub struct Ledger {
    blocks: Vec<Block>,
    utxos: BTreeMap<(String, u32), (Output, u64)>,
    confirmed: Vec<Confirmed>,
    mempool: Vec<LedgerTx>,
    accounts: HashMap<String, Account>,
    funding_counter: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        let mut ledger = Self {
            blocks: Vec::new(),
            utxos: BTreeMap::new(),
            confirmed: Vec::new(),
            mempool: Vec::new(),
            accounts: HashMap::new(),
            funding_counter: 0,
        };
        ledger.push_block(Vec::new());
        ledger
    }

    fn tip(&self) -> &Block {
        // The genesis block is pushed in `new`
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.tip().height
    }

    fn push_block(&mut self, txs: Vec<LedgerTx>) -> String {
        let height = self.blocks.len() as u64;
        let hash = blake2b_256_hex(format!("block-{}-{}", height, txs.len()).as_bytes());
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.blocks.push(Block {
            hash: hash.clone(),
            height,
            slot: height * SLOTS_PER_BLOCK,
            time: now.to_string(),
        });

        for (ordinal, tx) in txs.into_iter().enumerate() {
            self.apply(&tx, height);
            self.confirmed.push(Confirmed {
                tx,
                block_height: height,
                ordinal: ordinal as u64,
            });
        }
        hash
    }

    fn apply(&mut self, tx: &LedgerTx, height: u64) {
        for input in &tx.inputs {
            self.utxos.remove(&(input.tx_hash.clone(), input.index));
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            self.utxos
                .insert((tx.hash.clone(), index as u32), (output.clone(), height));
        }
        for cert in &tx.certificates {
            let account = self.accounts.entry(cert.reward_address.clone()).or_default();
            match cert.kind {
                "StakeRegistration" => account.registered = true,
                "StakeDeregistration" => {
                    account.registered = false;
                    account.pool = None;
                }
                _ => account.pool = cert.pool_key_hash.clone(),
            }
        }
        for (address, amount) in &tx.withdrawals {
            let account = self.accounts.entry(address.clone()).or_default();
            account.rewards = account.rewards.saturating_sub(*amount);
            account.withdrawn += amount;
        }
    }

    /// Produce `count` blocks; the first one carries the mempool
    pub fn mine(&mut self, count: u64) -> Vec<String> {
        let mut hashes = Vec::new();
        for i in 0..count {
            let txs = if i == 0 {
                std::mem::take(&mut self.mempool)
            } else {
                Vec::new()
            };
            hashes.push(self.push_block(txs));
        }
        hashes
    }

    /// Pay `amount` to `address` from outside the wallet, in a new block
    pub fn fund(&mut self, address: &str, amount: u64) -> String {
        self.funding_counter += 1;
        let hash = blake2b_256_hex(format!("faucet-{}-{}", self.funding_counter, address).as_bytes());
        let faucet = Input {
            tx_hash: blake2b_256_hex(format!("faucet-source-{}", self.funding_counter).as_bytes()),
            index: 0,
            output: Output {
                address: "faucet".to_string(),
                amount: amount + 200_000,
                assets: Vec::new(),
            },
        };
        let tx = LedgerTx {
            hash: hash.clone(),
            fee: 200_000,
            inputs: vec![faucet],
            outputs: vec![Output {
                address: address.to_string(),
                amount,
                assets: Vec::new(),
            }],
            certificates: Vec::new(),
            withdrawals: Vec::new(),
        };
        self.push_block(vec![tx]);
        hash
    }

    pub fn add_rewards(&mut self, reward_address: &str, amount: u64) {
        self.accounts
            .entry(reward_address.to_string())
            .or_default()
            .rewards += amount;
    }

    fn spent_in_mempool(&self) -> HashSet<(String, u32)> {
        self.mempool
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|i| (i.tx_hash.clone(), i.index)))
            .collect()
    }

    /// Validate and queue a signed transaction; returns its id
    pub fn submit(&mut self, signed_hex: &str) -> Result<String, LedgerError> {
        let bytes = hex::decode(signed_hex).map_err(|e| LedgerError::Malformed(e.to_string()))?;
        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| LedgerError::Malformed(e.to_string()))?;
        let hash = blake2b_256_hex(envelope.body.get().as_bytes());
        let body: SubmittedBody =
            serde_json::from_str(envelope.body.get()).map_err(|e| LedgerError::Malformed(e.to_string()))?;
        if envelope.witnesses.is_empty() {
            return Err(LedgerError::Malformed("No witnesses".to_string()));
        }
        if body.inputs.is_empty() {
            return Err(LedgerError::Malformed("No inputs".to_string()));
        }
        if body.ttl <= self.tip().slot {
            return Err(LedgerError::Malformed(format!("Expired at slot {}", body.ttl)));
        }

        let pending_spends = self.spent_in_mempool();
        let mut inputs = Vec::new();
        for input in &body.inputs {
            let key = (input.tx_hash.clone(), input.index);
            let Some((output, _)) = self.utxos.get(&key).filter(|_| !pending_spends.contains(&key)) else {
                return Err(LedgerError::MissingInput(input.tx_hash.clone(), input.index));
            };
            inputs.push(Input {
                tx_hash: input.tx_hash.clone(),
                index: input.index,
                output: output.clone(),
            });
        }

        let mut deposit = 0;
        let mut refund = 0;
        let mut certificates = Vec::new();
        for cert in &body.certificates {
            let (kind, reward_address, pool_key_hash) = match cert {
                SubmittedCertificate::StakeRegistration { reward_address } => {
                    deposit += KEY_DEPOSIT;
                    ("StakeRegistration", reward_address, None)
                }
                SubmittedCertificate::StakeDeregistration { reward_address } => {
                    refund += KEY_DEPOSIT;
                    ("StakeDeregistration", reward_address, None)
                }
                SubmittedCertificate::StakeDelegation {
                    reward_address,
                    pool_key_hash,
                } => ("StakeDelegation", reward_address, Some(pool_key_hash.clone())),
            };
            certificates.push(Certificate {
                kind,
                reward_address: reward_address.clone(),
                pool_key_hash,
            });
        }

        let mut withdrawn = 0;
        for w in &body.withdrawals {
            let available = self.accounts.get(&w.reward_address).map(|a| a.rewards).unwrap_or(0);
            if w.amount != available {
                return Err(LedgerError::Staking(format!(
                    "Withdrawal of {} from {} must equal the balance {}",
                    w.amount, w.reward_address, available
                )));
            }
            withdrawn += w.amount;
        }

        let consumed = inputs.iter().map(|i| i.output.amount).sum::<u64>() + withdrawn + refund;
        let produced = body.outputs.iter().map(|o| o.amount).sum::<u64>() + body.fee + deposit;
        if consumed != produced {
            return Err(LedgerError::ValueNotPreserved { consumed, produced });
        }

        let outputs = body
            .outputs
            .iter()
            .map(|o| Output {
                address: o.address.clone(),
                amount: o.amount,
                assets: o
                    .assets
                    .iter()
                    .map(|a| AssetEntry {
                        asset_id: a.token_id.clone(),
                        policy_id: String::new(),
                        name: String::new(),
                        amount: a.quantity,
                    })
                    .collect(),
            })
            .collect();

        log::info!("Accepted transaction {} into the mempool", hash);
        self.mempool.push(LedgerTx {
            hash: hash.clone(),
            fee: body.fee,
            inputs,
            outputs,
            certificates,
            withdrawals: body
                .withdrawals
                .iter()
                .map(|w| (w.reward_address.clone(), w.amount))
                .collect(),
        });
        Ok(hash)
    }

    fn touches(tx: &LedgerTx, addresses: &HashSet<&str>) -> bool {
        tx.inputs.iter().any(|i| addresses.contains(i.output.address.as_str()))
            || tx.outputs.iter().any(|o| addresses.contains(o.address.as_str()))
            || tx.certificates.iter().any(|c| addresses.contains(c.reward_address.as_str()))
            || tx.withdrawals.iter().any(|(a, _)| addresses.contains(a.as_str()))
    }

    pub fn filter_used(&self, addresses: &[String]) -> Vec<String> {
        addresses
            .iter()
            .filter(|address| {
                let set: HashSet<&str> = [address.as_str()].into_iter().collect();
                self.confirmed.iter().any(|c| Self::touches(&c.tx, &set))
            })
            .cloned()
            .collect()
    }

    pub fn utxos_for(&self, addresses: &[String]) -> Vec<UtxoResponse> {
        let set: HashSet<&str> = addresses.iter().map(String::as_str).collect();
        self.utxos
            .iter()
            .filter(|(_, (output, _))| set.contains(output.address.as_str()))
            .map(|((tx_hash, index), (output, block_num))| UtxoResponse {
                utxo_id: format!("{}{}", tx_hash, index),
                tx_hash: tx_hash.clone(),
                tx_index: *index,
                receiver: output.address.clone(),
                amount: output.amount,
                assets: output.assets.clone(),
                block_num: *block_num,
            })
            .collect()
    }

    fn block_by_hash(&self, hash: &str) -> Result<&Block, LedgerError> {
        self.blocks
            .iter()
            .find(|b| b.hash == hash)
            .ok_or_else(|| LedgerError::UnknownBlock(hash.to_string()))
    }

    /// One page of history, oldest first, strictly after the cursor
    pub fn history(&self, request: &HistoryRequest) -> Result<Vec<TxResponse>, LedgerError> {
        let until = self.block_by_hash(&request.until_block)?.height;
        let after = match &request.after {
            Some(cursor) => {
                self.block_by_hash(&cursor.block)?;
                let position = self
                    .confirmed
                    .iter()
                    .find(|c| c.tx.hash == cursor.tx)
                    .ok_or_else(|| LedgerError::UnknownTx(cursor.tx.clone()))?;
                Some((position.block_height, position.ordinal))
            }
            None => None,
        };

        let set: HashSet<&str> = request.addresses.iter().map(String::as_str).collect();
        Ok(self
            .confirmed
            .iter()
            .filter(|c| c.block_height <= until)
            .filter(|c| after.map_or(true, |pos| (c.block_height, c.ordinal) > pos))
            .filter(|c| Self::touches(&c.tx, &set))
            .take(HISTORY_LIMIT)
            .map(|c| self.to_response(c))
            .collect())
    }

    fn to_response(&self, confirmed: &Confirmed) -> TxResponse {
        let block = &self.blocks[confirmed.block_height as usize];
        let tx = &confirmed.tx;
        TxResponse {
            hash: tx.hash.clone(),
            fee: tx.fee,
            tx_type: "shelley".to_string(),
            withdrawals: tx
                .withdrawals
                .iter()
                .map(|(address, amount)| WithdrawalResponse {
                    address: address.clone(),
                    amount: *amount,
                })
                .collect(),
            certificates: tx
                .certificates
                .iter()
                .enumerate()
                .map(|(i, c)| CertificateResponse {
                    kind: c.kind.to_string(),
                    reward_address: c.reward_address.clone(),
                    pool_key_hash: c.pool_key_hash.clone(),
                    cert_index: i as u32,
                })
                .collect(),
            tx_ordinal: confirmed.ordinal,
            tx_state: "Successful".to_string(),
            last_update: block.time.clone(),
            block_num: block.height,
            block_hash: block.hash.clone(),
            time: block.time.clone(),
            epoch: block.slot / SLOTS_PER_EPOCH,
            slot: block.slot,
            inputs: tx
                .inputs
                .iter()
                .map(|i| TxInputResponse {
                    address: i.output.address.clone(),
                    amount: i.output.amount,
                    id: format!("{}{}", i.tx_hash, i.index),
                    index: i.index,
                    tx_hash: i.tx_hash.clone(),
                    assets: i.output.assets.clone(),
                })
                .collect(),
            outputs: tx
                .outputs
                .iter()
                .map(|o| TxOutputResponse {
                    address: o.address.clone(),
                    amount: o.amount,
                    assets: o.assets.clone(),
                })
                .collect(),
        }
    }

    pub fn best_block(&self) -> BestBlockResponse {
        let tip = self.tip();
        BestBlockResponse {
            epoch: tip.slot / SLOTS_PER_EPOCH,
            slot: tip.slot,
            hash: tip.hash.clone(),
            height: tip.height,
        }
    }

    pub fn account_state(&self, addresses: &[String]) -> HashMap<String, Option<AccountStateResponse>> {
        addresses
            .iter()
            .map(|address| {
                let state = self.accounts.get(address).map(|a| AccountStateResponse {
                    remaining_amount: a.rewards,
                    rewards: a.rewards + a.withdrawn,
                    withdrawals: a.withdrawn,
                    pool_operator: a.pool.clone(),
                });
                (address.clone(), state)
            })
            .collect()
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }
}
