//! Transaction history: storage, indexing and per-wallet interpretation

pub mod delegation;
pub mod manager;
pub mod process;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::types::{CertificateKind, RawTransaction, RawTxState};
use crate::tx::types::{Certificate, TokenAmount, TxInput, TxOutput, Withdrawal};

pub use delegation::{delegation_status, DelegationStatus};
pub use manager::TransactionManager;
pub use process::{process_transaction, AssuranceLevel, TransactionDirection, TransactionInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Successful,
    Failed,
    Pending,
}

impl From<RawTxState> for TxStatus {
    fn from(state: RawTxState) -> Self {
        match state {
            RawTxState::Successful => TxStatus::Successful,
            RawTxState::Failed => TxStatus::Failed,
            RawTxState::Pending => TxStatus::Pending,
        }
    }
}

/// A transaction as stored by the wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub status: TxStatus,
    #[serde(default)]
    pub fee: Option<u64>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub withdrawals: Vec<Withdrawal>,
    #[serde(default)]
    pub block_num: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub tx_ordinal: Option<u64>,
    #[serde(default)]
    pub epoch: Option<u64>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub last_updated_at: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Included in a block (successfully or not)
    pub fn is_in_ledger(&self) -> bool {
        self.status != TxStatus::Pending && self.block_hash.is_some() && self.block_num.is_some()
    }

    /// Ordering key on chain; pending transactions sort last
    pub fn chain_position(&self) -> (u64, u64) {
        (
            self.block_num.unwrap_or(u64::MAX),
            self.tx_ordinal.unwrap_or(u64::MAX),
        )
    }

    /// Every address the transaction touches, reward addresses included
    pub fn touched_addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = self
            .inputs
            .iter()
            .map(|i| i.address.as_str())
            .chain(self.outputs.iter().map(|o| o.address.as_str()))
            .chain(self.withdrawals.iter().map(|w| w.reward_address.as_str()))
            .chain(self.certificates.iter().map(|c| c.reward_address()))
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }
}

impl From<RawTransaction> for Transaction {
    fn from(raw: RawTransaction) -> Self {
        let certificates = raw
            .certificates
            .into_iter()
            .filter_map(|c| {
                let reward_address = c.reward_address?;
                match c.kind {
                    CertificateKind::StakeRegistration => {
                        Some(Certificate::StakeRegistration { reward_address })
                    }
                    CertificateKind::StakeDeregistration => {
                        Some(Certificate::StakeDeregistration { reward_address })
                    }
                    CertificateKind::StakeDelegation => Some(Certificate::StakeDelegation {
                        reward_address,
                        pool_key_hash: c.pool_key_hash?,
                    }),
                    CertificateKind::Other => None,
                }
            })
            .collect();

        Self {
            id: raw.hash,
            status: raw.tx_state.into(),
            fee: raw.fee,
            inputs: raw
                .inputs
                .into_iter()
                .map(|i| TxInput {
                    assets: i.assets.iter().map(TokenAmount::from).collect(),
                    tx_hash: i.tx_hash,
                    index: i.index,
                    address: i.address,
                    amount: i.amount,
                })
                .collect(),
            outputs: raw
                .outputs
                .into_iter()
                .map(|o| TxOutput {
                    assets: o.assets.iter().map(TokenAmount::from).collect(),
                    address: o.address,
                    amount: o.amount,
                })
                .collect(),
            certificates,
            withdrawals: raw
                .withdrawals
                .into_iter()
                .map(|w| Withdrawal {
                    reward_address: w.address,
                    amount: w.amount,
                })
                .collect(),
            block_num: raw.block_num,
            block_hash: raw.block_hash,
            tx_ordinal: raw.tx_ordinal,
            epoch: raw.epoch,
            slot: raw.slot,
            last_updated_at: raw.last_update,
            submitted_at: None,
        }
    }
}
