//! Interpretation of a stored transaction relative to one wallet

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Transaction, TxStatus};
use crate::tx::types::{Certificate, TxInput, TxOutput, Withdrawal, PRIMARY_TOKEN_ID};

pub const ASSURANCE_LOW: u64 = 3;
pub const ASSURANCE_MEDIUM: u64 = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionDirection {
    Sent,
    Received,
    #[serde(rename = "Self")]
    SelfTx,
    Multi,
}

impl TransactionDirection {
    fn is_outgoing(&self) -> bool {
        matches!(
            self,
            TransactionDirection::Sent | TransactionDirection::SelfTx | TransactionDirection::Multi
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssuranceLevel {
    Pending,
    Failed,
    Low,
    Medium,
    High,
}

impl AssuranceLevel {
    pub fn from_status(status: TxStatus, confirmations: u64) -> Self {
        match status {
            TxStatus::Pending => AssuranceLevel::Pending,
            TxStatus::Failed => AssuranceLevel::Failed,
            TxStatus::Successful if confirmations < ASSURANCE_LOW => AssuranceLevel::Low,
            TxStatus::Successful if confirmations < ASSURANCE_MEDIUM => AssuranceLevel::Medium,
            TxStatus::Successful => AssuranceLevel::High,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub id: String,
    pub direction: TransactionDirection,
    pub status: TxStatus,
    pub assurance: AssuranceLevel,
    pub confirmations: u64,
    /// Net change per token, fee excluded for outgoing directions
    pub amount: BTreeMap<String, i128>,
    pub fee: Option<u64>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub certificates: Vec<Certificate>,
    pub withdrawals: Vec<Withdrawal>,
    pub block_num: Option<u64>,
    pub last_updated_at: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub memo: Option<String>,
}

fn classify(tx: &Transaction, own: &HashSet<String>) -> TransactionDirection {
    let own_inputs = tx.inputs.iter().filter(|i| own.contains(&i.address)).count();
    let own_outputs = tx.outputs.iter().filter(|o| own.contains(&o.address)).count();

    if own_inputs > 0 && own_inputs < tx.inputs.len() {
        TransactionDirection::Multi
    } else if own_inputs > 0 && own_outputs == tx.outputs.len() {
        TransactionDirection::SelfTx
    } else if own_inputs > 0 {
        TransactionDirection::Sent
    } else {
        TransactionDirection::Received
    }
}

/// `own` holds every wallet address, reward address included
pub fn process_transaction(
    tx: &Transaction,
    own: &HashSet<String>,
    confirmations: u64,
    memo: Option<String>,
) -> TransactionInfo {
    let direction = classify(tx, own);

    let mut amount: BTreeMap<String, i128> = BTreeMap::new();
    let mut credit = |token_id: &str, delta: i128| {
        *amount.entry(token_id.to_string()).or_default() += delta;
    };
    for output in tx.outputs.iter().filter(|o| own.contains(&o.address)) {
        credit(PRIMARY_TOKEN_ID, output.amount as i128);
        for asset in &output.assets {
            credit(&asset.token_id, asset.quantity as i128);
        }
    }
    for input in tx.inputs.iter().filter(|i| own.contains(&i.address)) {
        credit(PRIMARY_TOKEN_ID, -(input.amount as i128));
        for asset in &input.assets {
            credit(&asset.token_id, -(asset.quantity as i128));
        }
    }
    for withdrawal in tx.withdrawals.iter().filter(|w| own.contains(&w.reward_address)) {
        credit(PRIMARY_TOKEN_ID, -(withdrawal.amount as i128));
    }

    let fee = if direction.is_outgoing() { tx.fee } else { None };
    if let Some(fee) = fee {
        credit(PRIMARY_TOKEN_ID, fee as i128);
    }
    amount.retain(|token_id, v| *v != 0 || token_id == PRIMARY_TOKEN_ID);

    let confirmations = if tx.status == TxStatus::Successful {
        confirmations
    } else {
        0
    };

    TransactionInfo {
        id: tx.id.clone(),
        direction,
        status: tx.status,
        assurance: AssuranceLevel::from_status(tx.status, confirmations),
        confirmations,
        amount,
        fee,
        inputs: tx.inputs.clone(),
        outputs: tx.outputs.clone(),
        certificates: tx.certificates.clone(),
        withdrawals: tx.withdrawals.clone(),
        block_num: tx.block_num,
        last_updated_at: tx.last_updated_at.clone(),
        submitted_at: tx.submitted_at,
        memo,
    }
}
