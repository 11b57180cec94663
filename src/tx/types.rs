use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::types::{quantity, RawAsset};
use crate::crypto::blake2b_256;
use crate::crypto::keys::full_path;
use crate::error::Result;

/// Token id of lovelace in balances and send requests
pub const PRIMARY_TOKEN_ID: &str = "";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAmount {
    pub token_id: String,
    #[serde(with = "quantity")]
    pub quantity: u64,
}

impl From<&RawAsset> for TokenAmount {
    fn from(asset: &RawAsset) -> Self {
        Self {
            token_id: asset.asset_id.clone(),
            quantity: asset.amount,
        }
    }
}

/// Per-token totals, primary token under `PRIMARY_TOKEN_ID`
pub type Balance = BTreeMap<String, u64>;

pub fn add_tokens(balance: &mut Balance, ada: u64, assets: &[TokenAmount]) {
    *balance.entry(PRIMARY_TOKEN_ID.to_string()).or_default() += ada;
    for asset in assets {
        *balance.entry(asset.token_id.clone()).or_default() += asset.quantity;
    }
}

/// What the user asked to send of one token
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendToken {
    Amount { token_id: String, quantity: u64 },
    All { token_id: String },
}

impl SendToken {
    pub fn ada(quantity: u64) -> Self {
        SendToken::Amount {
            token_id: PRIMARY_TOKEN_ID.to_string(),
            quantity,
        }
    }

    pub fn token_id(&self) -> &str {
        match self {
            SendToken::Amount { token_id, .. } | SendToken::All { token_id } => token_id,
        }
    }
}

/// Derivation of a key below the account: role and index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addressing {
    pub role: u32,
    pub index: u32,
}

impl Addressing {
    pub fn path(&self) -> Vec<u32> {
        full_path(self.role, self.index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub tx_hash: String,
    pub index: u32,
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    #[serde(default)]
    pub assets: Vec<TokenAmount>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    #[serde(default)]
    pub assets: Vec<TokenAmount>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Certificate {
    StakeRegistration { reward_address: String },
    StakeDeregistration { reward_address: String },
    StakeDelegation { reward_address: String, pool_key_hash: String },
}

impl Certificate {
    pub fn reward_address(&self) -> &str {
        match self {
            Certificate::StakeRegistration { reward_address }
            | Certificate::StakeDeregistration { reward_address }
            | Certificate::StakeDelegation { reward_address, .. } => reward_address,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub reward_address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub label: u64,
    pub data: serde_json::Value,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryData {
    pub metadata: Vec<MetadataEntry>,
}

impl AuxiliaryData {
    pub fn message(text: &str) -> Self {
        Self {
            metadata: vec![MetadataEntry {
                label: 674,
                data: serde_json::json!({ "msg": [text] }),
            }],
        }
    }

    pub fn hash(&self) -> Result<String> {
        Ok(hex::encode(blake2b_256(&serde_json::to_vec(self)?)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxBody {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    #[serde(with = "quantity")]
    pub fee: u64,
    pub ttl: u64,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub withdrawals: Vec<Withdrawal>,
    #[serde(default)]
    pub auxiliary_data_hash: Option<String>,
}

impl TxBody {
    pub fn hash(&self) -> Result<[u8; 32]> {
        Ok(blake2b_256(&serde_json::to_vec(self)?))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTx {
    pub(crate) body: TxBody,
    pub(crate) change: Vec<TxOutput>,
    pub(crate) input_addressing: Vec<Addressing>,
    pub(crate) change_addressing: Vec<Addressing>,
    pub(crate) auxiliary_data: Option<AuxiliaryData>,
    pub(crate) deposit: u64,
    pub(crate) refund: u64,
}

impl UnsignedTx {
    pub fn body(&self) -> &TxBody {
        &self.body
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.body.inputs
    }

    /// All outputs, change included
    pub fn outputs(&self) -> &[TxOutput] {
        &self.body.outputs
    }

    pub fn change(&self) -> &[TxOutput] {
        &self.change
    }

    pub fn fee(&self) -> u64 {
        self.body.fee
    }

    pub fn ttl(&self) -> u64 {
        self.body.ttl
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.body.certificates
    }

    pub fn withdrawals(&self) -> &[Withdrawal] {
        &self.body.withdrawals
    }

    pub fn auxiliary_data(&self) -> Option<&AuxiliaryData> {
        self.auxiliary_data.as_ref()
    }

    pub fn input_addressing(&self) -> &[Addressing] {
        &self.input_addressing
    }

    pub fn change_addressing(&self) -> &[Addressing] {
        &self.change_addressing
    }

    pub fn deposit(&self) -> u64 {
        self.deposit
    }

    pub fn refund(&self) -> u64 {
        self.refund
    }

    pub fn body_hash(&self) -> Result<[u8; 32]> {
        self.body.hash()
    }

    pub fn id(&self) -> Result<String> {
        Ok(hex::encode(self.body_hash()?))
    }

    /// Staking certificates and withdrawals must be witnessed by the staking key
    pub fn needs_staking_key(&self) -> bool {
        !self.body.certificates.is_empty() || !self.body.withdrawals.is_empty()
    }

    /// Outputs that leave the wallet, i.e. everything except change
    pub fn external_outputs(&self) -> Vec<&TxOutput> {
        self.body
            .outputs
            .iter()
            .filter(|o| !self.change.contains(o))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VkeyWitness {
    pub vkey: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTxEnvelope {
    pub body: TxBody,
    pub witnesses: Vec<VkeyWitness>,
    #[serde(default)]
    pub auxiliary_data: Option<AuxiliaryData>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTx {
    pub id: String,
    pub envelope: SignedTxEnvelope,
    pub encoded: Vec<u8>,
}

impl SignedTx {
    pub fn new(body: TxBody, witnesses: Vec<VkeyWitness>, auxiliary_data: Option<AuxiliaryData>) -> Result<Self> {
        let id = hex::encode(body.hash()?);
        let envelope = SignedTxEnvelope {
            body,
            witnesses,
            auxiliary_data,
        };
        let encoded = serde_json::to_vec(&envelope)?;
        Ok(Self {
            id,
            envelope,
            encoded,
        })
    }

    pub fn body(&self) -> &TxBody {
        &self.envelope.body
    }

    pub fn witnesses(&self) -> &[VkeyWitness] {
        &self.envelope.witnesses
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.encoded)
    }
}
