/// Wire types of the wallet backend API
///
/// Quantities are written as decimal strings, matching what the wallet
/// client expects from a production backend.

use serde::{Deserialize, Serialize};

pub mod quantity {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    pub asset_id: String,
    #[serde(default)]
    pub policy_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(with = "quantity")]
    pub amount: u64,
}

/// Element of POST /txs/utxoForAddresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoResponse {
    pub utxo_id: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub receiver: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    pub assets: Vec<AssetEntry>,
    pub block_num: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInputResponse {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    pub id: String,
    pub index: u32,
    pub tx_hash: String,
    pub assets: Vec<AssetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutputResponse {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    pub assets: Vec<AssetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResponse {
    pub kind: String,
    pub reward_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_key_hash: Option<String>,
    pub cert_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
}

/// Element of POST /v2/txs/history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResponse {
    pub hash: String,
    #[serde(with = "quantity")]
    pub fee: u64,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub withdrawals: Vec<WithdrawalResponse>,
    pub certificates: Vec<CertificateResponse>,
    pub tx_ordinal: u64,
    pub tx_state: String,
    pub last_update: String,
    pub block_num: u64,
    pub block_hash: String,
    pub time: String,
    pub epoch: u64,
    pub slot: u64,
    pub inputs: Vec<TxInputResponse>,
    pub outputs: Vec<TxOutputResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestBlockResponse {
    pub epoch: u64,
    pub slot: u64,
    pub hash: String,
    pub height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_server_ok: bool,
    pub is_maintenance: bool,
    pub server_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStateResponse {
    #[serde(with = "quantity")]
    pub remaining_amount: u64,
    #[serde(with = "quantity")]
    pub rewards: u64,
    #[serde(with = "quantity")]
    pub withdrawals: u64,
    pub pool_operator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub id: String,
}

// Requests

#[derive(Debug, Clone, Deserialize)]
pub struct AddressesRequest {
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryCursor {
    pub block: String,
    pub tx: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub addresses: Vec<String>,
    pub until_block: String,
    #[serde(default)]
    pub after: Option<HistoryCursor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTxRequest {
    pub signed_tx: String,
}

// Submitted transaction envelope, as encoded by the wallet

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedInput {
    pub tx_hash: String,
    pub index: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedOutput {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    #[serde(default)]
    pub assets: Vec<SubmittedAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAsset {
    pub token_id: String,
    #[serde(with = "quantity")]
    pub quantity: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum SubmittedCertificate {
    StakeRegistration { reward_address: String },
    StakeDeregistration { reward_address: String },
    StakeDelegation { reward_address: String, pool_key_hash: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedWithdrawal {
    pub reward_address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedBody {
    pub inputs: Vec<SubmittedInput>,
    pub outputs: Vec<SubmittedOutput>,
    #[serde(with = "quantity")]
    pub fee: u64,
    pub ttl: u64,
    #[serde(default)]
    pub certificates: Vec<SubmittedCertificate>,
    #[serde(default)]
    pub withdrawals: Vec<SubmittedWithdrawal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedWitness {
    pub vkey: String,
    pub signature: String,
}

// Test helper requests

#[derive(Debug, Clone, Deserialize)]
pub struct FundRequest {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundResponse {
    pub tx_hash: String,
    pub block_height: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MineBlocksRequest {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MineBlocksResponse {
    pub block_hashes: Vec<String>,
    pub new_height: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRequest {
    pub reward_address: String,
    pub amount: u64,
}
