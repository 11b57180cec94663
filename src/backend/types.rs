//! Wire types of the backend HTTP API
//!
//! Lovelace and asset quantities travel as decimal strings; `quantity`
//! accepts either strings or plain numbers and always writes strings.

use std::collections::HashMap;

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
            Raw::Str(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }

    pub mod option {
        use super::Raw;
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
            match Option::<Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(Raw::Num(n)) => Ok(Some(n)),
                Some(Raw::Str(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestBlock {
    #[serde(default)]
    pub epoch: Option<u64>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub is_server_ok: bool,
    #[serde(default)]
    pub is_maintenance: bool,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub server_time: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAsset {
    pub asset_id: String,
    #[serde(default)]
    pub policy_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(with = "quantity")]
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUtxo {
    pub utxo_id: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub receiver: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    #[serde(default)]
    pub assets: Vec<RawAsset>,
    #[serde(default)]
    pub block_num: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawTxState {
    Successful,
    Failed,
    Pending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateKind {
    StakeRegistration,
    StakeDeregistration,
    StakeDelegation,
    /// Pool-side certificates are carried but ignored for delegation status
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCertificate {
    pub kind: CertificateKind,
    #[serde(default)]
    pub reward_address: Option<String>,
    #[serde(default)]
    pub pool_key_hash: Option<String>,
    #[serde(default)]
    pub cert_index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawWithdrawal {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTxInput {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    #[serde(default)]
    pub id: String,
    pub index: u32,
    pub tx_hash: String,
    #[serde(default)]
    pub assets: Vec<RawAsset>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTxOutput {
    pub address: String,
    #[serde(with = "quantity")]
    pub amount: u64,
    #[serde(default)]
    pub assets: Vec<RawAsset>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    #[serde(default, with = "quantity::option")]
    pub fee: Option<u64>,
    #[serde(rename = "type", default)]
    pub tx_type: Option<String>,
    #[serde(default)]
    pub withdrawals: Vec<RawWithdrawal>,
    #[serde(default)]
    pub certificates: Vec<RawCertificate>,
    #[serde(default)]
    pub tx_ordinal: Option<u64>,
    pub tx_state: RawTxState,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub block_num: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub epoch: Option<u64>,
    #[serde(default)]
    pub slot: Option<u64>,
    #[serde(default)]
    pub inputs: Vec<RawTxInput>,
    #[serde(default)]
    pub outputs: Vec<RawTxOutput>,
}

/// Position of the newest transaction already known to the wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCursor {
    pub block: String,
    pub tx: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHistoryRequest {
    pub addresses: Vec<String>,
    pub until_block: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub after: Option<HistoryCursor>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxHistoryPage {
    pub transactions: Vec<RawTransaction>,
    pub is_last: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    #[serde(with = "quantity")]
    pub remaining_amount: u64,
    #[serde(default, with = "quantity")]
    pub rewards: u64,
    #[serde(default, with = "quantity")]
    pub withdrawals: u64,
    #[serde(default)]
    pub pool_operator: Option<String>,
}

/// Keyed by reward address; `None` for accounts the ledger has never seen
pub type AccountStateResponse = HashMap<String, Option<AccountState>>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTxRequest {
    pub signed_tx: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddressesRequest {
    pub addresses: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history_entry() {
        let json = r#"{
            "hash": "aa11",
            "fee": "171000",
            "type": "shelley",
            "withdrawals": [],
            "certificates": [
                {"kind": "StakeDelegation", "rewardAddress": "e0ff", "poolKeyHash": "pool1"},
                {"kind": "PoolRegistration", "poolParams": {}}
            ],
            "tx_ordinal": 3,
            "tx_state": "Successful",
            "last_update": "2024-01-01T00:00:00.000Z",
            "block_num": 120,
            "block_hash": "bb22",
            "time": "2024-01-01T00:00:00.000Z",
            "epoch": 10,
            "slot": 5,
            "inputs": [{"address": "a1", "amount": "5000000", "id": "x0", "index": 0, "txHash": "x", "assets": []}],
            "outputs": [{"address": "a2", "amount": 4829000, "assets": [
                {"assetId": "p.n", "policyId": "p", "name": "n", "amount": "7"}
            ]}]
        }"#;

        let tx: RawTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.fee, Some(171_000));
        assert_eq!(tx.certificates[1].kind, CertificateKind::Other);
        assert_eq!(tx.inputs[0].amount, 5_000_000);
        assert_eq!(tx.outputs[0].amount, 4_829_000);
        assert_eq!(tx.outputs[0].assets[0].amount, 7);
        assert_eq!(tx.tx_state, RawTxState::Successful);
    }

    #[test]
    fn test_history_request_shape() {
        let request = TxHistoryRequest {
            addresses: vec!["a".into()],
            until_block: "tip".into(),
            after: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["untilBlock"], "tip");
        assert!(value.get("after").is_none());
    }

    #[test]
    fn test_account_state_null_entries() {
        let response: AccountStateResponse = serde_json::from_str(
            r#"{"e0aa": {"remainingAmount": "10", "rewards": "12", "withdrawals": "2", "poolOperator": null}, "e0bb": null}"#,
        )
        .unwrap();
        assert_eq!(response["e0aa"].as_ref().unwrap().remaining_amount, 10);
        assert!(response["e0bb"].is_none());
    }
}
