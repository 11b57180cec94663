//! Hardware wallet delegation
//!
//! The device never sees the root key: the wallet hands it a request with
//! the derivation path of every key that must witness the body, and turns
//! the returned signatures back into vkey witnesses using public keys derived
//! from the account public key it already holds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::signer::required_signers;
use super::types::{Certificate, SignedTx, TxBody, UnsignedTx, VkeyWitness};
use crate::config::NetworkId;
use crate::crypto::keys::{full_path, AccountPublicKey};
use crate::error::{Result, WalletError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Usb,
    Ble,
}

impl Transport {
    pub fn from_use_usb(use_usb: bool) -> Self {
        if use_usb {
            Transport::Usb
        } else {
            Transport::Ble
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HwFeatures {
    pub vendor: String,
    pub model: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub serial_hex: Option<String>,
}

/// Pairing record stored with a hardware wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HwDeviceInfo {
    pub account_public_key_hex: String,
    pub hw_features: HwFeatures,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerInput {
    pub tx_hash: String,
    pub index: u32,
    pub path: Vec<u32>,
}

/// Change outputs are described by path so the device can verify ownership
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum LedgerOutput {
    External { address: String, amount: u64, token_count: usize },
    Change { path: Vec<u32>, amount: u64, token_count: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSignRequest {
    pub network_id: u8,
    pub body_hash_hex: String,
    pub inputs: Vec<LedgerInput>,
    pub outputs: Vec<LedgerOutput>,
    pub fee: u64,
    pub ttl: u64,
    pub certificates: Vec<Certificate>,
    pub withdrawal_total: u64,
    /// Present when certificates or withdrawals need the staking key
    pub staking_path: Option<Vec<u32>>,
    /// Every path the device is expected to sign with
    pub signing_paths: Vec<Vec<u32>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerWitness {
    pub path: Vec<u32>,
    pub signature_hex: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSignResponse {
    pub body_hash_hex: String,
    pub witnesses: Vec<LedgerWitness>,
}

#[async_trait]
pub trait HardwareSigner: Send + Sync {
    async fn sign(
        &self,
        request: &LedgerSignRequest,
        device: &HwDeviceInfo,
        transport: Transport,
    ) -> Result<LedgerSignResponse>;
}

pub fn build_sign_request(unsigned: &UnsignedTx, network: NetworkId) -> Result<LedgerSignRequest> {
    if unsigned.inputs().len() != unsigned.input_addressing().len() {
        return Err(WalletError::InvalidState(
            "Every input needs a derivation path for hardware signing".to_string(),
        ));
    }

    let inputs = unsigned
        .inputs()
        .iter()
        .zip(unsigned.input_addressing())
        .map(|(input, addressing)| LedgerInput {
            tx_hash: input.tx_hash.clone(),
            index: input.index,
            path: addressing.path(),
        })
        .collect();

    let outputs = unsigned
        .outputs()
        .iter()
        .map(|output| {
            let change_at = unsigned.change().iter().position(|c| c == output);
            match change_at.and_then(|i| unsigned.change_addressing().get(i)) {
                Some(addressing) => LedgerOutput::Change {
                    path: addressing.path(),
                    amount: output.amount,
                    token_count: output.assets.len(),
                },
                None => LedgerOutput::External {
                    address: output.address.clone(),
                    amount: output.amount,
                    token_count: output.assets.len(),
                },
            }
        })
        .collect();

    let signers = required_signers(unsigned);
    let staking_path = unsigned
        .needs_staking_key()
        .then(|| signers.last().map(|(role, index)| full_path(*role, *index)))
        .flatten();

    Ok(LedgerSignRequest {
        network_id: network.network_id(),
        body_hash_hex: hex::encode(unsigned.body_hash()?),
        inputs,
        outputs,
        fee: unsigned.fee(),
        ttl: unsigned.ttl(),
        certificates: unsigned.certificates().to_vec(),
        withdrawal_total: unsigned.withdrawals().iter().map(|w| w.amount).sum(),
        staking_path,
        signing_paths: signers.iter().map(|(r, i)| full_path(*r, *i)).collect(),
    })
}

/// Pair device signatures with account-derived public keys
pub fn assemble_signed_tx(
    unsigned: &UnsignedTx,
    response: &LedgerSignResponse,
    account: &AccountPublicKey,
) -> Result<SignedTx> {
    let expected_hash = hex::encode(unsigned.body_hash()?);
    if response.body_hash_hex != expected_hash {
        return Err(WalletError::HardwareWallet(format!(
            "Device signed body {} but {} was requested",
            response.body_hash_hex, expected_hash
        )));
    }

    let account_prefix = full_path(0, 0);
    let mut witnesses = Vec::with_capacity(response.witnesses.len());
    for witness in &response.witnesses {
        let (role, index) = match witness.path.as_slice() {
            [purpose, coin, acct, role, index] if [*purpose, *coin, *acct] == account_prefix[..3] => (*role, *index),
            _ => {
                return Err(WalletError::HardwareWallet(format!(
                    "Unexpected witness path {:?}",
                    witness.path
                )))
            }
        };
        let vkey = account.derive(role, index)?;
        witnesses.push(VkeyWitness {
            vkey: hex::encode(vkey.serialize()),
            signature: witness.signature_hex.clone(),
        });
    }

    let required = required_signers(unsigned).len();
    if witnesses.len() < required {
        return Err(WalletError::HardwareWallet(format!(
            "Device returned {} witnesses, {} required",
            witnesses.len(),
            required
        )));
    }

    let body: TxBody = unsigned.body().clone();
    SignedTx::new(body, witnesses, unsigned.auxiliary_data().cloned())
}
