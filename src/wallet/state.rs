//! Persisted wallet records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::AddressChainJson;
use crate::config::NetworkId;
use crate::error::{Result, WalletError};
use crate::tx::ledger::HwDeviceInfo;

pub const WALLET_STATE_VERSION: u32 = 1;

/// What a wallet instance can do with its keys
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletMode {
    /// Root key held locally, encrypted with the spending password
    Software,
    /// Keys live on a paired device
    Hardware(HwDeviceInfo),
    /// Account public key only
    ReadOnly,
}

impl WalletMode {
    pub fn kind(&self) -> WalletKind {
        match self {
            WalletMode::Software => WalletKind::Software,
            WalletMode::Hardware(_) => WalletKind::Hardware,
            WalletMode::ReadOnly => WalletKind::ReadOnly,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            WalletMode::Software => Capabilities {
                sign: true,
                sign_with_ledger: false,
                stake: true,
            },
            WalletMode::Hardware(_) => Capabilities {
                sign: false,
                sign_with_ledger: true,
                stake: true,
            },
            WalletMode::ReadOnly => Capabilities {
                sign: false,
                sign_with_ledger: false,
                stake: false,
            },
        }
    }

    pub fn device_info(&self) -> Option<&HwDeviceInfo> {
        match self {
            WalletMode::Hardware(info) => Some(info),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    Software,
    Hardware,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub sign: bool,
    pub sign_with_ledger: bool,
    pub stake: bool,
}

/// Snapshot written after every completed sync
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub version: u32,
    pub network: NetworkId,
    pub public_key_hex: String,
    pub last_generated_address_index: usize,
    pub internal_chain: AddressChainJson,
    pub external_chain: AddressChainJson,
    #[serde(rename = "isHW")]
    pub is_hw: bool,
    #[serde(default)]
    pub hw_device_info: Option<HwDeviceInfo>,
    #[serde(default)]
    pub is_read_only: bool,
}

impl WalletSnapshot {
    /// Integrity check on restore: flags and device info must agree
    pub fn mode(&self) -> Result<WalletMode> {
        if self.version > WALLET_STATE_VERSION {
            return Err(WalletError::InvalidState(format!(
                "Wallet data version {} is newer than supported {}",
                self.version, WALLET_STATE_VERSION
            )));
        }
        match (self.is_hw, self.is_read_only, &self.hw_device_info) {
            (true, true, _) => Err(WalletError::InvalidState(
                "Wallet is marked both hardware and read-only".to_string(),
            )),
            (true, false, Some(info)) => {
                if info.account_public_key_hex != self.public_key_hex {
                    return Err(WalletError::InvalidState(
                        "Device info belongs to another account".to_string(),
                    ));
                }
                Ok(WalletMode::Hardware(info.clone()))
            }
            (true, false, None) => Err(WalletError::InvalidState(
                "Hardware wallet has no device info".to_string(),
            )),
            (false, true, _) => Ok(WalletMode::ReadOnly),
            (false, false, _) => Ok(WalletMode::Software),
        }
    }
}

/// Listing record, stored outside the wallet's own folder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMeta {
    pub id: String,
    pub name: String,
    pub kind: WalletKind,
    pub network: NetworkId,
    pub created_at: DateTime<Utc>,
}
