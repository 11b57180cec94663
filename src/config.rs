/// Wallet configuration
///
/// Selects the Cardano network, the backend endpoint and the protocol
/// constants used for discovery, fee computation and validity intervals.
/// Defaults to preprod so a misconfigured build never touches mainnet funds.
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

pub const DISCOVERY_BLOCK_SIZE: usize = 50;
pub const DISCOVERY_GAP_SIZE: usize = 20;
pub const MAX_GENERATED_UNUSED: usize = 20;
pub const HISTORY_REFRESH_SECS: u64 = 25;
pub const BACKEND_MAX_ADDRESSES: usize = 50;
pub const TX_HISTORY_RESPONSE_LIMIT: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Mainnet,
    Preprod,
}

impl NetworkId {
    /// Network nibble used in address headers
    pub fn network_id(&self) -> u8 {
        match self {
            NetworkId::Mainnet => 1,
            NetworkId::Preprod => 0,
        }
    }

    pub fn address_hrp(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "addr",
            NetworkId::Preprod => "addr_test",
        }
    }

    pub fn reward_hrp(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "stake",
            NetworkId::Preprod => "stake_test",
        }
    }

    /// Network tag carried by BIP-32 extended keys
    pub fn key_network(&self) -> bitcoin::NetworkKind {
        match self {
            NetworkId::Mainnet => bitcoin::NetworkKind::Main,
            NetworkId::Preprod => bitcoin::NetworkKind::Test,
        }
    }

    pub fn default_backend_url(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "https://api.yoroiwallet.com/api",
            NetworkId::Preprod => "https://preprod-backend.yoroiwallet.com/api",
        }
    }

    pub fn network_time(&self) -> NetworkTime {
        match self {
            NetworkId::Mainnet => NetworkTime {
                era_start_time: 1_596_059_091,
                era_start_slot: 4_492_800,
                slot_length_secs: 1,
            },
            NetworkId::Preprod => NetworkTime {
                era_start_time: 1_655_769_600,
                era_start_slot: 86_400,
                slot_length_secs: 1,
            },
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mainnet" => Some(NetworkId::Mainnet),
            "preprod" | "testnet" | "" => Some(NetworkId::Preprod),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_url: String,
    pub fetch_utxos_max_addresses: usize,
    pub filter_used_max_addresses: usize,
    pub tx_history_max_addresses: usize,
    pub tx_history_response_limit: usize,
    pub account_state_max_addresses: usize,
}

impl BackendConfig {
    pub fn for_network(network: NetworkId) -> Self {
        Self {
            api_url: network.default_backend_url().to_string(),
            ..Default::default()
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: NetworkId::Preprod.default_backend_url().to_string(),
            fetch_utxos_max_addresses: BACKEND_MAX_ADDRESSES,
            filter_used_max_addresses: BACKEND_MAX_ADDRESSES,
            tx_history_max_addresses: BACKEND_MAX_ADDRESSES,
            tx_history_response_limit: TX_HISTORY_RESPONSE_LIMIT,
            account_state_max_addresses: BACKEND_MAX_ADDRESSES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub block_size: usize,
    pub gap_limit: usize,
    pub max_generated_unused: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            block_size: DISCOVERY_BLOCK_SIZE,
            gap_limit: DISCOVERY_GAP_SIZE,
            max_generated_unused: MAX_GENERATED_UNUSED,
        }
    }
}

/// Ledger parameters the transaction builder needs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    pub linear_fee_constant: u64,
    pub linear_fee_coefficient: u64,
    pub coins_per_utxo_byte: u64,
    pub key_deposit: u64,
    pub ttl_offset: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            linear_fee_constant: 155_381,
            linear_fee_coefficient: 44,
            coins_per_utxo_byte: 4_310,
            key_deposit: 2_000_000,
            ttl_offset: 7_200,
        }
    }
}

/// Maps wall-clock time to absolute slots for the current era
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTime {
    pub era_start_time: i64,
    pub era_start_slot: u64,
    pub slot_length_secs: u64,
}

impl NetworkTime {
    pub fn absolute_slot_at(&self, unix_secs: i64) -> u64 {
        let elapsed = unix_secs.saturating_sub(self.era_start_time).max(0) as u64;
        self.era_start_slot + elapsed / self.slot_length_secs.max(1)
    }
}

/// Argon2id cost parameters for the password-encrypted root key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: NetworkId,
    pub backend: BackendConfig,
    pub discovery: DiscoveryConfig,
    pub protocol: ProtocolParams,
    pub network_time: NetworkTime,
    pub history_refresh_secs: u64,
    pub background_sync: bool,
    pub kdf: KdfParams,
}

impl WalletConfig {
    pub fn for_network(network: NetworkId) -> Self {
        Self {
            network,
            backend: BackendConfig::for_network(network),
            network_time: network.network_time(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CARDANO_NETWORK`: "preprod" (default) or "mainnet"
    /// - `BACKEND_URL`: backend API endpoint (optional, per-network default)
    /// - `HISTORY_REFRESH_SECS`: background sync interval (optional)
    /// - `DISABLE_BACKGROUND_SYNC`: any of "1"/"true" turns the loop off
    pub fn from_env() -> Self {
        let network_str = env::var("CARDANO_NETWORK").unwrap_or_default();
        let network = match NetworkId::parse(&network_str) {
            Some(NetworkId::Mainnet) => {
                log::info!("🌐 Using MAINNET network");
                NetworkId::Mainnet
            }
            Some(NetworkId::Preprod) => {
                log::info!("🔧 Using PREPROD network");
                NetworkId::Preprod
            }
            None => {
                log::warn!("⚠️  Unknown network '{}', defaulting to preprod", network_str);
                NetworkId::Preprod
            }
        };

        let mut config = Self::for_network(network);

        if let Ok(url) = env::var("BACKEND_URL") {
            config.backend.api_url = url;
        }
        log::info!("📡 Backend URL: {}", config.backend.api_url);

        if let Some(secs) = env::var("HISTORY_REFRESH_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.history_refresh_secs = secs;
        }

        config.background_sync = !env::var("DISABLE_BACKGROUND_SYNC")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        log::info!(
            "⏱️  Background sync: {} (every {}s)",
            if config.background_sync { "on" } else { "off" },
            config.history_refresh_secs
        );

        config
    }

    /// Parse a TOML document; missing fields take network defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(source)
            .map_err(|e| WalletError::InvalidInput(format!("Invalid config: {}", e)))?;

        let network = value
            .get("network")
            .and_then(|v| v.as_str())
            .map(|s| {
                NetworkId::parse(s)
                    .ok_or_else(|| WalletError::InvalidInput(format!("Unknown network '{}'", s)))
            })
            .transpose()?
            .unwrap_or(NetworkId::Preprod);

        let mut config: WalletConfig = value
            .try_into()
            .map_err(|e| WalletError::InvalidInput(format!("Invalid config: {}", e)))?;

        let defaults = Self::for_network(network);
        config.network = network;
        if !source.contains("network_time") {
            config.network_time = defaults.network_time;
        }
        if !source.contains("api_url") {
            config.backend.api_url = defaults.backend.api_url;
        }

        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.history_refresh_secs)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::Preprod,
            backend: BackendConfig::default(),
            discovery: DiscoveryConfig::default(),
            protocol: ProtocolParams::default(),
            network_time: NetworkId::Preprod.network_time(),
            history_refresh_secs: HISTORY_REFRESH_SECS,
            background_sync: true,
            kdf: KdfParams::default(),
        }
    }
}
