use std::ops::Range;

use bech32::{Bech32, Hrp};
use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use super::blake2b_224;
use super::keys::{AccountPublicKey, ROLE_EXTERNAL, ROLE_INTERNAL};
use crate::config::NetworkId;
use crate::error::{Result, WalletError};

const BASE_ADDRESS_HEADER: u8 = 0x00;
const REWARD_ADDRESS_HEADER: u8 = 0xe0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    Internal,
    External,
}

impl ChainType {
    pub fn role(&self) -> u32 {
        match self {
            ChainType::External => ROLE_EXTERNAL,
            ChainType::Internal => ROLE_INTERNAL,
        }
    }
}

pub fn key_hash(key: &PublicKey) -> [u8; 28] {
    blake2b_224(&key.serialize())
}

fn encode(hrp: &str, bytes: &[u8]) -> Result<String> {
    let hrp = Hrp::parse(hrp).map_err(WalletError::crypto)?;
    bech32::encode::<Bech32>(hrp, bytes).map_err(WalletError::crypto)
}

/// Payment credential plus staking credential
pub fn base_address(network: NetworkId, payment: &PublicKey, staking: &PublicKey) -> Result<String> {
    let mut bytes = Vec::with_capacity(57);
    bytes.push(BASE_ADDRESS_HEADER | network.network_id());
    bytes.extend_from_slice(&key_hash(payment));
    bytes.extend_from_slice(&key_hash(staking));
    encode(network.address_hrp(), &bytes)
}

pub fn reward_address_bytes(network: NetworkId, staking: &PublicKey) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(29);
    bytes.push(REWARD_ADDRESS_HEADER | network.network_id());
    bytes.extend_from_slice(&key_hash(staking));
    bytes
}

/// Reward address in the hex form the backend indexes by
pub fn reward_address_hex(network: NetworkId, staking: &PublicKey) -> String {
    hex::encode(reward_address_bytes(network, staking))
}

pub fn reward_address_bech32(network: NetworkId, staking: &PublicKey) -> Result<String> {
    encode(network.reward_hrp(), &reward_address_bytes(network, staking))
}

/// Raw address bytes from either bech32 or hex form
pub fn decode_address(address: &str) -> Result<Vec<u8>> {
    bech32::decode(address)
        .map(|(_, bytes)| bytes)
        .ok()
        .or_else(|| hex::decode(address).ok())
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| WalletError::InvalidInput(format!("Invalid address: {}", address)))
}

/// Checks the address is well formed and belongs to `network`
pub fn validate_address(address: &str, network: NetworkId) -> Result<()> {
    let bytes = decode_address(address)?;
    let header = *bytes
        .first()
        .ok_or_else(|| WalletError::InvalidInput(format!("Invalid address: {}", address)))?;
    if header & 0x0f != network.network_id() {
        return Err(WalletError::InvalidInput(format!(
            "Address {} is for another network",
            address
        )));
    }
    Ok(())
}

/// Deterministic source of the addresses of one chain
pub trait AddressGenerator: Send + Sync {
    fn account_pub_key_hex(&self) -> &str;

    fn chain_type(&self) -> ChainType;

    fn generate(&self, indices: Range<u32>) -> Result<Vec<String>>;
}

pub struct ShelleyAddressGenerator {
    account: AccountPublicKey,
    account_hex: String,
    staking: PublicKey,
    chain_type: ChainType,
    network: NetworkId,
}

impl ShelleyAddressGenerator {
    pub fn new(account: AccountPublicKey, chain_type: ChainType, network: NetworkId) -> Result<Self> {
        let staking = account.staking_key()?;
        Ok(Self {
            account_hex: account.to_hex(),
            account,
            staking,
            chain_type,
            network,
        })
    }
}

impl AddressGenerator for ShelleyAddressGenerator {
    fn account_pub_key_hex(&self) -> &str {
        &self.account_hex
    }

    fn chain_type(&self) -> ChainType {
        self.chain_type
    }

    fn generate(&self, indices: Range<u32>) -> Result<Vec<String>> {
        indices
            .map(|i| {
                let payment = self.account.derive(self.chain_type.role(), i)?;
                base_address(self.network, &payment, &self.staking)
            })
            .collect()
    }
}
