use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::key::rand;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroizing;

use crate::config::NetworkId;
use crate::error::{Result, WalletError};

pub const PURPOSE: u32 = 1852;
pub const COIN_TYPE: u32 = 1815;
pub const ACCOUNT_INDEX: u32 = 0;

pub const ROLE_EXTERNAL: u32 = 0;
pub const ROLE_INTERNAL: u32 = 1;
pub const ROLE_STAKING: u32 = 2;
pub const STAKING_KEY_INDEX: u32 = 0;

/// Hardened account path, `m/1852'/1815'/0'`
pub fn account_path() -> Result<DerivationPath> {
    DerivationPath::from_str(&format!("m/{}'/{}'/{}'", PURPOSE, COIN_TYPE, ACCOUNT_INDEX))
        .map_err(WalletError::crypto)
}

/// Full path of a key below the account, as `[purpose', coin', account', role, index]`
pub fn full_path(role: u32, index: u32) -> Vec<u32> {
    const HARDENED: u32 = 0x8000_0000;
    vec![
        PURPOSE | HARDENED,
        COIN_TYPE | HARDENED,
        ACCOUNT_INDEX | HARDENED,
        role,
        index,
    ]
}

fn relative_path(role: u32, index: u32) -> Result<[ChildNumber; 2]> {
    Ok([
        ChildNumber::from_normal_idx(role).map_err(WalletError::crypto)?,
        ChildNumber::from_normal_idx(index).map_err(WalletError::crypto)?,
    ])
}

pub struct KeyManager;

impl KeyManager {
    /// Fresh 15-word mnemonic
    pub fn generate_mnemonic() -> Result<Mnemonic> {
        let entropy = Zeroizing::new(rand::random::<[u8; 20]>());
        Mnemonic::from_entropy(entropy.as_slice())
            .map_err(|e| WalletError::InvalidInput(format!("Invalid mnemonic: {}", e)))
    }

    pub fn validate_mnemonic(words: &str) -> Result<Mnemonic> {
        Mnemonic::parse(words)
            .map_err(|e| WalletError::InvalidInput(format!("Invalid mnemonic: {}", e)))
    }

    pub fn root_key_from_mnemonic(words: &str, network: NetworkId) -> Result<RootKey> {
        let mnemonic = Self::validate_mnemonic(words)?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));
        let master = Xpriv::new_master(network.key_network(), seed.as_slice())
            .map_err(WalletError::crypto)?;
        Ok(RootKey::from_xpriv(&master))
    }
}

/// Master private key, serialized form kept in zeroizing memory
pub struct RootKey {
    encoded: Zeroizing<String>,
}

impl RootKey {
    fn from_xpriv(xpriv: &Xpriv) -> Self {
        Self {
            encoded: Zeroizing::new(xpriv.to_string()),
        }
    }

    pub fn from_encoded(encoded: Zeroizing<String>) -> Result<Self> {
        Xpriv::from_str(&encoded)
            .map_err(|_| WalletError::Crypto("Malformed root key".to_string()))?;
        Ok(Self { encoded })
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn account_private_key(&self) -> Result<AccountPrivateKey> {
        let secp = Secp256k1::new();
        let master = Xpriv::from_str(&self.encoded).map_err(WalletError::crypto)?;
        let account = master
            .derive_priv(&secp, &account_path()?)
            .map_err(WalletError::crypto)?;
        Ok(AccountPrivateKey { xpriv: account })
    }

    pub fn account_public_key(&self) -> Result<AccountPublicKey> {
        Ok(self.account_private_key()?.public())
    }
}

pub struct AccountPrivateKey {
    xpriv: Xpriv,
}

impl AccountPrivateKey {
    pub fn public(&self) -> AccountPublicKey {
        let secp = Secp256k1::new();
        AccountPublicKey {
            xpub: Xpub::from_priv(&secp, &self.xpriv),
        }
    }

    pub fn derive(&self, role: u32, index: u32) -> Result<SecretKey> {
        let secp = Secp256k1::new();
        let child = self
            .xpriv
            .derive_priv(&secp, &relative_path(role, index)?)
            .map_err(WalletError::crypto)?;
        Ok(child.private_key)
    }

    pub fn staking_key(&self) -> Result<SecretKey> {
        self.derive(ROLE_STAKING, STAKING_KEY_INDEX)
    }
}

impl Drop for AccountPrivateKey {
    fn drop(&mut self) {
        self.xpriv.private_key.non_secure_erase();
    }
}

/// Account-level extended public key, exchanged as hex of its 78-byte encoding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountPublicKey {
    xpub: Xpub,
}

impl AccountPublicKey {
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| WalletError::InvalidInput(format!("Invalid account key hex: {}", e)))?;
        let xpub = Xpub::decode(&bytes)
            .map_err(|e| WalletError::InvalidInput(format!("Invalid account key: {}", e)))?;
        Ok(Self { xpub })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.xpub.encode())
    }

    pub fn derive(&self, role: u32, index: u32) -> Result<PublicKey> {
        let secp = Secp256k1::new();
        let child = self
            .xpub
            .derive_pub(&secp, &relative_path(role, index)?)
            .map_err(WalletError::crypto)?;
        Ok(child.public_key)
    }

    pub fn staking_key(&self) -> Result<PublicKey> {
        self.derive(ROLE_STAKING, STAKING_KEY_INDEX)
    }
}
