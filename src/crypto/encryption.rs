//! Password protection of the master key at rest
//!
//! Argon2id stretches the password into a ChaCha20-Poly1305 key. A failed
//! authentication tag is the only signal of a wrong password.

use argon2::{Algorithm, Argon2, Params, Version};
use bitcoin::key::rand::{self, RngCore};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::keys::RootKey;
use crate::config::{KdfParams, MIN_PASSWORD_LENGTH};
use crate::error::{Result, WalletError};

const SALT_BYTES: usize = 16;
const NONCE_BYTES: usize = 12;
const AAD: &[u8] = b"shelley-wallet-root-key-v1";

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(WalletError::InvalidInput(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRootKey {
    pub kdf: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

fn derive_key(password: &str, kdf: &KdfParams, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(WalletError::crypto)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out[..])
        .map_err(WalletError::crypto)?;
    Ok(out)
}

impl EncryptedRootKey {
    pub fn encrypt(root_key: &RootKey, password: &str, kdf: KdfParams) -> Result<Self> {
        validate_password(password)?;

        let mut salt = [0u8; SALT_BYTES];
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let key = derive_key(password, &kdf, &salt)?;
        let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(
                chacha20poly1305::Nonce::from_slice(&nonce),
                Payload {
                    msg: root_key.encoded().as_bytes(),
                    aad: AAD,
                },
            )
            .map_err(|_| WalletError::Crypto("Root key encryption failed".to_string()))?;

        Ok(Self {
            kdf,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    pub fn decrypt(&self, password: &str) -> Result<RootKey> {
        let salt = hex::decode(&self.salt).map_err(WalletError::crypto)?;
        let nonce = hex::decode(&self.nonce).map_err(WalletError::crypto)?;
        let ciphertext = hex::decode(&self.ciphertext).map_err(WalletError::crypto)?;
        if nonce.len() != NONCE_BYTES {
            return Err(WalletError::Crypto("Malformed nonce".to_string()));
        }

        let key = derive_key(password, &self.kdf, &salt)?;
        let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key[..]));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    chacha20poly1305::Nonce::from_slice(&nonce),
                    Payload {
                        msg: &ciphertext,
                        aad: AAD,
                    },
                )
                .map_err(|_| WalletError::WrongPassword)?,
        );

        let encoded = String::from_utf8(plaintext.to_vec())
            .map_err(|_| WalletError::Crypto("Malformed root key".to_string()))?;
        RootKey::from_encoded(Zeroizing::new(encoded))
    }
}
