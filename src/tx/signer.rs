use std::collections::BTreeSet;

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use super::types::{SignedTx, UnsignedTx, VkeyWitness};
use crate::crypto::keys::{RootKey, ROLE_STAKING, STAKING_KEY_INDEX};
use crate::error::{Result, WalletError};

/// Every key path that must witness `unsigned`, staking key last when needed
pub fn required_signers(unsigned: &UnsignedTx) -> Vec<(u32, u32)> {
    let mut seen = BTreeSet::new();
    let mut paths: Vec<(u32, u32)> = unsigned
        .input_addressing()
        .iter()
        .map(|a| (a.role, a.index))
        .filter(|p| seen.insert(*p))
        .collect();
    if unsigned.needs_staking_key() {
        paths.push((ROLE_STAKING, STAKING_KEY_INDEX));
    }
    paths
}

pub fn witness(secret: &SecretKey, body_hash: [u8; 32]) -> VkeyWitness {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(body_hash);
    let signature = secp.sign_ecdsa(&message, secret);
    VkeyWitness {
        vkey: hex::encode(PublicKey::from_secret_key(&secp, secret).serialize()),
        signature: hex::encode(signature.serialize_der()),
    }
}

/// Sign with keys derived from the root key. The account key is dropped
/// (and wiped) before this returns.
pub fn sign_tx(unsigned: &UnsignedTx, root_key: &RootKey) -> Result<SignedTx> {
    let body_hash = unsigned.body_hash()?;
    let account = root_key.account_private_key()?;

    let mut witnesses = Vec::new();
    for (role, index) in required_signers(unsigned) {
        let mut secret = account.derive(role, index)?;
        witnesses.push(witness(&secret, body_hash));
        secret.non_secure_erase();
    }
    drop(account);

    SignedTx::new(
        unsigned.body().clone(),
        witnesses,
        unsigned.auxiliary_data().cloned(),
    )
}

/// Check every witness signs the body hash
pub fn verify_witnesses(signed: &SignedTx) -> Result<()> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(signed.body().hash()?);
    for w in signed.witnesses() {
        let key_bytes = hex::decode(&w.vkey).map_err(WalletError::crypto)?;
        let sig_bytes = hex::decode(&w.signature).map_err(WalletError::crypto)?;
        let key = PublicKey::from_slice(&key_bytes).map_err(WalletError::crypto)?;
        let signature = Signature::from_der(&sig_bytes).map_err(WalletError::crypto)?;
        secp.verify_ecdsa(&message, &signature, &key)
            .map_err(|_| WalletError::Crypto(format!("Invalid witness for key {}", w.vkey)))?;
    }
    Ok(())
}
