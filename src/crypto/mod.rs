//! Key derivation, address encoding and root-key protection
//!
//! The rest of the crate treats this module as an opaque library: derive a
//! key for a path, encode an address, hash a body, sign a digest.

pub mod address;
pub mod encryption;
pub mod keys;

use blake2::{Blake2b, Digest};
use typenum::{U28, U32};

pub use address::{AddressGenerator, ChainType, ShelleyAddressGenerator};
pub use encryption::{validate_password, EncryptedRootKey};
pub use keys::{AccountPrivateKey, AccountPublicKey, KeyManager, RootKey};

/// 28-byte credential hash (key hashes, pool ids)
pub fn blake2b_224(data: &[u8]) -> [u8; 28] {
    let mut hasher = Blake2b::<U28>::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 32-byte body hash (transaction ids)
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hasher.finalize().into()
}
