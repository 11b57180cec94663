//! Error types for the wallet engine
//!
//! A single `WalletError` travels through every layer. Domain errors are meant
//! to be shown to the user, transient ones are retried by the next sync cycle,
//! invalid-state errors abort the current operation and leave cached state
//! untouched.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Not enough money: available {available}, required {required}")]
    NotEnoughMoney { available: u64, required: u64 },

    #[error("Transaction would have no outputs")]
    NoOutputs,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Address not found in chain: {0}")]
    AddressNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Signing not supported: {0}")]
    SigningUnsupported(String),

    #[error("Invalid wallet state: {0}")]
    InvalidState(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet already exists: {0}")]
    WalletExists(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Hardware wallet error: {0}")]
    HardwareWallet(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Failures the next scheduled sync cycle is expected to recover from
    pub fn is_transient(&self) -> bool {
        matches!(self, WalletError::Network(_) | WalletError::Backend { .. })
    }

    pub fn crypto(err: impl std::fmt::Display) -> Self {
        WalletError::Crypto(err.to_string())
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        WalletError::Network(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Storage(StorageError::Json(err))
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
