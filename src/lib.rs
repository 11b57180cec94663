//! Shelley Wallet: a client-side wallet engine for Cardano Shelley-era accounts
//!
//! This crate keeps a deterministic, append-only view of an HD account on top
//! of an eventually-consistent remote backend, and builds and signs
//! transactions against that view.
//!
//! # Architecture
//!
//! - **AddressChain**: gap-limit discovery of internal and external addresses
//! - **UtxoManager / TransactionManager**: incremental caches of chain state
//! - **ShelleyWallet**: full sync under a per-wallet lock, background
//!   scheduling, transaction building, software and hardware signing
//! - **WalletManager**: explicit owner of open wallets
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shelley_wallet::{FileSystemStore, HttpBackend, WalletConfig, WalletManager, SendToken};
//!
//! let config = WalletConfig::from_env();
//! let backend = Arc::new(HttpBackend::new(config.backend.clone()));
//! let store = Arc::new(FileSystemStore::new());
//! let manager = WalletManager::new(store, backend, config);
//!
//! let wallet = manager.create_wallet("savings", &mnemonic, "long enough password").await?;
//! wallet.sync().await?;
//!
//! let unsigned = wallet
//!     .create_unsigned_tx(&receiver, &[SendToken::ada(5_000_000)], None)
//!     .await?;
//! let signed = wallet.sign_tx_with_password(&unsigned, "long enough password").await?;
//! wallet.submit_transaction(&signed).await?;
//! ```

pub mod backend;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod memos;
pub mod storage;
pub mod transactions;
pub mod tx;
pub mod utxo;
pub mod wallet;

pub use backend::{Backend, ChunkedOracle, HttpBackend};
pub use chain::{AddressChain, AddressChainJson, UsedAddressOracle};
pub use config::{BackendConfig, DiscoveryConfig, NetworkId, ProtocolParams, WalletConfig};
pub use crypto::{AccountPublicKey, AddressGenerator, ChainType, KeyManager, RootKey, ShelleyAddressGenerator};
pub use error::{Result, StorageError, WalletError};
pub use events::{SubscriptionId, WalletEvent};
pub use memos::MemosManager;
pub use storage::{FileSystemStore, KeyValueStore, MemoryStore, ScopedStore};
pub use transactions::{AssuranceLevel, TransactionDirection, TransactionInfo, TransactionManager, TxStatus};
pub use tx::{
    HardwareSigner, HwDeviceInfo, SendToken, SignedTx, TransactionBuilder, Transport, UnsignedTx, PRIMARY_TOKEN_ID,
};
pub use utxo::{Utxo, UtxoManager};
pub use wallet::{ShelleyWallet, StakingInfo, SyncOutcome, SyncStatus, WalletManager, WalletMeta, WalletMode};
