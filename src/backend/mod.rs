//! Remote backend boundary
//!
//! Every call is bounded by a backend-imposed address count; the helpers in
//! this module do the chunking so callers can pass arbitrarily long lists.

pub mod http;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::UsedAddressOracle;
use crate::error::Result;

pub use http::HttpBackend;
pub use types::*;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Subset of `addresses` that appear on chain, in request order
    async fn filter_used_addresses(&self, addresses: &[String]) -> Result<Vec<String>>;

    async fn fetch_tx_history(&self, request: &TxHistoryRequest) -> Result<TxHistoryPage>;

    async fn fetch_utxos_for_addresses(&self, addresses: &[String]) -> Result<Vec<RawUtxo>>;

    async fn submit_transaction(&self, signed_tx: &[u8]) -> Result<SubmitReceipt>;

    async fn get_account_state(&self, reward_addresses: &[String]) -> Result<AccountStateResponse>;

    async fn get_best_block(&self) -> Result<BestBlock>;

    async fn check_server_status(&self) -> Result<ServerStatus>;
}

/// Discovery oracle that splits requests into backend-sized chunks
pub struct ChunkedOracle {
    backend: Arc<dyn Backend>,
    chunk_size: usize,
}

impl ChunkedOracle {
    pub fn new(backend: Arc<dyn Backend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl UsedAddressOracle for ChunkedOracle {
    async fn filter_used(&self, addresses: &[String]) -> Result<Vec<String>> {
        let mut used = Vec::new();
        for chunk in addresses.chunks(self.chunk_size) {
            used.extend(self.backend.filter_used_addresses(chunk).await?);
        }
        Ok(used)
    }
}

/// Account state for many reward addresses, merged across chunks
pub async fn fetch_account_state_chunked(
    backend: &dyn Backend,
    reward_addresses: &[String],
    chunk_size: usize,
) -> Result<AccountStateResponse> {
    let mut merged = AccountStateResponse::new();
    for chunk in reward_addresses.chunks(chunk_size.max(1)) {
        merged.extend(backend.get_account_state(chunk).await?);
    }
    Ok(merged)
}
