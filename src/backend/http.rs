use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::*;
use super::Backend;
use crate::config::BackendConfig;
use crate::error::{Result, WalletError};

/// Backend client over the JSON HTTP API
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn with_client(client: reqwest::Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(WalletError::Backend { status, message })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        log::debug!("POST {}", url);
        let response = self.client.post(&url).json(body).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        log::debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    fn ensure_limit(&self, count: usize, limit: usize, what: &str) -> Result<()> {
        if count > limit {
            return Err(WalletError::InvalidInput(format!(
                "{} request with {} addresses exceeds backend limit {}",
                what, count, limit
            )));
        }
        Ok(())
    }
}

/// The backend has already accepted the transaction at this point, so an
/// unreadable body only loses the echoed id
fn parse_receipt(text: &str) -> SubmitReceipt {
    if text.trim().is_empty() {
        return SubmitReceipt::default();
    }
    serde_json::from_str(text).unwrap_or_else(|e| {
        log::warn!("Unreadable submit receipt {:?}: {}", text, e);
        SubmitReceipt::default()
    })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn filter_used_addresses(&self, addresses: &[String]) -> Result<Vec<String>> {
        self.ensure_limit(addresses.len(), self.config.filter_used_max_addresses, "filterUsed")?;
        let body = AddressesRequest {
            addresses: addresses.to_vec(),
        };
        self.post("v2/addresses/filterUsed", &body).await
    }

    async fn fetch_tx_history(&self, request: &TxHistoryRequest) -> Result<TxHistoryPage> {
        self.ensure_limit(request.addresses.len(), self.config.tx_history_max_addresses, "history")?;
        let transactions: Vec<RawTransaction> = self.post("v2/txs/history", request).await?;
        let is_last = transactions.len() < self.config.tx_history_response_limit;
        Ok(TxHistoryPage {
            transactions,
            is_last,
        })
    }

    async fn fetch_utxos_for_addresses(&self, addresses: &[String]) -> Result<Vec<RawUtxo>> {
        self.ensure_limit(addresses.len(), self.config.fetch_utxos_max_addresses, "utxos")?;
        let body = AddressesRequest {
            addresses: addresses.to_vec(),
        };
        self.post("txs/utxoForAddresses", &body).await
    }

    async fn submit_transaction(&self, signed_tx: &[u8]) -> Result<SubmitReceipt> {
        let body = SignedTxRequest {
            signed_tx: hex::encode(signed_tx),
        };
        let url = self.url("txs/signed");
        let response = self.client.post(&url).json(&body).send().await?;
        let response = Self::check(response).await?;
        let text = response.text().await?;
        Ok(parse_receipt(&text))
    }

    async fn get_account_state(&self, reward_addresses: &[String]) -> Result<AccountStateResponse> {
        self.ensure_limit(
            reward_addresses.len(),
            self.config.account_state_max_addresses,
            "account state",
        )?;
        let body = AddressesRequest {
            addresses: reward_addresses.to_vec(),
        };
        self.post("account/state", &body).await
    }

    async fn get_best_block(&self) -> Result<BestBlock> {
        self.get("v2/bestblock").await
    }

    async fn check_server_status(&self) -> Result<ServerStatus> {
        self.get("status").await
    }
}
