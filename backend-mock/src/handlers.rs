/// Axum HTTP handlers for the wallet backend API

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::ledger::{Ledger, LedgerError};
use crate::types::*;

/// Shared application state
pub type SharedLedger = Arc<Mutex<Ledger>>;

/// Addresses accepted per request, mirroring the production backend
pub const MAX_ADDRESSES: usize = 50;

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, message).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownBlock(_) | LedgerError::UnknownTx(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

fn check_limit(addresses: &[String]) -> Result<(), ApiError> {
    if addresses.len() > MAX_ADDRESSES {
        return Err(ApiError::BadRequest(format!(
            "Too many addresses: {} > {}",
            addresses.len(),
            MAX_ADDRESSES
        )));
    }
    Ok(())
}

/// POST /api/v2/addresses/filterUsed
pub async fn filter_used(
    State(ledger): State<SharedLedger>,
    Json(request): Json<AddressesRequest>,
) -> Result<Json<Vec<String>>, ApiError> {
    check_limit(&request.addresses)?;
    Ok(Json(ledger.lock().filter_used(&request.addresses)))
}

/// POST /api/v2/txs/history
pub async fn tx_history(
    State(ledger): State<SharedLedger>,
    Json(request): Json<HistoryRequest>,
) -> Result<Json<Vec<TxResponse>>, ApiError> {
    check_limit(&request.addresses)?;
    let page = ledger.lock().history(&request)?;
    Ok(Json(page))
}

/// POST /api/txs/utxoForAddresses
pub async fn utxos_for_addresses(
    State(ledger): State<SharedLedger>,
    Json(request): Json<AddressesRequest>,
) -> Result<Json<Vec<UtxoResponse>>, ApiError> {
    check_limit(&request.addresses)?;
    Ok(Json(ledger.lock().utxos_for(&request.addresses)))
}

/// POST /api/txs/signed
/// Accepts a hex-encoded signed transaction into the mempool
pub async fn submit_signed(
    State(ledger): State<SharedLedger>,
    Json(request): Json<SignedTxRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let id = ledger
        .lock()
        .submit(&request.signed_tx)
        .map_err(|e| ApiError::BadRequest(format!("Failed to submit: {}", e)))?;
    Ok(Json(SubmitResponse { id }))
}

/// POST /api/account/state
pub async fn account_state(
    State(ledger): State<SharedLedger>,
    Json(request): Json<AddressesRequest>,
) -> Result<Json<HashMap<String, Option<AccountStateResponse>>>, ApiError> {
    check_limit(&request.addresses)?;
    Ok(Json(ledger.lock().account_state(&request.addresses)))
}

/// GET /api/v2/bestblock
pub async fn best_block(State(ledger): State<SharedLedger>) -> Json<BestBlockResponse> {
    Json(ledger.lock().best_block())
}

/// GET /api/status
pub async fn status() -> Json<StatusResponse> {
    let server_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    Json(StatusResponse {
        is_server_ok: true,
        is_maintenance: false,
        server_time,
    })
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /mock/fund
/// Pays an address from the faucet in a fresh block
pub async fn fund(
    State(ledger): State<SharedLedger>,
    Json(request): Json<FundRequest>,
) -> Result<Json<FundResponse>, ApiError> {
    if request.amount == 0 {
        return Err(ApiError::BadRequest("Amount must be positive".to_string()));
    }
    let mut ledger = ledger.lock();
    let tx_hash = ledger.fund(&request.address, request.amount);
    log::info!("Funded {} with {} lovelace", request.address, request.amount);
    Ok(Json(FundResponse {
        tx_hash,
        block_height: ledger.height(),
    }))
}

/// POST /mock/mine
/// Mines blocks; the first one includes every pending transaction
pub async fn mine_blocks(
    State(ledger): State<SharedLedger>,
    Json(request): Json<MineBlocksRequest>,
) -> Result<Json<MineBlocksResponse>, ApiError> {
    if request.count == 0 || request.count > 1000 {
        return Err(ApiError::BadRequest(
            "Count must be between 1 and 1000".to_string(),
        ));
    }
    let mut ledger = ledger.lock();
    let block_hashes = ledger.mine(request.count);
    log::info!("Mined {} block(s)", block_hashes.len());
    Ok(Json(MineBlocksResponse {
        block_hashes,
        new_height: ledger.height(),
    }))
}

/// POST /mock/reward
pub async fn add_rewards(
    State(ledger): State<SharedLedger>,
    Json(request): Json<RewardRequest>,
) -> StatusCode {
    ledger.lock().add_rewards(&request.reward_address, request.amount);
    StatusCode::NO_CONTENT
}
