/// Axum HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::*;

pub fn create_router(ledger: SharedLedger) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/v2/addresses/filterUsed", post(filter_used))
        .route("/v2/txs/history", post(tx_history))
        .route("/v2/bestblock", get(best_block))
        .route("/txs/utxoForAddresses", post(utxos_for_addresses))
        .route("/txs/signed", post(submit_signed))
        .route("/account/state", post(account_state))
        .route("/status", get(status));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        // Test helpers
        .route("/mock/fund", post(fund))
        .route("/mock/mine", post(mine_blocks))
        .route("/mock/reward", post(add_rewards))
        .with_state(ledger)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already bound listener (tests bind port 0)
pub async fn serve(listener: tokio::net::TcpListener, ledger: SharedLedger) -> anyhow::Result<()> {
    axum::serve(listener, create_router(ledger)).await?;
    Ok(())
}

pub async fn run_server(ledger: SharedLedger, host: String, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("🚀 Backend mock listening on http://{}/api", addr);
    log::info!("🔨 Faucet: POST /mock/fund, blocks: POST /mock/mine");

    serve(listener, ledger).await
}
