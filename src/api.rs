//! REST API for a MeshLedger node
//!
//! Every route lives under `/api`. `GET /api/blockchain` is also the
//! endpoint peers fetch during reconciliation, so its body is exactly the
//! JSON array of blocks.

use axum::{
    extract::{Query, Request, State},
    http::{self, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::node::{Node, NodeState};
use crate::sync::SyncStats;
use crate::transaction::Transaction;

/// Browser origins the bundled frontends are served from.
const ALLOWED_ORIGINS: [&str; 3] = [
    "http://localhost:3000",
    "http://localhost:8080",
    "http://localhost",
];

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BlockchainError(e @ ChainError::InvalidBlock(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::BlockchainError(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Deserialize)]
pub struct TransactRequest {
    pub recipient: String,
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletInfoResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Serialize)]
pub struct SyncStatusResponse {
    pub node_id: String,
    pub node_state: NodeState,
    pub chain_length: usize,
    pub pending_transactions: usize,
    pub sync: SyncStats,
}

/// `chain` newest first, sliced to `[start, end)`. Out-of-range bounds are
/// clamped, so an inverted or oversized window yields fewer blocks.
fn reversed_range(chain: &[Block], start: usize, end: usize) -> Vec<Block> {
    let end = end.min(chain.len());
    if start >= end {
        return Vec::new();
    }
    chain.iter().rev().skip(start).take(end - start).cloned().collect()
}

// ============================================================================
// Middleware
// ============================================================================

async fn logging_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;
    let node_state = node.state().await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        node_state = ?node_state,
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            ALLOWED_ORIGINS.into_iter().map(HeaderValue::from_static),
        ))
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route("/", get(welcome))
        // Blockchain endpoints
        .route("/blockchain", get(get_blockchain))
        .route("/blockchain/range", get(get_blockchain_range))
        .route("/blockchain/length", get(get_blockchain_length))
        .route("/blockchain/mine", get(mine_block))
        // Wallet endpoints
        .route("/wallet/transact", post(transact))
        .route("/wallet/info", get(wallet_info))
        .route("/known-addresses", get(known_addresses))
        .route("/transactions", get(get_transactions))
        // System endpoints
        .route("/health", get(health_check))
        .route("/sync/status", get(sync_status))
        .layer(middleware::from_fn_with_state(node.clone(), logging_middleware))
        .with_state(node.clone());

    // Nesting maps "/" to "/api" only; the trailing-slash form is routed here.
    let welcome_routes = Router::new()
        .route("/api/", get(welcome))
        .layer(middleware::from_fn_with_state(node.clone(), logging_middleware))
        .with_state(node);

    Router::new()
        .merge(welcome_routes)
        .nest("/api", api_routes)
        .layer(cors)
}

// ============================================================================
// Handlers
// ============================================================================

async fn welcome() -> &'static str {
    "Welcome to the blockchain"
}

async fn get_blockchain(State(node): State<Arc<Node>>) -> Json<Vec<Block>> {
    Json(node.ledger().snapshot().await.to_vec())
}

async fn get_blockchain_range(
    State(node): State<Arc<Node>>,
    Query(range): Query<RangeQuery>,
) -> Json<Vec<Block>> {
    let chain = node.ledger().snapshot().await;
    Json(reversed_range(&chain, range.start, range.end))
}

async fn get_blockchain_length(State(node): State<Arc<Node>>) -> Json<usize> {
    Json(node.ledger().chain_len().await)
}

async fn mine_block(State(node): State<Arc<Node>>) -> Result<Json<Block>, ApiError> {
    Ok(Json(node.mine_next_block().await?))
}

async fn transact(
    State(node): State<Arc<Node>>,
    Json(req): Json<TransactRequest>,
) -> Result<Json<Transaction>, ApiError> {
    if req.recipient.trim().is_empty() {
        return Err(ApiError::InvalidInput("recipient must not be empty".into()));
    }
    if req.amount == 0 {
        return Err(ApiError::InvalidInput("amount must be positive".into()));
    }
    Ok(Json(node.submit_transaction(&req.recipient, req.amount).await?))
}

async fn wallet_info(State(node): State<Arc<Node>>) -> Json<WalletInfoResponse> {
    Json(WalletInfoResponse {
        address: node.wallet().address().to_string(),
        balance: node.wallet_balance().await,
    })
}

async fn known_addresses(State(node): State<Arc<Node>>) -> Json<Vec<String>> {
    let chain = node.ledger().snapshot().await;
    let addresses: BTreeSet<&String> = chain
        .iter()
        .flat_map(|block| block.data.iter())
        .flat_map(|tx| tx.output.keys())
        .collect();
    Json(addresses.into_iter().cloned().collect())
}

async fn get_transactions(State(node): State<Arc<Node>>) -> Json<Vec<Transaction>> {
    Json(node.ledger().pending_transactions().await)
}

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let state = node.state().await;
    let status = match state {
        NodeState::Ready | NodeState::Degraded => StatusCode::OK,
        NodeState::Booting | NodeState::Syncing => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = serde_json::json!({
        "status": if status == StatusCode::OK { "healthy" } else { "unhealthy" },
        "node_state": state,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    (status, Json(body))
}

async fn sync_status(State(node): State<Arc<Node>>) -> Json<SyncStatusResponse> {
    let (chain_length, pending_transactions) = {
        let state = node.ledger().read().await;
        (state.blockchain.len(), state.pool.len())
    };
    Json(SyncStatusResponse {
        node_id: node.node_id().to_string(),
        node_state: node.state().await,
        chain_length,
        pending_transactions,
        sync: node.replicator().stats().await,
    })
}
