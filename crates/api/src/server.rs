use anyhow::Context;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{net::SocketAddr, str::FromStr};
use tipjar_core::{address_from_bytes, b256_from_bytes, parse_address, parse_amount, Address};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HistoryLimits {
    default: u32,
    max: u32,
}

#[derive(Clone)]
struct AppState {
    db: SqlitePool,
    limits: HistoryLimits,
}

/// Runtime configuration for the TipJar API server.
#[derive(Debug, Clone)]
pub struct ApiRuntimeConfig {
    database_url: String,
    port: u16,
    limits: HistoryLimits,
}

impl ApiRuntimeConfig {
    /// Build runtime configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://tipjar.db".to_string());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let max = parse_env_u32("TIPJAR_HISTORY_MAX_LIMIT")?.unwrap_or(100);
        let default = parse_env_u32("TIPJAR_HISTORY_DEFAULT_LIMIT")?.unwrap_or(50);
        anyhow::ensure!(max > 0, "TIPJAR_HISTORY_MAX_LIMIT must be at least 1");
        anyhow::ensure!(
            (1..=max).contains(&default),
            "TIPJAR_HISTORY_DEFAULT_LIMIT must be between 1 and {}",
            max
        );

        Ok(Self {
            database_url,
            port,
            limits: HistoryLimits { default, max },
        })
    }

    /// Build test configuration with the default history limits.
    pub fn for_test(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 0,
            limits: HistoryLimits {
                default: 50,
                max: 100,
            },
        }
    }
}

fn parse_env_u32(name: &str) -> anyhow::Result<Option<u32>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    anyhow::ensure!(!raw.is_empty(), "{} is set but empty", name);
    let v: u32 = raw
        .parse()
        .with_context(|| format!("Invalid {} (expected u32)", name))?;
    Ok(Some(v))
}

async fn build_state(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    // The indexer owns the schema; fail if the database doesn't exist
    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("Invalid database URL: {}", config.database_url))?
        .read_only(true)
        .create_if_missing(false);
    let db = SqlitePool::connect_with(connect_options)
        .await
        .context("Failed to open database")?;

    Ok(AppState {
        db,
        limits: config.limits,
    })
}

fn router_for_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tips/history", get(get_tip_history))
        .route("/creators/:address/stats", get(get_creator_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build an in-process API router from explicit runtime config.
pub async fn build_app(config: &ApiRuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state(config).await?;
    Ok(router_for_state(state))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: ApiRuntimeConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let db_for_shutdown = state.db.clone();
    let app = router_for_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("TipJar API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    db_for_shutdown.close().await;
    info!("TipJar API server shutdown complete");
    Ok(())
}

/// Run the API server using environment-driven configuration.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ApiRuntimeConfig::from_env()?).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn health(State(_state): State<AppState>) -> &'static str {
    "OK"
}

const ERROR_CODE_INVALID_REQUEST: &str = "invalid_request";
const ERROR_CODE_INTERNAL_ERROR: &str = "internal_error";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code,
                message: message.into(),
            },
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_REQUEST, msg)
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    tracing::error!("Request failed: {:#}", err);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ERROR_CODE_INTERNAL_ERROR,
        format!("Internal error: {}", err),
    )
}

fn parse_address_param(field: &str, value: &str) -> Result<Address, ApiError> {
    parse_address(value).map_err(|e| bad_request(format!("Invalid {}: {}", field, e)))
}

/// Resolve `limit`: absent means the default, larger than the maximum is clamped.
fn resolve_limit(raw: Option<&str>, limits: HistoryLimits) -> Result<u32, ApiError> {
    let Some(raw) = raw else {
        return Ok(limits.default);
    };
    let limit: u32 = raw
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("Invalid limit: {}", raw)))?;
    if limit == 0 {
        return Err(bad_request("limit must be at least 1"));
    }
    Ok(limit.min(limits.max))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    recipient: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct TipJson {
    sender: String,
    recipient: String,
    amount: String,
    fee: String,
    net_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    timestamp: u64,
    block_number: u64,
    log_index: u64,
    tx_hash: String,
}

impl TryFrom<db::DbTip> for TipJson {
    type Error = anyhow::Error;

    fn try_from(row: db::DbTip) -> anyhow::Result<Self> {
        // Stored amounts are re-parsed so a corrupt row fails the request instead of leaking
        let amount = |s: &str| parse_amount(s).map(|v| v.to_string());

        Ok(Self {
            sender: address_from_bytes(&row.sender)?.to_string(),
            recipient: address_from_bytes(&row.recipient)?.to_string(),
            amount: amount(&row.amount)?,
            fee: amount(&row.fee)?,
            net_amount: amount(&row.net_amount)?,
            message: row.message,
            timestamp: row.timestamp as u64,
            block_number: row.block_number as u64,
            log_index: row.log_index as u64,
            tx_hash: b256_from_bytes(&row.tx_hash)?.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TipHistoryResponse {
    tips: Vec<TipJson>,
}

async fn get_tip_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<TipHistoryResponse>, ApiError> {
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;
    let recipient = query
        .recipient
        .as_deref()
        .ok_or_else(|| bad_request("Missing recipient"))?;
    let recipient = parse_address_param("recipient", recipient)?;
    let limit = resolve_limit(query.limit.as_deref(), state.limits)?;

    let rows = db::get_tips_by_recipient(&state.db, &recipient, limit)
        .await
        .map_err(internal_error)?;

    let tips = rows
        .into_iter()
        .map(TipJson::try_from)
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(internal_error)?;

    Ok(Json(TipHistoryResponse { tips }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatorStatsResponse {
    recipient: String,
    total_tips: String,
    tip_count: u64,
    indexed_through_block: u64,
}

async fn get_creator_stats(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<CreatorStatsResponse>, ApiError> {
    let recipient = parse_address_param("address", &address)?;

    let stats = db::get_creator_stats(&state.db, &recipient)
        .await
        .map_err(internal_error)?;
    let indexed_through_block = db::get_indexed_through_block(&state.db)
        .await
        .map_err(internal_error)?;

    // Never-tipped recipients read as zero, like the ledger's getCreatorStats
    let (total_tips, tip_count) = match stats {
        Some(row) => (
            parse_amount(&row.total_tips)
                .map_err(internal_error)?
                .to_string(),
            row.tip_count as u64,
        ),
        None => ("0".to_string(), 0),
    };

    Ok(Json(CreatorStatsResponse {
        recipient: recipient.to_string(),
        total_tips,
        tip_count,
        indexed_through_block,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tempfile::NamedTempFile;
    use tipjar_core::{calculate_fee, B256, U256};
    use tipjar_indexer::storage::{BlockRecord, IngestBatch, Storage, TipRecord};
    use tower::ServiceExt;

    const ALICE: Address = Address::new([0xa1; 20]);
    const BOB: Address = Address::new([0xb0; 20]);

    fn tip(block_number: u64, log_index: u64, amount: u64, message: Option<&str>) -> TipRecord {
        let amount = U256::from(amount);
        let split = calculate_fee(amount);
        TipRecord {
            tx_hash: B256::repeat_byte(block_number as u8),
            log_index,
            block_number,
            block_hash: B256::repeat_byte(0xbb),
            tx_index: 0,
            sender: ALICE,
            recipient: BOB,
            amount,
            fee: split.fee,
            net_amount: split.net_amount,
            message: message.map(str::to_string),
            timestamp: 1_700_000_000 + block_number * 2,
        }
    }

    async fn setup(tips: Vec<TipRecord>) -> (Storage, Router, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();
        storage
            .initialize_sync_state(84532, 0, B256::ZERO)
            .await
            .unwrap();

        let last = tips.iter().map(|t| t.block_number).max().unwrap_or(0);
        storage
            .ingest_batch(
                &IngestBatch {
                    tips,
                    pending_messages: Vec::new(),
                    rejected: Vec::new(),
                    checkpoint: BlockRecord {
                        block_number: last,
                        block_hash: B256::repeat_byte(0xcc),
                        parent_hash: B256::ZERO,
                        timestamp: 1_700_000_000,
                        event_count: 0,
                        indexed_at: 0,
                    },
                },
                16,
            )
            .await
            .unwrap();

        let url = format!("sqlite://{}", temp_db.path().display());
        let app = build_app(&ApiRuntimeConfig::for_test(url)).await.unwrap();
        (storage, app, temp_db)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_resolve_limit() {
        let limits = HistoryLimits {
            default: 50,
            max: 100,
        };
        assert_eq!(resolve_limit(None, limits).unwrap(), 50);
        assert_eq!(resolve_limit(Some("20"), limits).unwrap(), 20);
        assert_eq!(resolve_limit(Some("1000"), limits).unwrap(), 100);
        assert_eq!(resolve_limit(Some("0"), limits).unwrap_err().0, StatusCode::BAD_REQUEST);
        assert_eq!(resolve_limit(Some("ten"), limits).unwrap_err().0, StatusCode::BAD_REQUEST);
        assert_eq!(resolve_limit(Some("-5"), limits).unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_storage, app, _tmp) = setup(Vec::new()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_history_newest_first_with_camel_case_fields() {
        let (_storage, app, _tmp) = setup(vec![
            tip(3, 0, 10_000, None),
            tip(5, 1, 20_000, Some("gm")),
            tip(5, 0, 30_000, None),
        ])
        .await;

        let uri = format!("/tips/history?recipient={}&limit=20", BOB);
        let (status, json) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::OK);

        let tips = json["tips"].as_array().unwrap();
        let order: Vec<(u64, u64)> = tips
            .iter()
            .map(|t| {
                (
                    t["blockNumber"].as_u64().unwrap(),
                    t["logIndex"].as_u64().unwrap(),
                )
            })
            .collect();
        assert_eq!(order, vec![(5, 1), (5, 0), (3, 0)]);

        assert_eq!(tips[0]["amount"], "20000");
        assert_eq!(tips[0]["fee"], "400");
        assert_eq!(tips[0]["netAmount"], "19600");
        assert_eq!(tips[0]["message"], "gm");
        assert_eq!(tips[0]["sender"], ALICE.to_string());
        assert_eq!(tips[0]["txHash"], B256::repeat_byte(5).to_string());
        // Absent messages are omitted, not null
        assert!(tips[1].get("message").is_none());
    }

    #[tokio::test]
    async fn test_history_limit_and_unknown_recipient() {
        let (_storage, app, _tmp) = setup(vec![
            tip(1, 0, 10_000, None),
            tip(2, 0, 10_000, None),
            tip(3, 0, 10_000, None),
        ])
        .await;

        let uri = format!("/tips/history?recipient={}&limit=2", BOB);
        let (_, json) = get_json(app.clone(), &uri).await;
        assert_eq!(json["tips"].as_array().unwrap().len(), 2);
        assert_eq!(json["tips"][0]["blockNumber"], 3);

        let uri = format!("/tips/history?recipient={}", ALICE);
        let (status, json) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["tips"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_rejects_bad_input() {
        let (_storage, app, _tmp) = setup(Vec::new()).await;

        for uri in [
            "/tips/history".to_string(),
            "/tips/history?recipient=0x1234".to_string(),
            format!("/tips/history?recipient={}&limit=0", BOB),
            format!("/tips/history?recipient={}&limit=abc", BOB),
            format!("/tips/history?recipient={}&recipient={}", BOB, ALICE),
        ] {
            let (status, json) = get_json(app.clone(), &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(json["error"]["code"], "invalid_request");
        }
    }

    #[tokio::test]
    async fn test_creator_stats() {
        let (_storage, app, _tmp) =
            setup(vec![tip(4, 0, 10_000, None), tip(7, 0, 5_000, None)]).await;

        let (status, json) = get_json(app.clone(), &format!("/creators/{}/stats", BOB)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["recipient"], BOB.to_string());
        assert_eq!(json["totalTips"], "15000");
        assert_eq!(json["tipCount"], 2);
        assert_eq!(json["indexedThroughBlock"], 7);

        let (status, json) = get_json(app.clone(), &format!("/creators/{}/stats", ALICE)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["totalTips"], "0");
        assert_eq!(json["tipCount"], 0);

        let (status, json) = get_json(app, "/creators/not-an-address/stats").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn test_store_failure_is_json_500() {
        let (storage, app, _tmp) = setup(vec![tip(1, 0, 10_000, None)]).await;

        // Corrupt the amount behind the API's back
        sqlx::query("UPDATE tips SET amount = 'garbage'")
            .execute(storage.pool())
            .await
            .unwrap();

        let (status, json) =
            get_json(app, &format!("/tips/history?recipient={}", BOB)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["code"], "internal_error");
    }

    #[tokio::test]
    async fn test_api_is_read_only() {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();

        let url = format!("sqlite://{}", temp_db.path().display());
        let state = build_state(&ApiRuntimeConfig::for_test(url)).await.unwrap();
        let result = sqlx::query("DELETE FROM tips").execute(&state.db).await;
        assert!(result.is_err());
    }
}
