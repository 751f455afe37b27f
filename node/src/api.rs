//! # REST API
//!
//! Builds the axum router that exposes keyseal over HTTP/JSON. All endpoints
//! share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                                 | Description                  |
//! |--------|--------------------------------------|------------------------------|
//! | GET    | `/health`                            | Liveness probe               |
//! | GET    | `/status`                            | Version and seal state       |
//! | POST   | `/key_management/create_master_key`  | Mint master key, get shares  |
//! | GET    | `/key_management/status`             | Share count and threshold    |
//! | POST   | `/key_management/share`              | Submit one share             |
//! | DELETE | `/key_management/share/:index`       | Drop a submitted share       |
//! | GET    | `/secrets`                           | List secret metadata         |
//! | POST   | `/secrets`                           | Create a secret              |
//! | GET    | `/secrets/:path`                     | Read a secret                |
//! | PUT    | `/secrets/:path`                     | Replace a secret's value     |
//! | DELETE | `/secrets/:path`                     | Delete a secret              |
//!
//! Shares and secret values travel as standard base64. The `:path` segment
//! is the secret path in unpadded base64url, since paths contain `/`.

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use keyseal_protocol::seal::{KeyManagementError, KeyManagementService, KeyStatus, SealState};
use keyseal_protocol::secrets::{SecretSummary, SecretsService};

use crate::error::ApiError;
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub keys: Arc<KeyManagementService>,
    pub secrets: Arc<SecretsService>,
    pub metrics: SharedMetrics,
}

impl AppState {
    fn record_seal_state(&self) {
        self.metrics
            .record_seal_state(self.keys.key_manager().state());
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route(
            "/key_management/create_master_key",
            post(create_master_key_handler),
        )
        .route("/key_management/status", get(key_status_handler))
        .route("/key_management/share", post(add_share_handler))
        .route("/key_management/share/:index", delete(delete_share_handler))
        .route("/secrets", get(list_secrets_handler).post(create_secret_handler))
        .route(
            "/secrets/:path",
            get(get_secret_handler)
                .put(update_secret_handler)
                .delete(delete_secret_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub seal_state: SealState,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMasterKeyRequest {
    pub total_shares: i64,
    pub min_shares: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMasterKeyResponse {
    /// Base64 shares. Shown once; the server keeps no copy.
    pub shares: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddShareRequest {
    pub share: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddShareResponse {
    pub index: usize,
    pub unlocked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSecretRequest {
    pub path: String,
    /// Base64 value.
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateSecretRequest {
    /// Base64 value.
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    pub path: String,
    /// Base64 value.
    pub value: String,
}

/// Negative counts become 0, which the service rejects as invalid.
fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn decode_value(value: &str) -> Result<Vec<u8>, ApiError> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| ApiError::BadRequest(format!("value is not valid base64: {e}")))
}

fn decode_path(encoded: &str) -> Result<String, ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| ApiError::BadRequest(format!("path is not valid base64url: {e}")))?;
    String::from_utf8(bytes).map_err(|_| ApiError::BadRequest("path is not UTF-8".into()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the process is alive, sealed or not.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — version and seal state.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        seal_state: state.keys.key_manager().state(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn create_master_key_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateMasterKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let shares = state
        .keys
        .create_master_key(count(req.total_shares), count(req.min_shares))?;
    state.record_seal_state();
    Ok((StatusCode::CREATED, Json(CreateMasterKeyResponse { shares })))
}

async fn key_status_handler(State(state): State<AppState>) -> Result<Json<KeyStatus>, ApiError> {
    Ok(Json(state.keys.get_key_status()?))
}

async fn add_share_handler(
    State(state): State<AppState>,
    Json(req): Json<AddShareRequest>,
) -> Result<Json<AddShareResponse>, ApiError> {
    let result = state.keys.add_share(&req.share);
    state.record_seal_state();

    match result {
        Ok(added) => {
            state.metrics.shares_submitted_total.inc();
            if added.unlocked {
                state.metrics.unlocks_total.inc();
            }
            Ok(Json(AddShareResponse {
                index: added.index,
                unlocked: added.unlocked,
            }))
        }
        Err(e) => {
            if matches!(e, KeyManagementError::WrongShares) {
                state.metrics.rejected_unlocks_total.inc();
                tracing::warn!("share submission produced a key that failed verification");
            }
            Err(e.into())
        }
    }
}

async fn delete_share_handler(
    Path(index): Path<i64>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let index = usize::try_from(index).map_err(|_| KeyManagementError::WrongIndex)?;
    state.keys.delete_share(index)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_secrets_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<SecretSummary>>, ApiError> {
    Ok(Json(state.secrets.list_secrets()?))
}

async fn create_secret_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateSecretRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let value = decode_value(&req.value)?;
    let summary = state.secrets.create_secret(&req.path, &value)?;
    state.metrics.secrets_created_total.inc();
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn get_secret_handler(
    Path(encoded): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SecretResponse>, ApiError> {
    let path = decode_path(&encoded)?;
    let value = state.secrets.get_secret_by_path(&path)?;
    state.metrics.secret_reads_total.inc();
    Ok(Json(SecretResponse {
        value: STANDARD.encode(value.as_slice()),
        path,
    }))
}

async fn update_secret_handler(
    Path(encoded): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<UpdateSecretRequest>,
) -> Result<Json<SecretSummary>, ApiError> {
    let path = decode_path(&encoded)?;
    let value = decode_value(&req.value)?;
    Ok(Json(state.secrets.update_secret(&path, &value)?))
}

async fn delete_secret_handler(
    Path(encoded): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let path = decode_path(&encoded)?;
    state.secrets.delete_secret(&path)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keyseal_protocol::seal::KeyManager;
    use keyseal_protocol::storage::VaultDB;
    use tower::ServiceExt;

    use crate::metrics::NodeMetrics;

    /// Builds an AppState on `db`, as a freshly started process would.
    fn app_state_on(db: &Arc<VaultDB>) -> AppState {
        let key_manager = Arc::new(KeyManager::new());
        let keys = KeyManagementService::new(Arc::clone(&key_manager), db.clone(), db.clone())
            .expect("key management service");
        let secrets = SecretsService::new(key_manager, db.clone());
        AppState {
            version: "0.1.0-test".into(),
            keys: Arc::new(keys),
            secrets: Arc::new(secrets),
            metrics: Arc::new(NodeMetrics::new()),
        }
    }

    fn test_app_state() -> (AppState, Arc<VaultDB>) {
        let db = Arc::new(VaultDB::open_temporary().expect("temp db"));
        (app_state_on(&db), db)
    }

    /// Sends a request with an optional JSON body and returns (status, body_bytes).
    async fn send(
        router: &Router,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(path);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        send(router, "GET", path, None).await
    }

    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        send(router, "POST", path, Some(body)).await
    }

    fn secret_url(path: &str) -> String {
        format!("/secrets/{}", URL_SAFE_NO_PAD.encode(path))
    }

    fn error_of(body: &[u8]) -> String {
        let err: crate::error::ErrorResponse = serde_json::from_slice(body).unwrap();
        err.error
    }

    /// Create a 3-of-5 key and return its shares.
    async fn create_key(router: &Router) -> Vec<String> {
        let (status, body) = post_json(
            router,
            "/key_management/create_master_key",
            serde_json::json!({ "total_shares": 5, "min_shares": 3 }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let resp: CreateMasterKeyResponse = serde_json::from_slice(&body).unwrap();
        resp.shares
    }

    async fn submit(router: &Router, share: &str) -> (StatusCode, Vec<u8>) {
        post_json(
            router,
            "/key_management/share",
            serde_json::json!({ "share": share }),
        )
        .await
    }

    // -- Liveness -------------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _db) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_seal_state() {
        let (state, _db) = test_app_state();
        let router = create_router(state);

        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.seal_state, SealState::Uninitialized);
        assert_eq!(resp.version, "0.1.0-test");

        create_key(&router).await;
        let (_, body) = get(&router, "/status").await;
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.seal_state, SealState::Unlocked);
    }

    // -- Key management -------------------------------------------------------

    #[tokio::test]
    async fn key_status_before_create_is_404() {
        let (state, _db) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, "/key_management/status").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(error_of(&body).contains("no master key"));
    }

    #[tokio::test]
    async fn create_validates_parameters() {
        let (state, _db) = test_app_state();
        let router = create_router(state);
        for (total, min) in [(3, 0), (-1, 1), (2, 3)] {
            let (status, _) = post_json(
                &router,
                "/key_management/create_master_key",
                serde_json::json!({ "total_shares": total, "min_shares": min }),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let (state, _db) = test_app_state();
        let router = create_router(state);
        assert_eq!(create_key(&router).await.len(), 5);

        let (status, _) = post_json(
            &router,
            "/key_management/create_master_key",
            serde_json::json!({ "total_shares": 5, "min_shares": 3 }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unseal_after_restart() {
        let (state, db) = test_app_state();
        let shares = create_key(&create_router(state)).await;

        let restarted = app_state_on(&db);
        let metrics = Arc::clone(&restarted.metrics);
        let router = create_router(restarted);

        let (_, body) = get(&router, "/key_management/status").await;
        let status: KeyStatus = serde_json::from_slice(&body).unwrap();
        assert!(status.is_locked);
        assert_eq!(status.total_shares, 5);

        for (i, share) in shares[..2].iter().enumerate() {
            let (code, body) = submit(&router, share).await;
            assert_eq!(code, StatusCode::OK);
            let added: AddShareResponse = serde_json::from_slice(&body).unwrap();
            assert_eq!(added.index, i);
            assert!(!added.unlocked);
        }

        let (code, body) = submit(&router, &shares[2]).await;
        assert_eq!(code, StatusCode::OK);
        let added: AddShareResponse = serde_json::from_slice(&body).unwrap();
        assert!(added.unlocked);

        let (code, _) = submit(&router, &shares[3]).await;
        assert_eq!(code, StatusCode::CONFLICT);

        assert_eq!(metrics.shares_submitted_total.get(), 3);
        assert_eq!(metrics.unlocks_total.get(), 1);
        assert_eq!(metrics.seal_state.get(), 2);
    }

    #[tokio::test]
    async fn foreign_shares_are_unprocessable() {
        let (state, db) = test_app_state();
        let shares = create_key(&create_router(state)).await;
        let (other, _other_db) = test_app_state();
        let foreign = create_key(&create_router(other)).await;

        let restarted = app_state_on(&db);
        let metrics = Arc::clone(&restarted.metrics);
        let router = create_router(restarted);

        submit(&router, &shares[0]).await;
        submit(&router, &shares[1]).await;
        let (code, body) = submit(&router, &foreign[2]).await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(error_of(&body).contains("do not reconstruct"));
        assert_eq!(metrics.rejected_unlocks_total.get(), 1);
        assert_eq!(metrics.seal_state.get(), 1);

        let (_, body) = get(&router, "/key_management/status").await;
        let status: KeyStatus = serde_json::from_slice(&body).unwrap();
        assert!(status.is_locked);
        assert_eq!(status.current_shares, 2);
    }

    #[tokio::test]
    async fn invalid_share_encoding_is_bad_request() {
        let (state, db) = test_app_state();
        create_key(&create_router(state)).await;
        let router = create_router(app_state_on(&db));

        let (code, _) = submit(&router, "***").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_share_by_index() {
        let (state, db) = test_app_state();
        let shares = create_key(&create_router(state)).await;
        let router = create_router(app_state_on(&db));

        submit(&router, &shares[0]).await;
        submit(&router, &shares[1]).await;

        let (code, _) = send(&router, "DELETE", "/key_management/share/0", None).await;
        assert_eq!(code, StatusCode::NO_CONTENT);

        let (code, _) = send(&router, "DELETE", "/key_management/share/1", None).await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);

        let (code, _) = send(&router, "DELETE", "/key_management/share/-1", None).await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, body) = get(&router, "/key_management/status").await;
        let status: KeyStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.current_shares, 1);
    }

    // -- Secrets --------------------------------------------------------------

    #[tokio::test]
    async fn secret_crud_round_trip() {
        let (state, _db) = test_app_state();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);
        create_key(&router).await;

        let (code, body) = post_json(
            &router,
            "/secrets",
            serde_json::json!({ "path": "/db/password", "value": STANDARD.encode("hunter2") }),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
        let summary: SecretSummary = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary.path, "/db/password");

        let (code, body) = get(&router, &secret_url("/db/password")).await;
        assert_eq!(code, StatusCode::OK);
        let secret: SecretResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(STANDARD.decode(secret.value).unwrap(), b"hunter2");

        let (code, _) = send(
            &router,
            "PUT",
            &secret_url("/db/password"),
            Some(serde_json::json!({ "value": STANDARD.encode("correct horse") })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);

        let (_, body) = get(&router, &secret_url("/db/password")).await;
        let secret: SecretResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(STANDARD.decode(secret.value).unwrap(), b"correct horse");

        let (_, body) = get(&router, "/secrets").await;
        let listed: Vec<SecretSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 1);

        let (code, _) = send(&router, "DELETE", &secret_url("/db/password"), None).await;
        assert_eq!(code, StatusCode::NO_CONTENT);
        let (code, _) = get(&router, &secret_url("/db/password")).await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        assert_eq!(metrics.secrets_created_total.get(), 1);
        assert_eq!(metrics.secret_reads_total.get(), 2);
    }

    #[tokio::test]
    async fn secrets_are_locked_while_sealed() {
        let (state, db) = test_app_state();
        let router = create_router(state);
        create_key(&router).await;
        post_json(
            &router,
            "/secrets",
            serde_json::json!({ "path": "/x", "value": STANDARD.encode("v") }),
        )
        .await;

        let sealed = create_router(app_state_on(&db));
        let (code, body) = get(&sealed, &secret_url("/x")).await;
        assert_eq!(code, StatusCode::LOCKED);
        assert!(error_of(&body).contains("locked"));

        let (code, _) = get(&sealed, "/secrets").await;
        assert_eq!(code, StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn secret_request_validation() {
        let (state, _db) = test_app_state();
        let router = create_router(state);
        create_key(&router).await;

        let (code, _) = post_json(
            &router,
            "/secrets",
            serde_json::json!({ "path": "no-slash", "value": STANDARD.encode("v") }),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = post_json(
            &router,
            "/secrets",
            serde_json::json!({ "path": "/ok", "value": "not base64!!" }),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = get(&router, "/secrets/%25%25").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = get(&router, &secret_url("internal/signing_key")).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_secret_conflicts() {
        let (state, _db) = test_app_state();
        let router = create_router(state);
        create_key(&router).await;

        let body = serde_json::json!({ "path": "/dup", "value": STANDARD.encode("v") });
        let (code, _) = post_json(&router, "/secrets", body.clone()).await;
        assert_eq!(code, StatusCode::CREATED);
        let (code, _) = post_json(&router, "/secrets", body).await;
        assert_eq!(code, StatusCode::CONFLICT);
    }
}
