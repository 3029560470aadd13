//! REST API endpoints.
//!
//! Ingestion takes a JSON object per request and stores it under the
//! client id in the path. Query endpoints return tables of records,
//! filtered by an optional `range` token (`all`, `<n>h`, `<n>d`, `<n>w`);
//! an omitted or malformed token falls back to three days.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Payload
//! problems (bad client id, unparseable timestamp) return 400, unknown
//! clients return 404, and storage failures return 500.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::info;

use loam_types::SampleTable;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/api/health", get(health))
        // Ingestion
        .route("/data/{client_id}", post(receive_data))
        // Query endpoints
        .route("/api/clients", get(list_clients))
        .route("/api/clients/{client_id}/data", get(get_client_data))
        .route("/api/data", get(get_all_data))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Error message when storage is not answering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check endpoint. Storage must answer a trivial query for the
/// service to report healthy.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.storage.list_clients() {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                timestamp: OffsetDateTime::now_utc(),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                version: env!("CARGO_PKG_VERSION"),
                timestamp: OffsetDateTime::now_utc(),
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// Receive one measurement payload from a client.
async fn receive_data(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let Value::Object(payload) = payload else {
        return Err(AppError::BadRequest(
            "payload must be a JSON object".to_string(),
        ));
    };

    state.storage.store(&client_id, payload)?;
    info!("Received data from {client_id}");

    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// Query parameters for time-ranged reads.
#[derive(Debug, Deserialize)]
struct RangeQuery {
    range: Option<String>,
}

impl RangeQuery {
    fn token(&self) -> &str {
        self.range.as_deref().unwrap_or("3d")
    }
}

/// List every client with stored data.
async fn list_clients(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.storage.list_clients()?))
}

/// Table of records for one client.
async fn get_client_data(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<SampleTable>, AppError> {
    let table = state
        .storage
        .retrieve(&client_id, params.token())?
        .ok_or_else(|| AppError::NotFound(format!("No data for client: {client_id}")))?;
    Ok(Json(table))
}

/// Tables for every client with records in range, keyed by client id.
async fn get_all_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<BTreeMap<String, SampleTable>>, AppError> {
    Ok(Json(state.storage.retrieve_all(params.token())?))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Storage(loam_store::Error),
}

impl From<loam_store::Error> for AppError {
    fn from(e: loam_store::Error) -> Self {
        match e {
            loam_store::Error::InvalidClientId(_) | loam_store::Error::Record(_) => {
                AppError::BadRequest(e.to_string())
            }
            _ => AppError::Storage(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Storage(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
    use loam_store::{FileStoreConfig, StorageConfig, open};

    fn create_test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&StorageConfig::Csv(FileStoreConfig {
            data_dir: dir.path().to_path_buf(),
        }));
        storage.initialize().unwrap();
        (AppState::new(storage, Config::default()), dir)
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_health_unhealthy_after_close() {
        let (state, _dir) = create_test_state();
        state.storage.close().unwrap();
        let app = router().with_state(state);

        let response = app.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let json = response_json(response).await;
        assert_eq!(json["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_receive_then_query() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/data/pi-garden",
                serde_json::json!({ "temperature": 23.5, "humidity": 65.2 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["status"], "success");

        let response = app
            .clone()
            .oneshot(get("/api/clients"))
            .await
            .unwrap();
        assert_eq!(response_json(response).await, serde_json::json!(["pi-garden"]));

        let response = app
            .oneshot(get("/api/clients/pi-garden/data?range=1d"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["columns"], serde_json::json!(["humidity", "temperature"]));
        assert_eq!(json["rows"][0]["values"][1], 23.5);
    }

    #[tokio::test]
    async fn test_get_data_unknown_client_is_404() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(get("/api/clients/ghost/data"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = response_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_receive_rejects_non_object_payload() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(post_json("/data/pi-garden", serde_json::json!([1, 2, 3])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_receive_rejects_bad_client_id() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(post_json(
                "/data/.hidden",
                serde_json::json!({ "temperature": 1.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = response_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("client id"));
    }

    #[tokio::test]
    async fn test_receive_rejects_bad_timestamp() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(post_json(
                "/data/pi-garden",
                serde_json::json!({ "timestamp": "yesterday", "temperature": 1.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_all_data_grouped_by_client() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        for (client, body) in [
            ("garden", serde_json::json!({ "temperature": 20.0 })),
            ("cellar", serde_json::json!({ "humidity": 80.0 })),
        ] {
            let response = app
                .clone()
                .oneshot(post_json(&format!("/data/{client}"), body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(get("/api/data?range=all")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert!(json["garden"]["columns"].as_array().is_some());
        assert!(json["cellar"]["columns"].as_array().is_some());
    }

    #[tokio::test]
    async fn test_list_clients_empty() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app.oneshot(get("/api/clients")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_malformed_range_falls_back() {
        let (state, _dir) = create_test_state();
        let app = router().with_state(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/data/pi-garden",
                serde_json::json!({ "temperature": 1.0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // A record stored just now is inside the three-day fallback.
        let response = app
            .oneshot(get("/api/clients/pi-garden/data?range=bogus"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
