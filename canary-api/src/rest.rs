use crate::config_resolver::ConfigResolver;
use crate::errors::Error;
use crate::model::{
    ConfigQuery, DeviceConfig, DeviceRegistration, RegisterRequest, ResetFlagRequest,
    TelemetryRecord, TelemetrySubmission, UpdateRequest, UploadByMacRequest,
};
use crate::registry::DeviceRegistry;
use crate::telemetry::TelemetryService;
use crate::validate;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub registry: DeviceRegistry,
    pub telemetry: TelemetryService,
    pub config: ConfigResolver,
}

impl AppState {
    pub fn new(registry: DeviceRegistry, telemetry: TelemetryService) -> Self {
        Self {
            config: ConfigResolver::new(registry.clone()),
            registry,
            telemetry,
        }
    }
}

pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/canaryPerformanceFromPi", post(ingest_performance))
        .route("/api/canaryConfig", get(get_config))
        .route("/api/canaryConfig/resetFlag", post(reset_flag))
        .route("/api/registerCanary", post(register_device))
        .route(
            "/api/canaryPerformance/latestPerDevice",
            get(latest_per_device),
        )
        .route("/api/canaryPerformance/allByMac/:mac", get(all_by_mac))
        .route("/api/canaryRegister", get(list_devices))
        .route(
            "/api/canaryRegister/:id",
            put(update_device).delete(delete_device),
        )
        .route("/api/canaryRegister/approve/:id", put(approve_device))
        .route(
            "/api/canaryRegister/uploadByMac",
            post(upload_by_mac).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ingest_performance(
    State(state): State<AppState>,
    payload: Result<Json<TelemetrySubmission>, JsonRejection>,
) -> Result<&'static str, AppError> {
    let Json(submission) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    info!("Received telemetry from {}", submission.mac_address);

    validate::validate_submission(&submission)?;
    state.telemetry.ingest(submission).await?;
    Ok("Data received")
}

async fn get_config(
    State(state): State<AppState>,
    Query(params): Query<ConfigQuery>,
) -> Result<Json<DeviceConfig>, AppError> {
    let mac_address = validate::required(params.mac_address.as_deref()).ok_or_else(|| {
        Error::Validation("MAC address is required in the query string".to_string())
    })?;
    info!("Config requested by {}", mac_address);

    Ok(Json(state.config.resolve(&mac_address).await?))
}

async fn reset_flag(
    State(state): State<AppState>,
    payload: Result<Json<ResetFlagRequest>, JsonRejection>,
) -> Result<&'static str, AppError> {
    let Json(request) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let (mac_address, value) = validate::reset_flag(&request)?;

    state.registry.reset_update_flag(&mac_address, value).await?;
    Ok("update_script reset successfully")
}

async fn register_device(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let new = validate::registration(&request)?;
    info!(
        "Received device registration: {} ({})",
        new.device_name, new.mac_address
    );

    let id = state.registry.register(new).await?;
    Ok(Json(json!({
        "message": "Device registered successfully",
        "id": id,
    })))
}

async fn latest_per_device(
    State(state): State<AppState>,
) -> Result<Json<Vec<TelemetryRecord>>, AppError> {
    Ok(Json(state.telemetry.latest_per_device().await?))
}

async fn all_by_mac(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<Json<Vec<TelemetryRecord>>, AppError> {
    Ok(Json(state.telemetry.all_by_mac(&mac).await?))
}

async fn list_devices(
    State(state): State<AppState>,
) -> Result<Json<Vec<DeviceRegistration>>, AppError> {
    Ok(Json(state.registry.list().await?))
}

async fn update_device(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Path(id) = id.map_err(|e| Error::Validation(e.body_text()))?;
    let Json(request) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let fields = validate::update(&request)?;

    state.registry.update(id, fields).await?;
    Ok(Json(json!({ "message": "Device updated successfully" })))
}

async fn approve_device(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let Path(id) = id.map_err(|e| Error::Validation(e.body_text()))?;

    let auth_key = state.registry.approve(id).await?;
    Ok(Json(json!({
        "message": "Device approved",
        "auth_key": auth_key,
    })))
}

async fn delete_device(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let Path(id) = id.map_err(|e| Error::Validation(e.body_text()))?;

    state.registry.delete(id).await?;
    Ok(Json(json!({ "message": "Device deleted successfully" })))
}

async fn upload_by_mac(
    State(state): State<AppState>,
    payload: Result<Json<UploadByMacRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let (fields, artifact) = validate::upload(&request)?;
    let mac_address = fields.mac_address.clone();

    let path = state
        .registry
        .update_by_mac(&mac_address, fields, artifact)
        .await?;

    Ok(Json(match path {
        Some(path) => json!({
            "message": "Device updated + zip file saved",
            "filePath": path.display().to_string(),
        }),
        None => json!({ "message": "Device updated (no zip file)" }),
    }))
}

pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) | Error::Conflict(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.0.is_internal() {
            error!("API error: {}", self.0);
            return (status, Json(json!({ "error": "Internal server error" }))).into_response();
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::memory::MemoryStore;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let registry = DeviceRegistry::new(store.clone(), ArtifactStore::new(std::env::temp_dir()));
        let telemetry = TelemetryService::new(store, registry.clone());
        create_router(AppState::new(registry, telemetry), 1024 * 1024)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    #[tokio::test]
    async fn test_register_validation_and_conflict() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/registerCanary",
            Some(json!({ "device_name": "pi-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation error: Both device_name and mac_address are required.");

        let device = json!({ "device_name": "pi-1", "mac_address": "AA:BB:CC:DD:EE:FF" });
        let (status, body) = send(&app, Method::POST, "/api/registerCanary", Some(device.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["id"].as_str().is_some());

        let (status, _) = send(&app, Method::POST, "/api/registerCanary", Some(device)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_requires_mac() {
        let app = app();
        let (status, _) = send(&app, Method::GET, "/api/canaryConfig", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Method::GET,
            "/api/canaryConfig?mac_address=AA:BB:CC:DD:EE:FF",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_defaults_for_pending_device() {
        let app = app();
        send(
            &app,
            Method::POST,
            "/api/registerCanary",
            Some(json!({
                "device_name": "pi-1",
                "mac_address": "AA:BB:CC:DD:EE:FF",
                "destination": ["https://example.com"]
            })),
        )
        .await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/canaryConfig?mac_address=AA:BB:CC:DD:EE:FF",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "destinations": ["https://example.com"],
                "interval_minutes": 5,
                "authenticator_key": null,
                "update_script": 0
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_submission_is_bad_request() {
        let app = app();
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/canaryPerformanceFromPi",
            Some(json!({ "mac_address": "AA:BB:CC:DD:EE:FF" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let app = app();
        let uri = format!("/api/canaryRegister/approve/{}", Uuid::new_v4());
        let (status, _) = send(&app, Method::PUT, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::PUT, "/api/canaryRegister/approve/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/canaryRegister/{}", Uuid::new_v4());
        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Device deleted successfully");
    }

    #[tokio::test]
    async fn test_reset_flag_requires_mac() {
        let app = app();
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/canaryConfig/resetFlag",
            Some(json!({ "update_script": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/canaryConfig/resetFlag",
            Some(json!({ "mac_address": "AA:BB:CC:DD:EE:FF", "update_script": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("update_script reset successfully".to_string()));
    }

    #[tokio::test]
    async fn test_reset_flag_accepts_bool_and_string_values() {
        let app = app();
        let mac = "AA:BB:CC:DD:EE:FF";
        send(
            &app,
            Method::POST,
            "/api/registerCanary",
            Some(json!({ "device_name": "pi-1", "mac_address": mac })),
        )
        .await;

        let config_uri = format!("/api/canaryConfig?mac_address={}", mac);
        for (value, expected) in [
            (json!(true), 1),
            (json!(false), 0),
            (json!("1"), 1),
            (json!("0"), 0),
        ] {
            let (status, _) = send(
                &app,
                Method::POST,
                "/api/canaryConfig/resetFlag",
                Some(json!({ "mac_address": mac, "update_script": value })),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "update_script {}", value);

            let (_, config) = send(&app, Method::GET, &config_uri, None).await;
            assert_eq!(config["update_script"], expected, "update_script {}", value);
        }
    }

    #[tokio::test]
    async fn test_internal_errors_are_generic() {
        let response = AppError(Error::Database(sqlx::Error::PoolTimedOut)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "Internal server error" }));
    }
}
