use crate::logging::today_log_path;
use crate::state::{FeedEvent, HubState};
use crate::writer::WriterError;
use axum::{
    body::Bytes,
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hookwatch_analysis::Analyzer;
use hookwatch_core::{classify::parse_failure, samples::sample_payloads};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

const RESOURCE_HEADER: &str = "sentry-hook-resource";
const DEFAULT_LOG_COUNT: usize = 100;
const FEED_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route("/api/messages", get(list_messages).delete(delete_messages))
        .route("/api/messages/all", delete(clear_messages))
        .route("/api/messages/info", get(messages_info))
        .route("/api/messages/download", get(download_messages))
        .route("/api/analyze", post(analyze))
        .route("/api/config/model/status", get(model_status))
        .route("/api/config/model", post(update_model))
        .route("/api/test-messages", post(test_messages))
        .route("/logs", get(recent_logs))
        .route("/logs/download", get(download_logs))
        .route("/ws", get(ws_handler))
        .with_state(hub)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<WriterError> for ApiError {
    fn from(err: WriterError) -> Self {
        let status = match err {
            WriterError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            WriterError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(event = "store_error", error = %err);
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"status": "error", "message": self.message})),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "message": "hookwatch hub is running"}))
}

/// Bodies that are not JSON are still stored, as parse failures.
async fn webhook(
    State(hub): State<Arc<HubState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let hint = headers
        .get(RESOURCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    debug!(
        event = "webhook_received",
        resource = ?hint,
        bytes = body.len(),
        body = %String::from_utf8_lossy(&body)
    );

    let record = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => hub.ingest(hint.as_deref(), &payload).await?,
        Err(err) => {
            warn!(event = "webhook_invalid_json", error = %err);
            let raw = Value::String(String::from_utf8_lossy(&body).into_owned());
            let record = parse_failure(format!("invalid JSON body: {err}"), &raw, Utc::now());
            hub.store_new(record).await?
        }
    };
    Ok(Json(json!({
        "status": "success",
        "id": record.id,
        "kind": record.kind(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

async fn list_messages(
    State(hub): State<Arc<HubState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let records = hub.store.list(query.limit).await?;
    Ok(Json(json!(records)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<String>,
}

async fn delete_messages(
    State(hub): State<Arc<HubState>>,
    request: Result<Json<DeleteRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = request?;
    let ids = request
        .ids
        .into_iter()
        .filter(|id| !id.trim().is_empty())
        .collect::<BTreeSet<_>>();
    if ids.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "ids must not be empty"));
    }
    let deleted = hub.store.delete(ids.clone()).await?;
    info!(event = "messages_deleted", requested = ids.len(), deleted = deleted);
    hub.publish(FeedEvent::MessagesUpdated {
        deleted_ids: ids.into_iter().collect(),
    });
    Ok(Json(json!({"status": "success", "deletedCount": deleted})))
}

async fn clear_messages(State(hub): State<Arc<HubState>>) -> ApiResult<Json<Value>> {
    let deleted = hub.store.clear().await?;
    info!(event = "messages_cleared", deleted = deleted);
    hub.publish(FeedEvent::ClearMessages);
    Ok(Json(json!({"status": "success", "deletedCount": deleted})))
}

async fn messages_info(State(hub): State<Arc<HubState>>) -> ApiResult<Json<Value>> {
    let info = hub.store.info().await?;
    Ok(Json(json!({"status": "success", "info": info})))
}

async fn download_messages(State(hub): State<Arc<HubState>>) -> ApiResult<Response> {
    let bytes = hub.store.snapshot().await?;
    Ok(attachment("application/json", "messages.json", bytes))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub message_id: String,
    #[serde(default)]
    pub message_content: Option<String>,
}

/// Runs on the blocking pool under the configured timeout. A timed-out
/// analysis leaves the stored record untouched.
async fn analyze(
    State(hub): State<Arc<HubState>>,
    request: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = request?;
    let record = hub
        .store
        .get(&request.message_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("message {} not found", request.message_id),
            )
        })?;

    let analyzer = Analyzer::from_settings(&*hub.model.read().await);
    info!(event = "analysis_start", id = %record.id, remote = analyzer.is_remote());
    let context = request.message_content;
    let job = tokio::task::spawn_blocking(move || {
        analyzer.analyze_at(&record, context.as_deref(), Utc::now())
    });
    let diagnostic = match tokio::time::timeout(hub.config.analysis_timeout, job).await {
        Ok(Ok(diagnostic)) => diagnostic,
        Ok(Err(err)) => {
            error!(event = "analysis_task_failed", error = %err);
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("analysis task failed: {err}"),
            ));
        }
        Err(_) => {
            warn!(event = "analysis_timeout", id = %request.message_id);
            return Err(ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                "analysis timed out",
            ));
        }
    };

    let is_attached = hub
        .attach_diagnostic(&request.message_id, diagnostic.clone())
        .await?
        .is_some();
    Ok(Json(json!({
        "status": "success",
        "analysis": diagnostic,
        "attached": is_attached,
    })))
}

async fn model_status(State(hub): State<Arc<HubState>>) -> Json<Value> {
    let settings = hub.model.read().await;
    let configured = settings.is_configured();
    let message = if configured {
        "model API key is configured"
    } else {
        "model API key is not configured; local analysis is used"
    };
    Json(json!({
        "status": "success",
        "isConfigured": configured,
        "model": settings.model,
        "message": message,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelKeyRequest {
    pub api_key: String,
}

async fn update_model(
    State(hub): State<Arc<HubState>>,
    request: Result<Json<ModelKeyRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = request?;
    let key = request.api_key.trim();
    if key.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "apiKey must not be empty"));
    }
    let mut settings = hub.model.write().await;
    settings.api_key = Some(key.to_string());
    let configured = settings.is_configured();
    info!(event = "model_key_updated", configured = configured);
    Ok(Json(json!({
        "status": "success",
        "isConfigured": configured,
        "message": "model API key updated",
    })))
}

async fn test_messages(State(hub): State<Arc<HubState>>) -> ApiResult<Json<Value>> {
    let mut ids = Vec::new();
    for sample in sample_payloads(Utc::now()) {
        let record = hub.ingest(Some(sample.resource), &sample.payload).await?;
        ids.push(record.id);
    }
    info!(event = "test_messages_ingested", count = ids.len());
    Ok(Json(json!({"status": "success", "ids": ids})))
}

#[derive(Debug, Default, Deserialize)]
pub struct CountQuery {
    pub count: Option<usize>,
}

async fn recent_logs(
    State(hub): State<Arc<HubState>>,
    Query(query): Query<CountQuery>,
) -> Response {
    let lines = hub.log_ring.tail(query.count.unwrap_or(DEFAULT_LOG_COUNT));
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        lines.join("\n"),
    )
        .into_response()
}

async fn download_logs(State(hub): State<Arc<HubState>>) -> ApiResult<Response> {
    let path = today_log_path(&hub.config.log_dir);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hookwatch.log".to_string());
    let read_path = path.clone();
    let bytes = tokio::task::spawn_blocking(move || std::fs::read(read_path))
        .await
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map_err(|err| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("log file {} unavailable: {err}", path.display()),
            )
        })?;
    Ok(attachment("text/plain; charset=utf-8", &file_name, bytes))
}

fn attachment(content_type: &str, file_name: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_feed_socket(hub, socket))
}

async fn handle_feed_socket(hub: Arc<HubState>, socket: WebSocket) {
    let conn_id = hub.next_conn_id();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut feed = hub.subscribe();
    info!(event = "feed_client_connected", conn_id = %conn_id);

    let writer_conn = conn_id.clone();
    let write_task = tokio::spawn(async move {
        loop {
            let event = match feed.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(event = "feed_lagged", conn_id = %writer_conn, skipped = skipped);
                    continue;
                }
                Err(RecvError::Closed) => return,
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(event = "feed_encode_failed", error = %err);
                    continue;
                }
            };
            let send = ws_sender.send(Message::Text(text));
            match tokio::time::timeout(FEED_WRITE_TIMEOUT, send).await {
                Ok(Ok(())) => {}
                _ => {
                    warn!(event = "feed_write_failed", conn_id = %writer_conn);
                    return;
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(event = "feed_read_error", conn_id = %conn_id, error = %err);
                break;
            }
        }
    }
    write_task.abort();
    info!(event = "feed_client_disconnected", conn_id = %conn_id);
}
