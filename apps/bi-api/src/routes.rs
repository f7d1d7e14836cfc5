use std::path::PathBuf;

use axum::{
	Json, Router,
	extract::State,
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bi_rag::{PerformanceReport, QueryMode};

use crate::state::AppState;

const SERVICE_NAME: &str = "bi-rag-api";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/api/chat", post(chat))
		.route("/api/health", get(health))
		.route("/api/performance", get(performance))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/api/cache/clear", post(clear_cache))
		.route("/api/metrics/reset", post(reset_metrics))
		.route("/api/metrics/export", post(export_metrics))
		.route("/api/rag/reset", post(reset_retrieval))
		.route("/api/model/reset", post(reset_model_client))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
	/// Anything other than a JSON string is answered as an empty question.
	#[serde(default)]
	pub query: Value,
	#[serde(default)]
	pub mode: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
	pub response: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: &'static str,
	pub service: &'static str,
	pub rag_system: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
	pub success: bool,
	pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
	#[serde(default)]
	pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
	pub path: PathBuf,
}

async fn chat(
	State(state): State<AppState>,
	Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
	let query = payload.query.as_str().unwrap_or_default().to_string();
	let mode = payload
		.mode
		.as_ref()
		.and_then(Value::as_str)
		.unwrap_or(QueryMode::Enhanced.as_str())
		.to_string();
	let service = state.service.clone();
	let response = tokio::task::spawn_blocking(move || service.answer(&query, &mode)).await?;

	Ok(Json(ChatResponse { response }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
	let rag_system =
		if state.service.health().scheduler_alive { "connected" } else { "disconnected" };

	Json(HealthResponse { status: "healthy", service: SERVICE_NAME, rag_system })
}

async fn performance(State(state): State<AppState>) -> Json<PerformanceReport> {
	Json(state.service.performance())
}

async fn clear_cache(State(state): State<AppState>) -> Json<AckResponse> {
	state.service.clear_cache();
	state.service.reset_metrics();

	Json(AckResponse { success: true, message: "Cache cleared.".to_string() })
}

async fn reset_metrics(State(state): State<AppState>) -> Json<AckResponse> {
	state.service.reset_metrics();

	Json(AckResponse { success: true, message: "Metrics reset.".to_string() })
}

async fn export_metrics(
	State(state): State<AppState>,
	payload: Option<Json<ExportRequest>>,
) -> Result<Json<ExportResponse>, ApiError> {
	let target = payload.and_then(|Json(body)| body.path);
	let service = state.service.clone();
	let path =
		tokio::task::spawn_blocking(move || service.export_metrics(target.as_deref())).await??;

	Ok(Json(ExportResponse { path }))
}

async fn reset_retrieval(State(state): State<AppState>) -> Result<Json<AckResponse>, ApiError> {
	let service = state.service.clone();

	tokio::task::spawn_blocking(move || service.reset_retrieval()).await??;

	Ok(Json(AckResponse { success: true, message: "Retrieval index reset.".to_string() }))
}

async fn reset_model_client(
	State(state): State<AppState>,
) -> Result<Json<AckResponse>, ApiError> {
	let service = state.service.clone();

	tokio::task::spawn_blocking(move || service.reset_model_client()).await??;

	Ok(Json(AckResponse { success: true, message: "Model client reset.".to_string() }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}
impl From<bi_rag::Error> for ApiError {
	fn from(err: bi_rag::Error) -> Self {
		let status = match &err {
			bi_rag::Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
			bi_rag::Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
			bi_rag::Error::NamespaceConflict { .. } => StatusCode::CONFLICT,
			bi_rag::Error::Provider { .. }
			| bi_rag::Error::Initialization { .. }
			| bi_rag::Error::IllegalState { .. }
			| bi_rag::Error::OperationDropped => StatusCode::SERVICE_UNAVAILABLE,
			bi_rag::Error::Io(_) | bi_rag::Error::SerdeJson(_) => StatusCode::INTERNAL_SERVER_ERROR,
		};

		Self::new(status, err.kind(), err.to_string())
	}
}
impl From<tokio::task::JoinError> for ApiError {
	fn from(err: tokio::task::JoinError) -> Self {
		tracing::error!(error = %err, "Blocking task failed.");

		Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "Request handler failed.")
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
