use std::{env, fs, process, sync::Arc};

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::Value;
use tower::util::ServiceExt;

use bi_api::{routes, state::AppState};
use bi_rag::orchestrator::INVALID_QUERY;
use bi_testkit::{StubIndex, StubModel};

const PASSAGE: &str = "Revenue grew 12% in Q3";

fn test_state() -> (AppState, Arc<StubModel>, Arc<StubIndex>) {
	let model = StubModel::echo();
	let index = StubIndex::passage(PASSAGE);
	let service =
		bi_testkit::stub_service(bi_testkit::test_config(), model.clone(), index.clone());

	(AppState::from_service(service), model, index)
}

async fn call(
	app: Router,
	method: &str,
	uri: &str,
	payload: Option<Value>,
) -> (StatusCode, Value) {
	let mut request = Request::builder().method(method).uri(uri);
	let body = match payload {
		Some(payload) => {
			request = request.header("content-type", "application/json");

			Body::from(payload.to_string())
		},
		None => Body::empty(),
	};
	let response = app
		.oneshot(request.body(body).expect("Failed to build request."))
		.await
		.expect("Failed to call the router.");
	let status = response.status();
	let bytes = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json = if bytes.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&bytes).expect("Failed to parse response.")
	};

	(status, json)
}

#[tokio::test]
async fn health_follows_the_scheduler() {
	let (state, _, _) = test_state();
	let payload = serde_json::json!({ "query": "revenue" });

	call(routes::router(state.clone()), "POST", "/api/chat", Some(payload)).await;

	let (status, json) = call(routes::router(state.clone()), "GET", "/api/health", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(json["status"], "healthy");
	assert_eq!(json["rag_system"], "connected");

	state.service.shutdown();

	let (_, json) = call(routes::router(state), "GET", "/api/health", None).await;

	assert_eq!(json["rag_system"], "disconnected");
}

#[tokio::test]
async fn chat_defaults_to_enhanced_mode() {
	let (state, model, index) = test_state();
	let payload = serde_json::json!({ "query": "How did revenue change?" });
	let (status, json) =
		call(routes::router(state.clone()), "POST", "/api/chat", Some(payload)).await;

	assert_eq!(status, StatusCode::OK);
	assert!(json["response"].as_str().is_some_and(|text| text.contains(PASSAGE)));
	assert_eq!(model.generation_calls(), 1);
	assert_eq!(index.received_params()[0].mode, "mix");
	assert_eq!(index.received_params()[0].response_type, "Multiple Paragraphs");

	state.service.shutdown();
}

#[tokio::test]
async fn chat_treats_non_string_query_as_empty() {
	let (state, model, _) = test_state();

	for payload in [
		serde_json::json!({ "query": 42, "mode": "fast" }),
		serde_json::json!({ "query": null }),
		serde_json::json!({}),
	] {
		let (status, json) =
			call(routes::router(state.clone()), "POST", "/api/chat", Some(payload)).await;

		assert_eq!(status, StatusCode::OK);
		assert_eq!(json["response"], INVALID_QUERY);
	}

	assert_eq!(model.generation_calls(), 0);

	state.service.shutdown();
}

#[tokio::test]
async fn performance_reports_health_and_components() {
	let (state, _, _) = test_state();
	let payload = serde_json::json!({ "query": "revenue", "mode": "fast" });

	call(routes::router(state.clone()), "POST", "/api/chat", Some(payload)).await;

	let (status, json) =
		call(routes::router(state.clone()), "GET", "/api/performance", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(json["health"]["status"], "excellent");
	assert_eq!(json["performance"]["total_requests"], 1);
	assert_eq!(json["status"]["cache"]["entries"], 1);
	assert_eq!(json["status"]["scheduler"]["thread_name"], "bi-rag-scheduler");

	state.service.shutdown();
}

#[tokio::test]
async fn admin_routes_stay_off_the_public_router() {
	let (state, _, _) = test_state();
	let (status, _) =
		call(routes::router(state.clone()), "POST", "/api/cache/clear", None).await;

	assert_eq!(status, StatusCode::NOT_FOUND);

	state.service.shutdown();
}

#[tokio::test]
async fn cache_clear_also_resets_metrics() {
	let (state, model, _) = test_state();
	let payload = serde_json::json!({ "query": "revenue", "mode": "fast" });

	call(routes::router(state.clone()), "POST", "/api/chat", Some(payload.clone())).await;

	let (status, json) =
		call(routes::admin_router(state.clone()), "POST", "/api/cache/clear", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(json["success"], true);
	assert!(state.service.cache.is_empty());
	assert_eq!(state.service.monitor.current_stats().total_requests, 0);

	call(routes::router(state.clone()), "POST", "/api/chat", Some(payload)).await;

	assert_eq!(model.generation_calls(), 2);

	state.service.shutdown();
}

#[tokio::test]
async fn failed_model_reset_is_reported() {
	let (state, model, _) = test_state();

	model.set_probe_fails(true);

	let (status, json) =
		call(routes::admin_router(state.clone()), "POST", "/api/model/reset", None).await;

	assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
	assert_eq!(json["error_code"], "initialization");

	model.set_probe_fails(false);

	let (status, _) =
		call(routes::admin_router(state.clone()), "POST", "/api/model/reset", None).await;

	assert_eq!(status, StatusCode::OK);

	state.service.shutdown();
}

#[tokio::test]
async fn retrieval_reset_reopens_the_index() {
	let (state, _, index) = test_state();
	let (status, json) =
		call(routes::admin_router(state.clone()), "POST", "/api/rag/reset", None).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(json["success"], true);
	assert_eq!(index.teardowns(), 1);
	assert_eq!(index.initializations(), 1);

	state.service.shutdown();
}

#[tokio::test]
async fn metrics_export_writes_the_requested_file() {
	let (state, _, _) = test_state();
	let path = env::temp_dir().join(format!("bi_api_metrics_{}.json", process::id()));
	let payload = serde_json::json!({ "path": path });
	let (status, json) =
		call(routes::admin_router(state.clone()), "POST", "/api/metrics/export", Some(payload))
			.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(json["path"], path.to_string_lossy().as_ref());

	let exported: Value = serde_json::from_str(
		&fs::read_to_string(&path).expect("Failed to read exported metrics."),
	)
	.expect("Failed to parse exported metrics.");

	assert_eq!(exported["total_requests"], 0);

	let _ = fs::remove_file(&path);

	state.service.shutdown();
}
