use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// Query parameters understood by the retrieval service's `/query` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryParams {
	/// Retrieval strategy inside the index: `local`, `hybrid` or `mix`.
	pub mode: String,
	pub top_k: u32,
	pub response_type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_token_for_text_unit: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_token_for_global_context: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_token_for_local_context: Option<u32>,
}

pub async fn query(
	cfg: &bi_config::RetrievalProviderConfig,
	text: &str,
	params: &QueryParams,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.query_path);
	let mut body = serde_json::to_value(params)?;

	if let Some(map) = body.as_object_mut() {
		map.insert("query".to_string(), Value::String(text.to_string()));
	}

	let res = client
		.post(&url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let status = res.status();

	if is_busy_status(status) {
		let message = res.text().await.unwrap_or_default();

		return Err(Error::Conflict { message: format!("{status}: {}", message.trim()) });
	}

	let json: Value = res.error_for_status()?.json().await?;

	parse_query_response(json)
}

pub async fn health(cfg: &bi_config::RetrievalProviderConfig) -> Result<()> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.health_path);

	client
		.get(&url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.send()
		.await?
		.error_for_status()?;

	Ok(())
}

/// 409 and 423 are how the retrieval service reports contention on its shared namespace data.
pub fn is_busy_status(status: StatusCode) -> bool {
	matches!(status, StatusCode::CONFLICT | StatusCode::LOCKED)
}

fn parse_query_response(json: Value) -> Result<String> {
	if let Some(text) = json.get("response").and_then(|v| v.as_str()) {
		return Ok(text.to_string());
	}
	if let Some(text) = json.as_str() {
		return Ok(text.to_string());
	}
	if json.get("response").map(Value::is_null).unwrap_or(false) {
		return Ok(String::new());
	}

	Err(Error::InvalidResponse {
		message: "Retrieval response is missing the response field.".to_string(),
	})
}
