use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// One chat-completion call: a user prompt plus an optional system instruction.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
	pub prompt: &'a str,
	pub system_prompt: Option<&'a str>,
	pub temperature: f32,
}

pub async fn generate(
	cfg: &bi_config::ModelProviderConfig,
	request: &ChatRequest<'_>,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": request.temperature,
		"top_p": cfg.top_p,
		"max_tokens": cfg.max_output_tokens,
		"messages": build_messages(request),
	});
	let res = client
		.post(&url)
		.headers(crate::auth_headers(Some(&cfg.api_key), &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_chat_response(json)
}

fn build_messages(request: &ChatRequest<'_>) -> Vec<Value> {
	let mut messages = Vec::with_capacity(2);

	if let Some(system_prompt) = request.system_prompt
		&& !system_prompt.trim().is_empty()
	{
		messages.push(serde_json::json!({ "role": "system", "content": system_prompt }));
	}

	messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

	messages
}

fn parse_chat_response(json: Value) -> Result<String> {
	let choice = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing choices.".to_string(),
		})?;

	// A filtered or truncated completion comes back with a null content field.
	let content = choice
		.get("message")
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.unwrap_or_default();

	Ok(content.to_string())
}
