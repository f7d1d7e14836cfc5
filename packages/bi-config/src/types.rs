use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub security: Security,
	pub providers: Providers,
	#[serde(default)]
	pub scheduler: Scheduler,
	#[serde(default)]
	pub model_client: ModelClient,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub orchestrator: Orchestrator,
	#[serde(default)]
	pub monitor: Monitor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Security {
	pub bind_localhost_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub model: ModelProviderConfig,
	pub retrieval: RetrievalProviderConfig,
}

/// Remote generation model reachable through an OpenAI-compatible chat completions API.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	#[serde(default = "default_temperature")]
	pub temperature: f32,
	#[serde(default = "default_max_output_tokens")]
	pub max_output_tokens: u32,
	#[serde(default = "default_top_p")]
	pub top_p: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// Retrieval service exposing a LightRAG-style HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	/// Optional. Some deployments run the retrieval service without authentication.
	pub api_key: Option<String>,
	pub query_path: String,
	pub health_path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scheduler {
	pub submit_timeout_secs: u64,
	pub startup_timeout_secs: u64,
	pub shutdown_timeout_secs: u64,
}
impl Default for Scheduler {
	fn default() -> Self {
		Self { submit_timeout_secs: 300, startup_timeout_secs: 10, shutdown_timeout_secs: 5 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelClient {
	pub max_retries: u32,
	pub call_timeout_secs: u64,
	pub freshness_secs: u64,
	/// Attempt `n` (zero based) waits `backoff_base_ms * 2^n` before the next attempt.
	pub backoff_base_ms: u64,
	pub rate_limit_calls: u32,
	pub rate_limit_period_secs: u64,
}
impl Default for ModelClient {
	fn default() -> Self {
		Self {
			max_retries: 3,
			call_timeout_secs: 30,
			freshness_secs: 300,
			backoff_base_ms: 1_000,
			rate_limit_calls: 30,
			rate_limit_period_secs: 60,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub query_timeout_secs: u64,
	pub health_check_interval_secs: u64,
	pub top_k: u32,
	pub fast_top_k_cap: u32,
	pub max_parallel_insert: u32,
	pub max_async: u32,
	pub enhanced_tokens: TokenBudget,
	pub fast_tokens: TokenBudget,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			query_timeout_secs: 120,
			health_check_interval_secs: 300,
			top_k: 80,
			fast_top_k_cap: 40,
			max_parallel_insert: 2,
			max_async: 8,
			enhanced_tokens: TokenBudget {
				text_unit: 5_000,
				global_context: 6_000,
				local_context: 6_000,
			},
			fast_tokens: TokenBudget {
				text_unit: 2_000,
				global_context: 3_000,
				local_context: 3_000,
			},
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TokenBudget {
	pub text_unit: u32,
	pub global_context: u32,
	pub local_context: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	pub ttl_secs: u64,
	pub capacity: usize,
}
impl Default for Cache {
	fn default() -> Self {
		Self { enabled: true, ttl_secs: 3_600, capacity: 100 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Orchestrator {
	pub max_query_chars: usize,
	/// Optional. Pre-computed dataset summary injected as baseline context.
	pub summary_path: Option<PathBuf>,
	pub fallback_enabled: bool,
	pub query_enhancement: bool,
}
impl Default for Orchestrator {
	fn default() -> Self {
		Self {
			max_query_chars: 2_000,
			summary_path: None,
			fallback_enabled: true,
			query_enhancement: false,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Monitor {
	pub response_buffer: usize,
	pub recent_buffer: usize,
	pub recent_window_secs: u64,
	pub slow_request_secs: f64,
	pub error_rate_threshold: f64,
}
impl Default for Monitor {
	fn default() -> Self {
		Self {
			response_buffer: 1_000,
			recent_buffer: 300,
			recent_window_secs: 300,
			slow_request_secs: 30.0,
			error_rate_threshold: 0.1,
		}
	}
}

fn default_temperature() -> f32 {
	0.2
}

fn default_max_output_tokens() -> u32 {
	8_192
}

fn default_top_p() -> f32 {
	0.8
}
