mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Config, ModelClient, ModelProviderConfig, Monitor, Orchestrator, Providers, Retrieval,
	RetrievalProviderConfig, Scheduler, Security, Service, TokenBudget,
};

use std::{fs, path::Path};

/// One year. Longer TTLs push expiry timestamps toward the calendar limit.
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;
/// One day.
pub const MAX_SLOW_REQUEST_SECS: f64 = 86_400.0;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in [
		("service.http_bind", &cfg.service.http_bind),
		("service.admin_bind", &cfg.service.admin_bind),
		("providers.model.api_base", &cfg.providers.model.api_base),
		("providers.model.api_key", &cfg.providers.model.api_key),
		("providers.model.model", &cfg.providers.model.model),
		("providers.retrieval.api_base", &cfg.providers.retrieval.api_base),
		("providers.retrieval.query_path", &cfg.providers.retrieval.query_path),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	for (label, value) in [
		("providers.model.timeout_ms", cfg.providers.model.timeout_ms),
		("providers.retrieval.timeout_ms", cfg.providers.retrieval.timeout_ms),
		("scheduler.submit_timeout_secs", cfg.scheduler.submit_timeout_secs),
		("scheduler.startup_timeout_secs", cfg.scheduler.startup_timeout_secs),
		("model_client.call_timeout_secs", cfg.model_client.call_timeout_secs),
		("model_client.rate_limit_period_secs", cfg.model_client.rate_limit_period_secs),
		("retrieval.query_timeout_secs", cfg.retrieval.query_timeout_secs),
		("cache.ttl_secs", cfg.cache.ttl_secs),
		("monitor.recent_window_secs", cfg.monitor.recent_window_secs),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.model_client.max_retries == 0 {
		return Err(Error::Validation {
			message: "model_client.max_retries must be greater than zero.".to_string(),
		});
	}
	if cfg.model_client.rate_limit_calls == 0 {
		return Err(Error::Validation {
			message: "model_client.rate_limit_calls must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.top_k == 0 || cfg.retrieval.fast_top_k_cap == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k and retrieval.fast_top_k_cap must be greater than zero."
				.to_string(),
		});
	}
	if cfg.cache.capacity == 0 {
		return Err(Error::Validation {
			message: "cache.capacity must be greater than zero.".to_string(),
		});
	}
	if cfg.cache.ttl_secs > MAX_CACHE_TTL_SECS {
		return Err(Error::Validation {
			message: format!("cache.ttl_secs must be at most {MAX_CACHE_TTL_SECS}."),
		});
	}
	if cfg.orchestrator.max_query_chars == 0 {
		return Err(Error::Validation {
			message: "orchestrator.max_query_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.monitor.response_buffer == 0 || cfg.monitor.recent_buffer == 0 {
		return Err(Error::Validation {
			message: "monitor.response_buffer and monitor.recent_buffer must be greater than zero."
				.to_string(),
		});
	}
	if !cfg.monitor.slow_request_secs.is_finite()
		|| cfg.monitor.slow_request_secs <= 0.0
		|| cfg.monitor.slow_request_secs > MAX_SLOW_REQUEST_SECS
	{
		return Err(Error::Validation {
			message: format!(
				"monitor.slow_request_secs must be greater than zero and at most \
				 {MAX_SLOW_REQUEST_SECS}."
			),
		});
	}
	if !cfg.monitor.error_rate_threshold.is_finite()
		|| !(0.0..=1.0).contains(&cfg.monitor.error_rate_threshold)
	{
		return Err(Error::Validation {
			message: "monitor.error_rate_threshold must be in the range 0.0-1.0.".to_string(),
		});
	}

	let temperature = cfg.providers.model.temperature;

	if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
		return Err(Error::Validation {
			message: "providers.model.temperature must be in the range 0.0-2.0.".to_string(),
		});
	}

	let top_p = cfg.providers.model.top_p;

	if !top_p.is_finite() || !(0.0..=1.0).contains(&top_p) {
		return Err(Error::Validation {
			message: "providers.model.top_p must be in the range 0.0-1.0.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.providers.retrieval.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false)
	{
		cfg.providers.retrieval.api_key = None;
	}
	if cfg
		.orchestrator
		.summary_path
		.as_deref()
		.map(|path| path.as_os_str().is_empty())
		.unwrap_or(false)
	{
		cfg.orchestrator.summary_path = None;
	}

	for base in [&mut cfg.providers.model.api_base, &mut cfg.providers.retrieval.api_base] {
		let trimmed = base.trim_end_matches('/').to_string();

		*base = trimmed;
	}
}
