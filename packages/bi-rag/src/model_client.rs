use std::{collections::VecDeque, sync::Arc, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
	sync::Mutex as AsyncMutex,
	time::{self as tokio_time, Instant},
};

use crate::{ChatRequest, Error, ModelProvider, Result};
use bi_config::{ModelClient, ModelProviderConfig};

/// Minimal prompt used to verify that the remote model answers at all.
pub const PROBE_PROMPT: &str = "Test";
/// Every user-safe failure text produced by the model client starts with this marker, so
/// callers can tell a degraded answer from a real one.
pub const APOLOGY_PREFIX: &str = "I apologize";
pub const EMPTY_RESPONSE: &str =
	"I apologize, but I couldn't generate a response. Please try again.";
pub const TECHNICAL_DIFFICULTIES: &str =
	"I apologize, but I'm experiencing technical difficulties. Please try again.";
pub const SERVICE_UNAVAILABLE: &str =
	"I apologize, but the service is temporarily unavailable. Please try again later.";

pub fn is_apology(text: &str) -> bool {
	text.starts_with(APOLOGY_PREFIX)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientPhase {
	Uninitialized,
	Initializing,
	Ready,
	Retesting,
	Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModelClientStatus {
	pub phase: ClientPhase,
	pub configured: bool,
	#[serde(with = "crate::time_serde::option")]
	pub last_tested_at: Option<OffsetDateTime>,
	pub provider_id: String,
	pub model: String,
	pub max_retries: u32,
	pub call_timeout_secs: u64,
	pub resets: u64,
}

struct ClientState {
	phase: ClientPhase,
	configured: bool,
	last_tested_at: Option<OffsetDateTime>,
	resets: u64,
}

/// Sliding-window limiter on model calls.
struct RateLimiter {
	max_calls: usize,
	period: Duration,
	calls: AsyncMutex<VecDeque<Instant>>,
}
impl RateLimiter {
	fn new(max_calls: u32, period: Duration) -> Self {
		Self {
			max_calls: max_calls as usize,
			period,
			calls: AsyncMutex::new(VecDeque::with_capacity(max_calls as usize)),
		}
	}

	async fn acquire(&self) {
		loop {
			let wait = {
				let mut calls = self.calls.lock().await;
				let now = Instant::now();

				while calls
					.front()
					.map(|at| now.duration_since(*at) >= self.period)
					.unwrap_or(false)
				{
					calls.pop_front();
				}

				if calls.len() < self.max_calls {
					calls.push_back(now);

					return;
				}

				calls
					.front()
					.map(|oldest| self.period.saturating_sub(now.duration_since(*oldest)))
					.unwrap_or_default()
			};

			tracing::debug!(wait_ms = wait.as_millis() as u64, "Model call rate limit reached.");

			tokio_time::sleep(wait).await;
		}
	}
}

/// Owns the remote model connection: lazy initialization, periodic re-test, retries with
/// exponential backoff, and reset on unrecoverable failure.
pub struct ModelClientManager {
	provider_cfg: ModelProviderConfig,
	cfg: ModelClient,
	provider: Arc<dyn ModelProvider>,
	state: std::sync::Mutex<ClientState>,
	init_lock: AsyncMutex<()>,
	limiter: RateLimiter,
}
impl ModelClientManager {
	pub fn new(
		provider_cfg: ModelProviderConfig,
		cfg: ModelClient,
		provider: Arc<dyn ModelProvider>,
	) -> Self {
		let limiter =
			RateLimiter::new(cfg.rate_limit_calls, Duration::from_secs(cfg.rate_limit_period_secs));

		Self {
			provider_cfg,
			cfg,
			provider,
			state: std::sync::Mutex::new(ClientState {
				phase: ClientPhase::Uninitialized,
				configured: false,
				last_tested_at: None,
				resets: 0,
			}),
			init_lock: AsyncMutex::new(()),
			limiter,
		}
	}

	/// Never fails because of the model itself: once the client is ready, exhausted retries
	/// turn into an apology text. Only a failed initialization is returned as an error.
	pub async fn generate(
		&self,
		prompt: &str,
		system_prompt: Option<&str>,
		temperature: f32,
	) -> Result<String> {
		self.ensure_ready().await?;

		let request = ChatRequest { prompt, system_prompt, temperature };
		let attempts = self.cfg.max_retries;

		for attempt in 0..attempts {
			tracing::debug!(attempt = attempt + 1, attempts, "Generating model response.");

			match self.call(request).await {
				Ok(text) if text.trim().is_empty() => {
					tracing::warn!(attempt = attempt + 1, "Model returned an empty response.");

					return Ok(EMPTY_RESPONSE.to_string());
				},
				Ok(text) => return Ok(text),
				Err(err @ Error::Timeout { .. }) => {
					tracing::error!(attempt = attempt + 1, error = %err, "Model call timed out.");
				},
				Err(err) => {
					tracing::error!(attempt = attempt + 1, error = %err, "Model call failed.");
				},
			}

			if attempt + 1 < attempts {
				tokio_time::sleep(self.backoff(attempt)).await;
			}
		}

		self.set_phase(ClientPhase::Failed);

		match self.reset().await {
			Ok(()) => Ok(TECHNICAL_DIFFICULTIES.to_string()),
			Err(err) => {
				tracing::error!(error = %err, "Model client recovery failed.");

				Ok(SERVICE_UNAVAILABLE.to_string())
			},
		}
	}

	/// Clears the tested state and re-initializes, probe call included.
	pub async fn reset(&self) -> Result<()> {
		let _guard = self.init_lock.lock().await;

		{
			let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

			state.phase = ClientPhase::Uninitialized;
			state.configured = false;
			state.last_tested_at = None;
			state.resets += 1;
		}

		tracing::info!(model = %self.provider_cfg.model, "Resetting model client.");

		self.initialize().await?;

		tracing::info!(model = %self.provider_cfg.model, "Model client reset succeeded.");

		Ok(())
	}

	pub fn status(&self) -> ModelClientStatus {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		ModelClientStatus {
			phase: state.phase,
			configured: state.configured,
			last_tested_at: state.last_tested_at,
			provider_id: self.provider_cfg.provider_id.clone(),
			model: self.provider_cfg.model.clone(),
			max_retries: self.cfg.max_retries,
			call_timeout_secs: self.cfg.call_timeout_secs,
			resets: state.resets,
		}
	}

	async fn ensure_ready(&self) -> Result<()> {
		if !self.needs_refresh(OffsetDateTime::now_utc()) {
			return Ok(());
		}

		let _guard = self.init_lock.lock().await;

		// Another caller may have finished initializing while this one waited.
		if !self.needs_refresh(OffsetDateTime::now_utc()) {
			return Ok(());
		}

		self.initialize().await
	}

	fn needs_refresh(&self, now: OffsetDateTime) -> bool {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		if state.phase != ClientPhase::Ready || !state.configured {
			return true;
		}

		match state.last_tested_at {
			Some(tested_at) => (now - tested_at).whole_seconds() >= self.cfg.freshness_secs as i64,
			None => true,
		}
	}

	async fn initialize(&self) -> Result<()> {
		let retest = {
			let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
			let retest = state.configured;

			state.phase = if retest { ClientPhase::Retesting } else { ClientPhase::Initializing };

			retest
		};

		tracing::info!(retest, model = %self.provider_cfg.model, "Testing model client.");

		let probe = self.probe().await;
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		match probe {
			Ok(()) => {
				state.phase = ClientPhase::Ready;
				state.configured = true;
				state.last_tested_at = Some(OffsetDateTime::now_utc());

				tracing::info!(model = %self.provider_cfg.model, "Model client is ready.");

				Ok(())
			},
			Err(err) => {
				state.phase = ClientPhase::Failed;
				state.configured = false;

				tracing::error!(error = %err, "Failed to initialize model client.");

				Err(Error::Initialization { message: format!("Model client probe failed: {err}") })
			},
		}
	}

	async fn probe(&self) -> Result<()> {
		let request = ChatRequest { prompt: PROBE_PROMPT, system_prompt: None, temperature: 0.0 };
		let text = self.with_timeout(request).await?;

		if text.trim().is_empty() {
			tracing::warn!("Model client probe returned an empty response.");
		}

		Ok(())
	}

	async fn call(&self, request: ChatRequest<'_>) -> Result<String> {
		self.limiter.acquire().await;

		self.with_timeout(request).await
	}

	async fn with_timeout(&self, request: ChatRequest<'_>) -> Result<String> {
		let timeout = Duration::from_secs(self.cfg.call_timeout_secs);

		tokio_time::timeout(timeout, self.provider.generate(&self.provider_cfg, request))
			.await
			.map_err(|_| Error::Timeout { operation: "model call", timeout })?
	}

	fn backoff(&self, attempt: u32) -> Duration {
		let factor = 1_u64 << attempt.min(16);

		Duration::from_millis(self.cfg.backoff_base_ms.saturating_mul(factor))
	}

	fn set_phase(&self, phase: ClientPhase) {
		self.state.lock().unwrap_or_else(|err| err.into_inner()).phase = phase;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::BoxFuture;

	struct CountingModel {
		calls: AtomicUsize,
	}
	impl ModelProvider for CountingModel {
		fn generate<'a>(
			&'a self,
			_: &'a ModelProviderConfig,
			request: ChatRequest<'a>,
		) -> BoxFuture<'a, Result<String>> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Box::pin(async move { Ok(format!("echo: {}", request.prompt)) })
		}
	}

	fn provider_cfg() -> ModelProviderConfig {
		ModelProviderConfig {
			provider_id: "stub".to_string(),
			api_base: "http://127.0.0.1:9".to_string(),
			api_key: "key".to_string(),
			path: "/v1/chat/completions".to_string(),
			model: "stub-model".to_string(),
			temperature: 0.2,
			max_output_tokens: 256,
			top_p: 0.8,
			timeout_ms: 1_000,
			default_headers: Default::default(),
		}
	}

	#[test]
	fn apology_marker_covers_every_failure_text() {
		for text in [EMPTY_RESPONSE, TECHNICAL_DIFFICULTIES, SERVICE_UNAVAILABLE] {
			assert!(is_apology(text), "{text}");
		}

		assert!(!is_apology("Revenue grew 12% in Q3."));
	}

	#[test]
	fn backoff_doubles_per_attempt() {
		let model = Arc::new(CountingModel { calls: AtomicUsize::new(0) });
		let manager = ModelClientManager::new(
			provider_cfg(),
			ModelClient { backoff_base_ms: 1_000, ..Default::default() },
			model,
		);

		assert_eq!(manager.backoff(0), Duration::from_secs(1));
		assert_eq!(manager.backoff(1), Duration::from_secs(2));
		assert_eq!(manager.backoff(2), Duration::from_secs(4));
	}

	#[tokio::test]
	async fn concurrent_first_calls_initialize_once() {
		let model = Arc::new(CountingModel { calls: AtomicUsize::new(0) });
		let manager = Arc::new(ModelClientManager::new(
			provider_cfg(),
			ModelClient::default(),
			model.clone(),
		));
		let (left, right) = tokio::join!(
			manager.generate("first", None, 0.2),
			manager.generate("second", None, 0.2)
		);

		assert_eq!(left.expect("Generation failed."), "echo: first");
		assert_eq!(right.expect("Generation failed."), "echo: second");
		// One probe plus two generations.
		assert_eq!(model.calls.load(Ordering::SeqCst), 3);
		assert_eq!(manager.status().phase, ClientPhase::Ready);
	}

	#[tokio::test]
	async fn rate_limiter_waits_for_the_oldest_call_to_age_out() {
		let limiter = RateLimiter::new(2, Duration::from_millis(200));
		let started = Instant::now();

		limiter.acquire().await;
		limiter.acquire().await;

		assert!(started.elapsed() < Duration::from_millis(150));

		limiter.acquire().await;

		assert!(started.elapsed() >= Duration::from_millis(190));
	}
}
