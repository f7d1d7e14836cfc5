use std::{sync::Arc, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::{sync::Mutex as AsyncMutex, time as tokio_time};

use crate::{Error, QueryParams, Result, RetrievalIndex};
use bi_config::{Retrieval, TokenBudget};

pub const TIMED_OUT_NOTICE: &str =
	"The query is taking too long to process. Please try a more specific question.";
pub const CONTENDED_NOTICE: &str =
	"I'm processing multiple requests simultaneously. Please try your question again in a moment.";
pub const RECOVERED_NOTICE: &str = "Knowledge base temporarily unavailable. Please try again.";

/// Named parameter profile trading retrieval breadth and verbosity against latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
	Fast,
	Enhanced,
	Mix,
}
impl QueryMode {
	/// Unrecognized modes use the default `mix` profile.
	pub fn parse(raw: &str) -> Self {
		match raw.trim().to_ascii_lowercase().as_str() {
			"fast" => Self::Fast,
			"enhanced" => Self::Enhanced,
			_ => Self::Mix,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Fast => "fast",
			Self::Enhanced => "enhanced",
			Self::Mix => "mix",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseType {
	SingleParagraph,
	MultipleParagraphs,
}
impl ResponseType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::SingleParagraph => "Single Paragraph",
			Self::MultipleParagraphs => "Multiple Paragraphs",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryProfile {
	/// Retrieval strategy inside the index.
	pub strategy: &'static str,
	pub top_k: u32,
	pub response_type: ResponseType,
	pub token_budget: Option<TokenBudget>,
}
impl QueryProfile {
	pub fn for_mode(mode: QueryMode, cfg: &Retrieval) -> Self {
		match mode {
			QueryMode::Fast => Self {
				strategy: "local",
				top_k: cfg.top_k.min(cfg.fast_top_k_cap),
				response_type: ResponseType::SingleParagraph,
				token_budget: Some(cfg.fast_tokens),
			},
			QueryMode::Enhanced => Self {
				strategy: "mix",
				top_k: cfg.top_k,
				response_type: ResponseType::MultipleParagraphs,
				token_budget: Some(cfg.enhanced_tokens),
			},
			QueryMode::Mix => Self {
				strategy: "hybrid",
				top_k: cfg.top_k,
				response_type: ResponseType::MultipleParagraphs,
				token_budget: None,
			},
		}
	}

	pub fn to_params(&self) -> QueryParams {
		QueryParams {
			mode: self.strategy.to_string(),
			top_k: self.top_k,
			response_type: self.response_type.as_str().to_string(),
			max_token_for_text_unit: self.token_budget.map(|budget| budget.text_unit),
			max_token_for_global_context: self.token_budget.map(|budget| budget.global_context),
			max_token_for_local_context: self.token_budget.map(|budget| budget.local_context),
		}
	}
}

/// Concurrency limits and breadth an index session is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IndexSettings {
	pub max_parallel_insert: u32,
	pub max_async: u32,
	pub top_k: u32,
}

/// Result of one retrieval attempt. Only `Passages` carries retrieved text; the other
/// variants are degraded outcomes with a user-facing notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrievalOutcome {
	Passages(String),
	TimedOut,
	/// The index's shared namespace data was busy. The index was left untouched.
	Contended,
	/// The query failed and the index was reset successfully.
	Recovered,
}
impl RetrievalOutcome {
	pub fn passages(&self) -> Option<&str> {
		match self {
			Self::Passages(text) => Some(text),
			_ => None,
		}
	}

	pub fn notice(&self) -> Option<&'static str> {
		match self {
			Self::Passages(_) => None,
			Self::TimedOut => Some(TIMED_OUT_NOTICE),
			Self::Contended => Some(CONTENDED_NOTICE),
			Self::Recovered => Some(RECOVERED_NOTICE),
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrievalStatus {
	pub initialized: bool,
	#[serde(with = "crate::time_serde::option")]
	pub last_health_check: Option<OffsetDateTime>,
	pub settings: IndexSettings,
	pub health_check_interval_secs: u64,
	pub query_timeout_secs: u64,
	pub resets: u64,
	pub conflicts: u64,
	pub timeouts: u64,
}

#[derive(Default)]
struct SessionState {
	initialized: bool,
	last_health_check: Option<OffsetDateTime>,
	resets: u64,
	conflicts: u64,
	timeouts: u64,
}

/// Owns the retrieval index session shared by every request.
pub struct RetrievalManager {
	cfg: Retrieval,
	index: Arc<dyn RetrievalIndex>,
	state: std::sync::Mutex<SessionState>,
	init_lock: AsyncMutex<()>,
}
impl RetrievalManager {
	pub fn new(cfg: Retrieval, index: Arc<dyn RetrievalIndex>) -> Self {
		Self {
			cfg,
			index,
			state: std::sync::Mutex::new(SessionState::default()),
			init_lock: AsyncMutex::new(()),
		}
	}

	pub fn settings(&self) -> IndexSettings {
		IndexSettings {
			max_parallel_insert: self.cfg.max_parallel_insert,
			max_async: self.cfg.max_async,
			top_k: self.cfg.top_k,
		}
	}

	/// Timeouts and namespace contention come back as degraded outcomes. Any other query
	/// failure resets the index once; only a failed reset is returned as an error.
	pub async fn query(&self, text: &str, mode: QueryMode) -> Result<RetrievalOutcome> {
		self.ensure_ready().await?;

		let params = QueryProfile::for_mode(mode, &self.cfg).to_params();
		let timeout = Duration::from_secs(self.cfg.query_timeout_secs);

		tracing::debug!(mode = mode.as_str(), top_k = params.top_k, "Executing retrieval query.");

		let outcome = match tokio_time::timeout(timeout, self.index.query(text, &params)).await {
			Ok(Ok(passages)) => Ok(RetrievalOutcome::Passages(passages)),
			Ok(Err(err @ Error::NamespaceConflict { .. })) => {
				tracing::warn!(
					mode = mode.as_str(),
					error = %err,
					"Retrieval namespace is busy. Leaving the index untouched."
				);

				self.with_state(|state| state.conflicts += 1);

				Ok(RetrievalOutcome::Contended)
			},
			Ok(Err(err)) => {
				tracing::error!(mode = mode.as_str(), error = %err, "Retrieval query failed.");

				self.reset().await.map(|()| RetrievalOutcome::Recovered)
			},
			Err(_) => {
				tracing::warn!(
					mode = mode.as_str(),
					timeout_secs = timeout.as_secs(),
					"Retrieval query timed out."
				);

				self.with_state(|state| state.timeouts += 1);

				Ok(RetrievalOutcome::TimedOut)
			},
		};

		if let Err(err) = self.index.release_shared_state() {
			tracing::warn!(error = %err, "Failed to release shared retrieval state.");
		}

		outcome
	}

	/// Tears the index session down and opens a fresh one.
	pub async fn reset(&self) -> Result<()> {
		let _guard = self.init_lock.lock().await;

		tracing::info!("Resetting retrieval index.");

		self.with_state(|state| {
			state.initialized = false;
			state.last_health_check = None;
			state.resets += 1;
		});

		if let Err(err) = self.index.release_shared_state() {
			tracing::warn!(error = %err, "Failed to release shared retrieval state.");
		}
		if let Err(err) = self.index.teardown().await {
			tracing::warn!(error = %err, "Retrieval index teardown failed.");
		}

		self.initialize().await?;

		tracing::info!("Retrieval index reset succeeded.");

		Ok(())
	}

	pub fn status(&self) -> RetrievalStatus {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		RetrievalStatus {
			initialized: state.initialized,
			last_health_check: state.last_health_check,
			settings: self.settings(),
			health_check_interval_secs: self.cfg.health_check_interval_secs,
			query_timeout_secs: self.cfg.query_timeout_secs,
			resets: state.resets,
			conflicts: state.conflicts,
			timeouts: state.timeouts,
		}
	}

	async fn ensure_ready(&self) -> Result<()> {
		if !self.needs_check(OffsetDateTime::now_utc()) {
			return Ok(());
		}

		let _guard = self.init_lock.lock().await;

		if !self.needs_check(OffsetDateTime::now_utc()) {
			return Ok(());
		}

		let initialized = self.with_state(|state| state.initialized);

		if initialized {
			if self.index.is_intact() {
				self.with_state(|state| state.last_health_check = Some(OffsetDateTime::now_utc()));

				tracing::debug!("Retrieval index health check passed.");

				return Ok(());
			}

			tracing::warn!("Retrieval index failed its health check. Reinitializing.");
		}

		self.initialize().await
	}

	fn needs_check(&self, now: OffsetDateTime) -> bool {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		if !state.initialized {
			return true;
		}

		match state.last_health_check {
			Some(checked_at) =>
				(now - checked_at).whole_seconds() >= self.cfg.health_check_interval_secs as i64,
			None => true,
		}
	}

	async fn initialize(&self) -> Result<()> {
		let settings = self.settings();

		match self.index.initialize(&settings).await {
			Ok(()) => {
				self.with_state(|state| {
					state.initialized = true;
					state.last_health_check = Some(OffsetDateTime::now_utc());
				});

				tracing::info!(
					top_k = settings.top_k,
					max_async = settings.max_async,
					"Retrieval index initialized."
				);

				Ok(())
			},
			Err(err) => {
				self.with_state(|state| state.initialized = false);

				tracing::error!(error = %err, "Failed to initialize retrieval index.");

				Err(Error::Initialization {
					message: format!("Retrieval index initialization failed: {err}"),
				})
			},
		}
	}

	fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		f(&mut state)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_modes_fall_back_to_mix() {
		assert_eq!(QueryMode::parse("fast"), QueryMode::Fast);
		assert_eq!(QueryMode::parse(" Enhanced "), QueryMode::Enhanced);
		assert_eq!(QueryMode::parse("mix"), QueryMode::Mix);
		assert_eq!(QueryMode::parse("turbo"), QueryMode::Mix);
		assert_eq!(QueryMode::parse(""), QueryMode::Mix);
	}

	#[test]
	fn fast_profile_is_narrow_and_single_paragraph() {
		let cfg = Retrieval::default();
		let params = QueryProfile::for_mode(QueryMode::Fast, &cfg).to_params();

		assert_eq!(params.mode, "local");
		assert_eq!(params.top_k, 40);
		assert_eq!(params.response_type, "Single Paragraph");
		assert_eq!(params.max_token_for_text_unit, Some(2_000));
		assert_eq!(params.max_token_for_local_context, Some(3_000));
	}

	#[test]
	fn fast_profile_never_widens_a_small_top_k() {
		let cfg = Retrieval { top_k: 10, ..Default::default() };

		assert_eq!(QueryProfile::for_mode(QueryMode::Fast, &cfg).top_k, 10);
	}

	#[test]
	fn enhanced_and_mix_profiles_are_wide() {
		let cfg = Retrieval::default();
		let enhanced = QueryProfile::for_mode(QueryMode::Enhanced, &cfg).to_params();
		let mix = QueryProfile::for_mode(QueryMode::Mix, &cfg).to_params();

		assert_eq!(enhanced.mode, "mix");
		assert_eq!(enhanced.top_k, 80);
		assert_eq!(enhanced.response_type, "Multiple Paragraphs");
		assert_eq!(enhanced.max_token_for_global_context, Some(6_000));
		assert_eq!(mix.mode, "hybrid");
		assert_eq!(mix.top_k, 80);
		assert_eq!(mix.max_token_for_text_unit, None);
	}

	#[test]
	fn degraded_outcomes_carry_notices_not_passages() {
		assert_eq!(RetrievalOutcome::Passages("p".to_string()).notice(), None);
		assert_eq!(RetrievalOutcome::Contended.passages(), None);
		assert_eq!(RetrievalOutcome::TimedOut.notice(), Some(TIMED_OUT_NOTICE));
		assert_eq!(RetrievalOutcome::Recovered.notice(), Some(RECOVERED_NOTICE));
	}
}
