use std::sync::Arc;

use uuid::Uuid;

use crate::{
	CacheKey, DatasetSummary, ModelClientManager, QueryMode, RagService, Result, RetrievalManager,
	RetrievalOutcome, model_client, prompt,
};

pub const ENDPOINT: &str = "chat_answer";
pub const INVALID_QUERY: &str = "Please provide a valid question.";
/// Returned on pipeline failure when keyword fallbacks are disabled.
pub const GENERIC_FAILURE: &str =
	"I'm sorry, I'm experiencing technical difficulties. Please try again.";

const TRUNCATION_MARKER: &str = "...";
const ENHANCER_TEMPERATURE: f32 = 0.2;

impl RagService {
	/// Answers a question for the web layer. Always returns text: every failure below this
	/// point ends in a cached, degraded, or canned answer.
	pub fn answer(&self, query: &str, mode: &str) -> String {
		let request_id = request_id();
		let started = self.monitor.record_start(&request_id, ENDPOINT);
		let mode = QueryMode::parse(mode);
		let Some(query_text) = preprocess(query, self.cfg.orchestrator.max_query_chars) else {
			tracing::debug!(request_id = %request_id, "Rejected an empty query.");

			self.monitor.record_end(&request_id, ENDPOINT, started, true, None);

			return INVALID_QUERY.to_string();
		};
		let key = CacheKey::new(&query_text, mode);

		if self.cache.is_enabled() {
			if let Some(cached) = self.cache.get(&key).filter(|cached| !cached.is_empty()) {
				tracing::info!(
					request_id = %request_id,
					mode = mode.as_str(),
					"Answer served from cache."
				);

				self.monitor.record_cache_hit();
				self.monitor.record_end(&request_id, ENDPOINT, started, true, None);

				return cached;
			}

			self.monitor.record_cache_miss();
		}

		let pipeline = Pipeline {
			request_id: request_id.clone(),
			model: self.model.clone(),
			retrieval: self.retrieval.clone(),
			summary: self.summary.clone(),
			temperature: self.cfg.providers.model.temperature,
			enhance_query: self.cfg.orchestrator.query_enhancement,
		};

		match self.executor.submit_and_wait(pipeline.run(query_text, mode)) {
			Ok(answer) => {
				if !answer.is_empty() && !model_client::is_apology(&answer) {
					self.cache.insert(key, answer.clone());
				}

				self.monitor.record_end(&request_id, ENDPOINT, started, true, None);

				answer
			},
			Err(err) => {
				tracing::error!(
					request_id = %request_id,
					mode = mode.as_str(),
					error = %err,
					"Answer pipeline failed. Returning a fallback answer."
				);

				self.monitor.record_end(&request_id, ENDPOINT, started, false, Some(err.kind()));

				if self.cfg.orchestrator.fallback_enabled {
					prompt::fallback_response(query).to_string()
				} else {
					GENERIC_FAILURE.to_string()
				}
			},
		}
	}
}

/// Everything the answer pipeline needs, owned so it can run on the background scheduler.
struct Pipeline {
	request_id: String,
	model: Arc<ModelClientManager>,
	retrieval: Arc<RetrievalManager>,
	summary: Arc<DatasetSummary>,
	temperature: f32,
	enhance_query: bool,
}
impl Pipeline {
	async fn run(self, query: String, mode: QueryMode) -> Result<String> {
		let retrieval_query =
			if self.enhance_query { self.enhanced_query(&query).await } else { query.clone() };
		let passages = match self.retrieval.query(&retrieval_query, mode).await {
			Ok(RetrievalOutcome::Passages(text)) => Some(text),
			Ok(outcome) => {
				tracing::info!(
					request_id = %self.request_id,
					notice = outcome.notice().unwrap_or_default(),
					"Retrieval degraded. Answering from the summary only."
				);

				None
			},
			Err(err) => {
				tracing::error!(
					request_id = %self.request_id,
					error = %err,
					"Retrieval failed. Answering from the summary only."
				);

				None
			},
		};
		let context = prompt::build_context(&self.summary, passages.as_deref());
		let user_prompt = prompt::user_prompt(&query, &context);
		let system_prompt = prompt::system_prompt(mode);

		self.model.generate(&user_prompt, Some(&system_prompt), self.temperature).await
	}

	/// Rewrites the question for retrieval. Any failure keeps the original question.
	async fn enhanced_query(&self, query: &str) -> String {
		let (enhancer_prompt, system_prompt) = prompt::enhancer_prompts(query);

		match self.model.generate(&enhancer_prompt, Some(system_prompt), ENHANCER_TEMPERATURE).await
		{
			Ok(text) if !text.trim().is_empty() && !model_client::is_apology(&text) => {
				tracing::debug!(request_id = %self.request_id, "Query enhanced for retrieval.");

				text.trim().to_string()
			},
			Ok(_) => query.to_string(),
			Err(err) => {
				tracing::warn!(
					request_id = %self.request_id,
					error = %err,
					"Query enhancement failed. Using the original question."
				);

				query.to_string()
			},
		}
	}
}

/// Trims the query and caps it at `max_chars` characters plus a truncation marker. Blank input
/// yields `None`.
pub fn preprocess(raw: &str, max_chars: usize) -> Option<String> {
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return None;
	}

	match trimmed.char_indices().nth(max_chars) {
		Some((cut, _)) => Some(format!("{}{TRUNCATION_MARKER}", &trimmed[..cut])),
		None => Some(trimmed.to_string()),
	}
}

fn request_id() -> String {
	let mut id = Uuid::new_v4().simple().to_string();

	id.truncate(8);

	id
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn blank_queries_are_rejected() {
		assert_eq!(preprocess("", 10), None);
		assert_eq!(preprocess(" \n\t ", 10), None);
	}

	#[test]
	fn long_queries_are_truncated_with_marker() {
		assert_eq!(preprocess("  abcdef  ", 4), Some("abcd...".to_string()));
		assert_eq!(preprocess("abcd", 4), Some("abcd".to_string()));
		assert_eq!(preprocess("éééééé", 3), Some("ééé...".to_string()));
	}

	#[test]
	fn request_ids_are_short_hex() {
		let id = request_id();

		assert_eq!(id.len(), 8);
		assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
	}
}
