pub mod admin;
pub mod cache;
pub mod executor;
pub mod model_client;
pub mod monitor;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod summary;

mod error;
mod time_serde;

pub use admin::{HealthReport, PerformanceReport, StatusReport};
pub use bi_providers::{llm::ChatRequest, retrieval::QueryParams};
pub use cache::{CacheKey, CacheStats, QueryCache};
pub use error::{Error, Result};
pub use executor::{BackgroundExecutor, SchedulerStatus};
pub use model_client::{ClientPhase, ModelClientManager, ModelClientStatus};
pub use monitor::{HealthLabel, HealthStatus, MonitorStats, PerformanceMonitor, RequestSummary};
pub use retrieval::{
	IndexSettings, QueryMode, QueryProfile, ResponseType, RetrievalManager, RetrievalOutcome,
	RetrievalStatus,
};
pub use summary::DatasetSummary;

use std::{
	future::Future,
	pin::Pin,
	sync::{Arc, Mutex},
};

use time::OffsetDateTime;

use bi_config::{Config, ModelProviderConfig, RetrievalProviderConfig};
use bi_providers::{llm, retrieval as retrieval_api};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote generation model.
pub trait ModelProvider
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		cfg: &'a ModelProviderConfig,
		request: ChatRequest<'a>,
	) -> BoxFuture<'a, Result<String>>;
}

/// Retrieval index session owned by the [`RetrievalManager`].
pub trait RetrievalIndex
where
	Self: Send + Sync,
{
	fn initialize<'a>(&'a self, settings: &'a IndexSettings) -> BoxFuture<'a, Result<()>>;

	/// Structural check only. Must not issue a query against the index.
	fn is_intact(&self) -> bool;

	fn query<'a>(&'a self, text: &'a str, params: &'a QueryParams) -> BoxFuture<'a, Result<String>>;

	/// Releases state shared between in-flight requests after each query.
	fn release_shared_state(&self) -> Result<()>;

	fn teardown<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

#[derive(Clone)]
pub struct Providers {
	pub model: Arc<dyn ModelProvider>,
	pub retrieval: Arc<dyn RetrievalIndex>,
}
impl Providers {
	pub fn http(cfg: &Config) -> Self {
		Self {
			model: Arc::new(HttpModelProvider),
			retrieval: Arc::new(HttpRetrievalIndex::new(cfg.providers.retrieval.clone())),
		}
	}
}

/// Application context constructed once at startup and shared by every request handler.
pub struct RagService {
	pub cfg: Config,
	pub executor: Arc<BackgroundExecutor>,
	pub model: Arc<ModelClientManager>,
	pub retrieval: Arc<RetrievalManager>,
	pub cache: Arc<QueryCache>,
	pub monitor: Arc<PerformanceMonitor>,
	pub summary: Arc<DatasetSummary>,
}
impl RagService {
	pub fn new(cfg: Config, providers: Providers) -> Self {
		let summary = DatasetSummary::load(cfg.orchestrator.summary_path.as_deref());

		Self::with_summary(cfg, providers, summary)
	}

	pub fn with_summary(cfg: Config, providers: Providers, summary: DatasetSummary) -> Self {
		let executor = BackgroundExecutor::new(cfg.scheduler.clone());
		let model = ModelClientManager::new(
			cfg.providers.model.clone(),
			cfg.model_client.clone(),
			providers.model,
		);
		let retrieval = RetrievalManager::new(cfg.retrieval.clone(), providers.retrieval);
		let cache = QueryCache::new(&cfg.cache);
		let monitor = PerformanceMonitor::new(cfg.monitor.clone());

		Self {
			cfg,
			executor: Arc::new(executor),
			model: Arc::new(model),
			retrieval: Arc::new(retrieval),
			cache: Arc::new(cache),
			monitor: Arc::new(monitor),
			summary: Arc::new(summary),
		}
	}
}

struct HttpModelProvider;
impl ModelProvider for HttpModelProvider {
	fn generate<'a>(
		&'a self,
		cfg: &'a ModelProviderConfig,
		request: ChatRequest<'a>,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(llm::generate(cfg, &request).await?) })
	}
}

struct IndexSession {
	settings: IndexSettings,
	opened_at: OffsetDateTime,
}

/// Index session backed by a remote retrieval service. The service owns the index data, so
/// a session is a verified connection plus the settings it was opened with.
struct HttpRetrievalIndex {
	cfg: RetrievalProviderConfig,
	session: Mutex<Option<IndexSession>>,
}
impl HttpRetrievalIndex {
	fn new(cfg: RetrievalProviderConfig) -> Self {
		Self { cfg, session: Mutex::new(None) }
	}
}
impl RetrievalIndex for HttpRetrievalIndex {
	fn initialize<'a>(&'a self, settings: &'a IndexSettings) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			retrieval_api::health(&self.cfg).await?;

			let mut session = self.session.lock().unwrap_or_else(|err| err.into_inner());

			*session =
				Some(IndexSession { settings: *settings, opened_at: OffsetDateTime::now_utc() });

			tracing::info!(
				provider_id = %self.cfg.provider_id,
				top_k = settings.top_k,
				"Retrieval service session opened."
			);

			Ok(())
		})
	}

	fn is_intact(&self) -> bool {
		let session = self.session.lock().unwrap_or_else(|err| err.into_inner());

		session.as_ref().map(|session| session.settings.top_k > 0).unwrap_or(false)
	}

	fn query<'a>(
		&'a self,
		text: &'a str,
		params: &'a QueryParams,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(retrieval_api::query(&self.cfg, text, params).await?) })
	}

	/// The remote service owns and releases its own shared state. Nothing is held locally.
	fn release_shared_state(&self) -> Result<()> {
		Ok(())
	}

	fn teardown<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let closed = self.session.lock().unwrap_or_else(|err| err.into_inner()).take();

			if let Some(session) = closed {
				let age = OffsetDateTime::now_utc() - session.opened_at;

				tracing::info!(age_secs = age.whole_seconds(), "Retrieval service session closed.");
			}

			Ok(())
		})
	}
}
