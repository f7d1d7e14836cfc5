//! Stub collaborators and a fast test configuration for integration tests.

use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use bi_config::{
	Cache, Config, ModelClient, ModelProviderConfig, Monitor, Orchestrator, Providers, Retrieval,
	RetrievalProviderConfig, Scheduler, Security, Service,
};
use bi_rag::{
	BoxFuture, ChatRequest, DatasetSummary, Error, IndexSettings, ModelProvider, QueryParams,
	RagService, Result, RetrievalIndex, model_client::PROBE_PROMPT,
};

const HANG: Duration = Duration::from_secs(3_600);

/// Configuration with one-second call timeouts and a one-millisecond backoff base.
pub fn test_config() -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "debug".to_string(),
		},
		security: Security { bind_localhost_only: true },
		providers: Providers {
			model: ModelProviderConfig {
				provider_id: "stub-model".to_string(),
				api_base: "http://127.0.0.1:9".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/chat/completions".to_string(),
				model: "stub".to_string(),
				temperature: 0.2,
				max_output_tokens: 1_024,
				top_p: 0.8,
				timeout_ms: 1_000,
				default_headers: Default::default(),
			},
			retrieval: RetrievalProviderConfig {
				provider_id: "stub-index".to_string(),
				api_base: "http://127.0.0.1:9".to_string(),
				api_key: None,
				query_path: "/query".to_string(),
				health_path: "/health".to_string(),
				timeout_ms: 1_000,
				default_headers: Default::default(),
			},
		},
		scheduler: Scheduler {
			submit_timeout_secs: 30,
			startup_timeout_secs: 5,
			shutdown_timeout_secs: 2,
		},
		model_client: ModelClient {
			max_retries: 3,
			call_timeout_secs: 1,
			freshness_secs: 300,
			backoff_base_ms: 1,
			rate_limit_calls: 1_000,
			rate_limit_period_secs: 60,
		},
		retrieval: Retrieval { query_timeout_secs: 1, ..Default::default() },
		cache: Cache::default(),
		orchestrator: Orchestrator::default(),
		monitor: Monitor::default(),
	}
}

pub fn summary() -> DatasetSummary {
	DatasetSummary::from_value(serde_json::json!({
		"total_revenue": 1_250_000,
		"customers": 42,
		"top_category": "Education",
	}))
}

/// Builds a service over the stubs, with an empty dataset summary.
pub fn stub_service(cfg: Config, model: Arc<StubModel>, index: Arc<StubIndex>) -> RagService {
	RagService::with_summary(
		cfg,
		bi_rag::Providers { model, retrieval: index },
		DatasetSummary::default(),
	)
}

#[derive(Clone, Debug)]
pub enum ModelBehavior {
	/// Replies with the user prompt it received.
	Echo,
	Reply(String),
	Fail,
	Hang,
}

pub struct StubModel {
	behavior: Mutex<ModelBehavior>,
	probe_fails: AtomicBool,
	generations: AtomicUsize,
	probes: AtomicUsize,
	prompts: Mutex<Vec<String>>,
}
impl StubModel {
	pub fn new(behavior: ModelBehavior) -> Arc<Self> {
		Arc::new(Self {
			behavior: Mutex::new(behavior),
			probe_fails: AtomicBool::new(false),
			generations: AtomicUsize::new(0),
			probes: AtomicUsize::new(0),
			prompts: Mutex::new(Vec::new()),
		})
	}

	pub fn echo() -> Arc<Self> {
		Self::new(ModelBehavior::Echo)
	}

	pub fn set_behavior(&self, behavior: ModelBehavior) {
		*self.behavior.lock().unwrap_or_else(|err| err.into_inner()) = behavior;
	}

	pub fn set_probe_fails(&self, fails: bool) {
		self.probe_fails.store(fails, Ordering::SeqCst);
	}

	/// Calls other than the readiness probe.
	pub fn generation_calls(&self) -> usize {
		self.generations.load(Ordering::SeqCst)
	}

	pub fn probe_calls(&self) -> usize {
		self.probes.load(Ordering::SeqCst)
	}

	pub fn last_prompt(&self) -> Option<String> {
		self.prompts.lock().unwrap_or_else(|err| err.into_inner()).last().cloned()
	}
}
impl ModelProvider for StubModel {
	fn generate<'a>(
		&'a self,
		_: &'a ModelProviderConfig,
		request: ChatRequest<'a>,
	) -> BoxFuture<'a, Result<String>> {
		if request.prompt == PROBE_PROMPT {
			self.probes.fetch_add(1, Ordering::SeqCst);

			let fails = self.probe_fails.load(Ordering::SeqCst);

			return Box::pin(async move {
				if fails {
					Err(Error::Provider { message: "Injected probe failure.".to_string() })
				} else {
					Ok("OK".to_string())
				}
			});
		}

		self.generations.fetch_add(1, Ordering::SeqCst);
		self.prompts.lock().unwrap_or_else(|err| err.into_inner()).push(request.prompt.to_string());

		let behavior = self.behavior.lock().unwrap_or_else(|err| err.into_inner()).clone();

		Box::pin(async move {
			match behavior {
				ModelBehavior::Echo => Ok(request.prompt.to_string()),
				ModelBehavior::Reply(text) => Ok(text),
				ModelBehavior::Fail =>
					Err(Error::Provider { message: "Injected model failure.".to_string() }),
				ModelBehavior::Hang => {
					tokio::time::sleep(HANG).await;

					Ok(String::new())
				},
			}
		})
	}
}

#[derive(Clone, Debug)]
pub enum IndexBehavior {
	Passage(String),
	Fail,
	Conflict,
	Hang,
	Empty,
}

pub struct StubIndex {
	behavior: Mutex<IndexBehavior>,
	params: Mutex<Vec<QueryParams>>,
	initializations: AtomicUsize,
	teardowns: AtomicUsize,
	releases: AtomicUsize,
	intact: AtomicBool,
	init_fails: AtomicBool,
}
impl StubIndex {
	pub fn new(behavior: IndexBehavior) -> Arc<Self> {
		Arc::new(Self {
			behavior: Mutex::new(behavior),
			params: Mutex::new(Vec::new()),
			initializations: AtomicUsize::new(0),
			teardowns: AtomicUsize::new(0),
			releases: AtomicUsize::new(0),
			intact: AtomicBool::new(false),
			init_fails: AtomicBool::new(false),
		})
	}

	pub fn passage(text: &str) -> Arc<Self> {
		Self::new(IndexBehavior::Passage(text.to_string()))
	}

	pub fn set_behavior(&self, behavior: IndexBehavior) {
		*self.behavior.lock().unwrap_or_else(|err| err.into_inner()) = behavior;
	}

	pub fn set_init_fails(&self, fails: bool) {
		self.init_fails.store(fails, Ordering::SeqCst);
	}

	/// Simulates a session whose structure was lost without the manager noticing.
	pub fn break_session(&self) {
		self.intact.store(false, Ordering::SeqCst);
	}

	pub fn received_params(&self) -> Vec<QueryParams> {
		self.params.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn query_calls(&self) -> usize {
		self.params.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn initializations(&self) -> usize {
		self.initializations.load(Ordering::SeqCst)
	}

	pub fn teardowns(&self) -> usize {
		self.teardowns.load(Ordering::SeqCst)
	}

	pub fn releases(&self) -> usize {
		self.releases.load(Ordering::SeqCst)
	}
}
impl RetrievalIndex for StubIndex {
	fn initialize<'a>(&'a self, _: &'a IndexSettings) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if self.init_fails.load(Ordering::SeqCst) {
				return Err(Error::Provider {
					message: "Injected initialization failure.".to_string(),
				});
			}

			self.initializations.fetch_add(1, Ordering::SeqCst);
			self.intact.store(true, Ordering::SeqCst);

			Ok(())
		})
	}

	fn is_intact(&self) -> bool {
		self.intact.load(Ordering::SeqCst)
	}

	fn query<'a>(&'a self, _: &'a str, params: &'a QueryParams) -> BoxFuture<'a, Result<String>> {
		self.params.lock().unwrap_or_else(|err| err.into_inner()).push(params.clone());

		let behavior = self.behavior.lock().unwrap_or_else(|err| err.into_inner()).clone();

		Box::pin(async move {
			match behavior {
				IndexBehavior::Passage(text) => Ok(text),
				IndexBehavior::Fail =>
					Err(Error::Provider { message: "Injected retrieval failure.".to_string() }),
				IndexBehavior::Conflict => Err(Error::NamespaceConflict {
					message: "423 Locked: shared namespace data is busy.".to_string(),
				}),
				IndexBehavior::Hang => {
					tokio::time::sleep(HANG).await;

					Ok(String::new())
				},
				IndexBehavior::Empty => Ok(String::new()),
			}
		})
	}

	fn release_shared_state(&self) -> Result<()> {
		self.releases.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	fn teardown<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.teardowns.fetch_add(1, Ordering::SeqCst);
			self.intact.store(false, Ordering::SeqCst);

			Ok(())
		})
	}
}
