use std::sync::Arc;

use bi_rag::{Providers, RagService};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<RagService>,
}
impl AppState {
	pub fn new(config: bi_config::Config) -> Self {
		let providers = Providers::http(&config);

		Self::from_service(RagService::new(config, providers))
	}

	pub fn from_service(service: RagService) -> Self {
		Self { service: Arc::new(service) }
	}
}
