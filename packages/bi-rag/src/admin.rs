use std::path::{Path, PathBuf};

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
	CacheStats, HealthStatus, ModelClientStatus, MonitorStats, RagService, Result,
	RetrievalStatus, SchedulerStatus,
};

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
	pub scheduler_alive: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
	pub scheduler: SchedulerStatus,
	pub model_client: ModelClientStatus,
	pub retrieval: RetrievalStatus,
	pub cache: CacheStats,
	pub summary_available: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct PerformanceReport {
	pub health: HealthStatus,
	pub performance: MonitorStats,
	pub status: StatusReport,
	#[serde(with = "crate::time_serde")]
	pub timestamp: OffsetDateTime,
}

impl RagService {
	pub fn health(&self) -> HealthReport {
		HealthReport { scheduler_alive: self.executor.is_healthy() }
	}

	pub fn status(&self) -> StatusReport {
		StatusReport {
			scheduler: self.executor.status(),
			model_client: self.model.status(),
			retrieval: self.retrieval.status(),
			cache: self.cache.stats(),
			summary_available: self.summary.is_available(),
		}
	}

	pub fn performance(&self) -> PerformanceReport {
		PerformanceReport {
			health: self.monitor.health_status(),
			performance: self.monitor.current_stats(),
			status: self.status(),
			timestamp: OffsetDateTime::now_utc(),
		}
	}

	pub fn clear_cache(&self) {
		self.cache.clear();
	}

	pub fn reset_metrics(&self) {
		self.monitor.reset();
	}

	/// Tears down and reopens the retrieval index. Fails if reinitialization fails.
	pub fn reset_retrieval(&self) -> Result<()> {
		let retrieval = self.retrieval.clone();

		self.executor.submit_and_wait(async move { retrieval.reset().await })
	}

	/// Forces a model client re-test. Fails if the probe call fails.
	pub fn reset_model_client(&self) -> Result<()> {
		let model = self.model.clone();

		self.executor.submit_and_wait(async move { model.reset().await })
	}

	pub fn export_metrics(&self, path: Option<&Path>) -> Result<PathBuf> {
		self.monitor.export(path)
	}

	pub fn shutdown(&self) {
		self.executor.shutdown();
	}
}
