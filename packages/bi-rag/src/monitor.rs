use std::{
	collections::{BTreeMap, VecDeque},
	fs,
	path::{Path, PathBuf},
	sync::Mutex,
	time::{Duration, Instant},
};

use serde::Serialize;
use time::OffsetDateTime;

use crate::Result;
use bi_config::Monitor;

const LOW_HIT_RATE_ALERT: f64 = 0.7;
const LOW_HIT_RATE_PENALTY: f64 = 0.5;
const MIN_CACHE_LOOKUPS: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLabel {
	Excellent,
	Good,
	Fair,
	Poor,
}
impl HealthLabel {
	pub fn from_score(score: u32) -> Self {
		match score {
			90.. => Self::Excellent,
			70..=89 => Self::Good,
			50..=69 => Self::Fair,
			_ => Self::Poor,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
	pub hits: u64,
	pub misses: u64,
	pub total: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Percentiles {
	pub p50: f64,
	pub p90: f64,
	pub p95: f64,
	pub p99: f64,
}

/// Latencies are in seconds.
#[derive(Clone, Debug, Serialize)]
pub struct MonitorStats {
	pub uptime_secs: f64,
	pub total_requests: u64,
	pub total_errors: u64,
	pub overall_error_rate: f64,
	pub avg_response_secs: f64,
	pub recent_samples: usize,
	pub recent_avg_response_secs: f64,
	pub recent_error_rate: f64,
	pub cache_hit_rate: f64,
	pub cache: CacheCounters,
	pub request_counts: BTreeMap<String, u64>,
	pub error_counts: BTreeMap<String, u64>,
	pub slow_requests: usize,
	pub percentiles: Option<Percentiles>,
	/// Failures inside the recent window, by error kind.
	pub recent_error_counts: BTreeMap<String, u64>,
	pub slowest_recent: Option<RequestSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestSummary {
	pub request_id: String,
	pub endpoint: String,
	pub elapsed_secs: f64,
	pub success: bool,
	pub error_kind: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthStatus {
	pub status: HealthLabel,
	pub health_score: u32,
	pub issues: Vec<String>,
	pub uptime_secs: f64,
	pub total_requests: u64,
	pub recent_avg_response_secs: f64,
	pub recent_error_rate: f64,
	pub cache_hit_rate: f64,
}

struct RequestRecord {
	request_id: String,
	endpoint: String,
	finished_at: Instant,
	elapsed: Duration,
	success: bool,
	error_kind: Option<String>,
}
impl RequestRecord {
	fn summary(&self) -> RequestSummary {
		RequestSummary {
			request_id: self.request_id.clone(),
			endpoint: self.endpoint.clone(),
			elapsed_secs: self.elapsed.as_secs_f64(),
			success: self.success,
			error_kind: self.error_kind.clone(),
		}
	}
}

struct MonitorState {
	started: Instant,
	response_times: VecDeque<Duration>,
	recent: VecDeque<RequestRecord>,
	request_counts: BTreeMap<String, u64>,
	error_counts: BTreeMap<String, u64>,
	cache: CacheCounters,
	total_requests: u64,
	total_errors: u64,
}
impl MonitorState {
	fn new() -> Self {
		Self {
			started: Instant::now(),
			response_times: VecDeque::new(),
			recent: VecDeque::new(),
			request_counts: BTreeMap::new(),
			error_counts: BTreeMap::new(),
			cache: CacheCounters::default(),
			total_requests: 0,
			total_errors: 0,
		}
	}
}

/// Rolling request metrics. Totals only grow until [`PerformanceMonitor::reset`].
pub struct PerformanceMonitor {
	cfg: Monitor,
	state: Mutex<MonitorState>,
}
impl PerformanceMonitor {
	pub fn new(cfg: Monitor) -> Self {
		Self { cfg, state: Mutex::new(MonitorState::new()) }
	}

	pub fn record_start(&self, request_id: &str, endpoint: &str) -> Instant {
		{
			let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

			state.total_requests += 1;
			*state.request_counts.entry(endpoint.to_string()).or_default() += 1;
		}

		tracing::debug!(request_id, endpoint, "Request started.");

		Instant::now()
	}

	pub fn record_end(
		&self,
		request_id: &str,
		endpoint: &str,
		started: Instant,
		success: bool,
		error_kind: Option<&str>,
	) {
		self.record_elapsed(request_id, endpoint, started.elapsed(), success, error_kind);
	}

	pub fn record_elapsed(
		&self,
		request_id: &str,
		endpoint: &str,
		elapsed: Duration,
		success: bool,
		error_kind: Option<&str>,
	) {
		{
			let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

			push_bounded(&mut state.response_times, elapsed, self.cfg.response_buffer);

			let error_kind = (!success).then(|| error_kind.unwrap_or("unknown").to_string());

			if let Some(kind) = &error_kind {
				state.total_errors += 1;

				*state.error_counts.entry(kind.clone()).or_default() += 1;
			}

			let record = RequestRecord {
				request_id: request_id.to_string(),
				endpoint: endpoint.to_string(),
				finished_at: Instant::now(),
				elapsed,
				success,
				error_kind,
			};

			push_bounded(&mut state.recent, record, self.cfg.recent_buffer);
		}

		let secs = elapsed.as_secs_f64();

		if secs > self.cfg.slow_request_secs {
			tracing::warn!(request_id, endpoint, success, elapsed_secs = secs, "Slow request.");
		} else {
			tracing::info!(
				request_id,
				endpoint,
				success,
				elapsed_secs = secs,
				"Request completed."
			);
		}

		self.check_alerts();
	}

	pub fn record_cache_hit(&self) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		state.cache.hits += 1;
		state.cache.total += 1;
	}

	pub fn record_cache_miss(&self) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		state.cache.misses += 1;
		state.cache.total += 1;
	}

	pub fn current_stats(&self) -> MonitorStats {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let now = Instant::now();
		let window = Duration::from_secs(self.cfg.recent_window_secs);
		let recent = state
			.recent
			.iter()
			.filter(|record| now.duration_since(record.finished_at) < window)
			.collect::<Vec<_>>();
		let recent_failures = recent.iter().filter(|record| !record.success).count();
		let mut recent_error_counts = BTreeMap::new();

		for kind in recent.iter().filter_map(|record| record.error_kind.as_ref()) {
			*recent_error_counts.entry(kind.clone()).or_default() += 1;
		}

		// Thresholds beyond `Duration::MAX` mean no request is ever slow.
		let slow = Duration::try_from_secs_f64(self.cfg.slow_request_secs).unwrap_or(Duration::MAX);

		MonitorStats {
			uptime_secs: now.duration_since(state.started).as_secs_f64(),
			total_requests: state.total_requests,
			total_errors: state.total_errors,
			overall_error_rate: state.total_errors as f64 / state.total_requests.max(1) as f64,
			avg_response_secs: mean_secs(state.response_times.iter().copied()),
			recent_samples: recent.len(),
			recent_avg_response_secs: mean_secs(recent.iter().map(|record| record.elapsed)),
			recent_error_rate: ratio(recent_failures as u64, recent.len() as u64),
			cache_hit_rate: ratio(state.cache.hits, state.cache.total),
			cache: state.cache,
			request_counts: state.request_counts.clone(),
			error_counts: state.error_counts.clone(),
			slow_requests: state.response_times.iter().filter(|elapsed| **elapsed > slow).count(),
			percentiles: percentiles(&state.response_times),
			recent_error_counts,
			slowest_recent: recent
				.iter()
				.max_by_key(|record| record.elapsed)
				.map(|record| record.summary()),
		}
	}

	pub fn health_status(&self) -> HealthStatus {
		let stats = self.current_stats();
		let mut score: i32 = 100;
		let mut issues = Vec::new();

		if stats.recent_error_rate > self.cfg.error_rate_threshold {
			score -= 30;

			issues.push(format!("High error rate: {:.2}%.", stats.recent_error_rate * 100.0));
		}
		if stats.recent_avg_response_secs > self.cfg.slow_request_secs {
			score -= 25;

			issues.push(format!("Slow response time: {:.2}s.", stats.recent_avg_response_secs));
		}
		if stats.cache_hit_rate < LOW_HIT_RATE_PENALTY && stats.cache.total > MIN_CACHE_LOOKUPS {
			score -= 15;

			issues.push(format!("Low cache hit rate: {:.2}%.", stats.cache_hit_rate * 100.0));
		}

		let score = score.max(0) as u32;

		HealthStatus {
			status: HealthLabel::from_score(score),
			health_score: score,
			issues,
			uptime_secs: stats.uptime_secs,
			total_requests: stats.total_requests,
			recent_avg_response_secs: stats.recent_avg_response_secs,
			recent_error_rate: stats.recent_error_rate,
			cache_hit_rate: stats.cache_hit_rate,
		}
	}

	pub fn reset(&self) {
		*self.state.lock().unwrap_or_else(|err| err.into_inner()) = MonitorState::new();

		tracing::info!("Performance metrics reset.");
	}

	/// Writes the current statistics as pretty JSON. Without a path the file is named after
	/// the current Unix time in the working directory.
	pub fn export(&self, path: Option<&Path>) -> Result<PathBuf> {
		let path = match path {
			Some(path) => path.to_path_buf(),
			None => PathBuf::from(format!(
				"performance_metrics_{}.json",
				OffsetDateTime::now_utc().unix_timestamp()
			)),
		};
		let payload = serde_json::to_string_pretty(&self.current_stats())?;

		fs::write(&path, payload)?;

		tracing::info!(path = %path.display(), "Metrics exported.");

		Ok(path)
	}

	fn check_alerts(&self) {
		let stats = self.current_stats();

		if stats.recent_error_rate > self.cfg.error_rate_threshold {
			tracing::warn!(
				recent_error_rate = stats.recent_error_rate,
				threshold = self.cfg.error_rate_threshold,
				"High error rate detected."
			);
		}
		if stats.recent_avg_response_secs > self.cfg.slow_request_secs {
			tracing::warn!(
				recent_avg_response_secs = stats.recent_avg_response_secs,
				"High response time detected."
			);
		}
		if stats.cache_hit_rate < LOW_HIT_RATE_ALERT && stats.cache.total > MIN_CACHE_LOOKUPS {
			tracing::warn!(cache_hit_rate = stats.cache_hit_rate, "Low cache hit rate.");
		}
	}
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, value: T, capacity: usize) {
	while buffer.len() >= capacity {
		buffer.pop_front();
	}

	buffer.push_back(value);
}

fn mean_secs(values: impl Iterator<Item = Duration>) -> f64 {
	let (sum, count) = values.fold((0.0, 0_u64), |(sum, count), value| {
		(sum + value.as_secs_f64(), count + 1)
	});

	if count == 0 { 0.0 } else { sum / count as f64 }
}

fn ratio(part: u64, total: u64) -> f64 {
	if total == 0 { 0.0 } else { part as f64 / total as f64 }
}

fn percentiles(values: &VecDeque<Duration>) -> Option<Percentiles> {
	if values.is_empty() {
		return None;
	}

	let mut sorted = values.iter().map(Duration::as_secs_f64).collect::<Vec<_>>();

	sorted.sort_by(f64::total_cmp);

	let at = |p: f64| sorted[((sorted.len() as f64 * p) as usize).min(sorted.len() - 1)];

	Some(Percentiles { p50: at(0.5), p90: at(0.9), p95: at(0.95), p99: at(0.99) })
}
