use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use bi_config::{Config, Error};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let table = root.as_table_mut().expect("Sample config must be a table.");
	let section = table
		.get_mut(section)
		.and_then(Value::as_table_mut)
		.expect("Sample config must include the requested section.");

	section.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render sample config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("bi_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse test config.")
}

#[test]
fn omitted_sections_use_documented_defaults() {
	let cfg = base_config();

	assert_eq!(cfg.scheduler.submit_timeout_secs, 300);
	assert_eq!(cfg.scheduler.startup_timeout_secs, 10);
	assert_eq!(cfg.model_client.max_retries, 3);
	assert_eq!(cfg.model_client.call_timeout_secs, 30);
	assert_eq!(cfg.model_client.freshness_secs, 300);
	assert_eq!(cfg.retrieval.query_timeout_secs, 120);
	assert_eq!(cfg.retrieval.top_k, 80);
	assert_eq!(cfg.cache.ttl_secs, 3_600);
	assert_eq!(cfg.cache.capacity, 100);
	assert_eq!(cfg.orchestrator.max_query_chars, 2_000);
	assert_eq!(cfg.monitor.response_buffer, 1_000);
	assert_eq!(cfg.monitor.recent_buffer, 300);
	assert!((cfg.monitor.error_rate_threshold - 0.1).abs() < f64::EPSILON);
	assert!((cfg.providers.model.temperature - 0.2).abs() < f32::EPSILON);
}

#[test]
fn load_normalizes_blank_optional_values() {
	let path = write_temp_config(SAMPLE_CONFIG_TOML.to_string());
	let result = bi_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Expected sample config to load.");

	assert!(cfg.providers.retrieval.api_key.is_none());
	assert_eq!(cfg.providers.model.api_base, "http://127.0.0.1:9000");
}

#[test]
fn missing_file_reports_read_error() {
	let mut path = env::temp_dir();

	path.push("bi_config_test_missing_file.toml");

	let err = bi_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }), "Unexpected error: {err}");
	assert!(err.to_string().starts_with("Cannot read the RAG service config at"));
}

#[test]
fn malformed_toml_reports_parse_error() {
	let path = write_temp_config("[service\nhttp_bind = ".to_string());
	let result = bi_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected parse error.");

	assert!(matches!(err, Error::ParseConfig { .. }), "Unexpected error: {err}");
	assert!(err.to_string().starts_with("Cannot parse the RAG service config at"));
}

#[test]
fn cache_ttl_must_be_positive() {
	let payload = sample_toml_with("cache", "ttl_secs", Value::Integer(0));
	let path = write_temp_config(payload);
	let result = bi_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected cache TTL validation error.");

	assert!(
		err.to_string().contains("cache.ttl_secs must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn model_retries_must_be_positive() {
	let mut cfg = base_config();

	cfg.model_client.max_retries = 0;

	let err = bi_config::validate(&cfg).expect_err("Expected max_retries validation error.");

	assert!(
		err.to_string().contains("model_client.max_retries must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn model_api_key_must_be_non_empty() {
	let mut cfg = base_config();

	cfg.providers.model.api_key = "   ".to_string();

	let err = bi_config::validate(&cfg).expect_err("Expected api_key validation error.");

	assert!(
		err.to_string().contains("providers.model.api_key must be non-empty."),
		"Unexpected error: {err}"
	);
}

#[test]
fn error_rate_threshold_must_be_in_range() {
	let mut cfg = base_config();

	cfg.monitor.error_rate_threshold = 1.5;

	let err = bi_config::validate(&cfg).expect_err("Expected threshold validation error.");

	assert!(
		err.to_string().contains("monitor.error_rate_threshold must be in the range 0.0-1.0."),
		"Unexpected error: {err}"
	);

	cfg.monitor.error_rate_threshold = f64::NAN;

	assert!(bi_config::validate(&cfg).is_err());
}

#[test]
fn cache_capacity_must_be_positive() {
	let mut cfg = base_config();

	cfg.cache.capacity = 0;

	let err = bi_config::validate(&cfg).expect_err("Expected capacity validation error.");

	assert!(
		err.to_string().contains("cache.capacity must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn bi_rag_example_toml_is_valid() {
	let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

	path.push("../../bi-rag.example.toml");

	let cfg = bi_config::load(&path).expect("Expected bi-rag.example.toml to be a valid config.");

	assert_eq!(cfg.retrieval.fast_tokens.text_unit, 2_000);
	assert_eq!(cfg.retrieval.enhanced_tokens.global_context, 6_000);
}

#[test]
fn cache_ttl_is_capped_at_one_year() {
	let mut cfg = base_config();

	cfg.cache.ttl_secs = bi_config::MAX_CACHE_TTL_SECS;

	assert!(bi_config::validate(&cfg).is_ok());

	cfg.cache.ttl_secs = 400_000_000_000;

	let err = bi_config::validate(&cfg).expect_err("Expected cache TTL upper bound error.");

	assert!(err.to_string().contains("cache.ttl_secs must be at most"), "Unexpected error: {err}");
}

#[test]
fn slow_request_threshold_is_capped_at_one_day() {
	let mut cfg = base_config();

	cfg.monitor.slow_request_secs = 1e20;

	let err = bi_config::validate(&cfg).expect_err("Expected slow request bound error.");

	assert!(
		err.to_string().contains("monitor.slow_request_secs must be greater than zero"),
		"Unexpected error: {err}"
	);

	cfg.monitor.slow_request_secs = f64::INFINITY;

	assert!(bi_config::validate(&cfg).is_err());

	cfg.monitor.slow_request_secs = 30.0;

	assert!(bi_config::validate(&cfg).is_ok());
}
