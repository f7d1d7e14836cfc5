use std::{collections::HashMap, sync::Mutex};

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use unicode_normalization::UnicodeNormalization;

use crate::QueryMode;

/// Cache identity of a question: NFKC-normalized text with collapsed whitespace, plus the
/// mode it was answered in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
	query: String,
	mode: QueryMode,
}
impl CacheKey {
	pub fn new(query: &str, mode: QueryMode) -> Self {
		Self { query: normalize_query(query), mode }
	}

	pub fn query(&self) -> &str {
		&self.query
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CacheStats {
	pub enabled: bool,
	pub entries: usize,
	pub valid: usize,
	pub expired: usize,
	/// Sum of cached answer lengths in bytes.
	pub size_bytes: usize,
	pub ttl_secs: u64,
	pub capacity: usize,
}

struct CacheEntry {
	value: String,
	/// `None` when the TTL reaches past the last representable timestamp.
	expires_at: Option<OffsetDateTime>,
	seq: u64,
}
impl CacheEntry {
	fn is_live(&self, now: OffsetDateTime) -> bool {
		self.expires_at.map(|expires_at| now < expires_at).unwrap_or(true)
	}
}

#[derive(Default)]
struct CacheState {
	entries: HashMap<CacheKey, CacheEntry>,
	next_seq: u64,
}

/// Time-bounded store of generated answers.
///
/// Expired entries are purged on every insert. At capacity, inserting a new key evicts the
/// entry that expires first. With one TTL for every entry that is the oldest insertion, so
/// eviction is FIFO rather than LRU.
pub struct QueryCache {
	enabled: bool,
	ttl_secs: u64,
	ttl: Duration,
	capacity: usize,
	state: Mutex<CacheState>,
}
impl QueryCache {
	pub fn new(cfg: &bi_config::Cache) -> Self {
		Self {
			enabled: cfg.enabled,
			ttl_secs: cfg.ttl_secs,
			ttl: Duration::seconds(i64::try_from(cfg.ttl_secs).unwrap_or(i64::MAX)),
			capacity: cfg.capacity,
			state: Mutex::new(CacheState::default()),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	pub fn get(&self, key: &CacheKey) -> Option<String> {
		self.get_at(key, OffsetDateTime::now_utc())
	}

	/// Live entries only. An expired entry found by the lookup is removed.
	pub fn get_at(&self, key: &CacheKey, now: OffsetDateTime) -> Option<String> {
		if !self.enabled {
			return None;
		}

		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let expired = match state.entries.get(key) {
			Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
			Some(_) => true,
			None => false,
		};

		if expired {
			state.entries.remove(key);
		}

		None
	}

	pub fn insert(&self, key: CacheKey, value: String) {
		self.insert_at(key, value, OffsetDateTime::now_utc());
	}

	pub fn insert_at(&self, key: CacheKey, value: String, now: OffsetDateTime) {
		if !self.enabled {
			return;
		}

		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let purged = purge_expired(&mut state, now);

		if purged > 0 {
			tracing::debug!(purged, "Purged expired cache entries.");
		}
		if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
			let victim = state
				.entries
				.iter()
				.min_by_key(|(_, entry)| (entry.expires_at.is_none(), entry.expires_at, entry.seq))
				.map(|(key, _)| key.clone());

			if let Some(victim) = victim {
				state.entries.remove(&victim);

				tracing::debug!(query = victim.query(), "Evicted cache entry at capacity.");
			}
		}

		let seq = state.next_seq;

		state.next_seq += 1;
		state.entries.insert(key, CacheEntry { value, expires_at: now.checked_add(self.ttl), seq });
	}

	pub fn clear(&self) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let cleared = state.entries.len();

		state.entries.clear();

		tracing::info!(cleared, "Query cache cleared.");
	}

	pub fn len(&self) -> usize {
		self.state.lock().unwrap_or_else(|err| err.into_inner()).entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheStats {
		self.stats_at(OffsetDateTime::now_utc())
	}

	pub fn stats_at(&self, now: OffsetDateTime) -> CacheStats {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let valid = state.entries.values().filter(|entry| entry.is_live(now)).count();

		CacheStats {
			enabled: self.enabled,
			entries: state.entries.len(),
			valid,
			expired: state.entries.len() - valid,
			size_bytes: state.entries.values().map(|entry| entry.value.len()).sum(),
			ttl_secs: self.ttl_secs,
			capacity: self.capacity,
		}
	}
}

fn purge_expired(state: &mut CacheState, now: OffsetDateTime) -> usize {
	let before = state.entries.len();

	state.entries.retain(|_, entry| entry.is_live(now));

	before - state.entries.len()
}

pub fn normalize_query(raw: &str) -> String {
	let normalized = raw.nfkc().collect::<String>();

	normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}
