// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Account snapshot cache.
//!
//! Entries are immutable `Arc` snapshots replaced whole, keyed by group id
//! (or `__all__`). A fresh entry short-circuits the database; an expired
//! entry is kept around so selection can keep serving it while the database
//! is unreachable ("stale-while-unavailable").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use weft_core::Account;

/// Cache key for the unscoped account list.
pub const ALL_KEY: &str = "__all__";

/// Snapshot freshness window.
pub const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CacheEntry {
	accounts: Arc<Vec<Account>>,
	fetched_at: Instant,
}

/// Read-through counters, exported in pool status.
#[derive(Debug, Default)]
pub struct CacheStats {
	pub hits: AtomicU64,
	pub misses: AtomicU64,
	pub stale_serves: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
	pub hits: u64,
	pub misses: u64,
	pub stale_serves: u64,
}

impl CacheStats {
	pub fn snapshot(&self) -> CacheStatsSnapshot {
		CacheStatsSnapshot {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
		}
	}

	/// Hit rate over all lookups; 1.0 when no lookups happened yet.
	pub fn hit_rate(&self) -> f64 {
		let hits = self.hits.load(Ordering::Relaxed);
		let misses = self.misses.load(Ordering::Relaxed);
		if hits + misses == 0 {
			return 1.0;
		}
		hits as f64 / (hits + misses) as f64
	}
}

/// Account list cache with stale fallback.
pub struct SnapshotCache {
	entries: RwLock<HashMap<String, CacheEntry>>,
	ttl: Duration,
	pub stats: CacheStats,
}

impl SnapshotCache {
	pub fn new(ttl: Duration) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			ttl,
			stats: CacheStats::default(),
		}
	}

	/// A snapshot younger than the TTL, counting the hit/miss.
	pub async fn get_fresh(&self, key: &str) -> Option<Arc<Vec<Account>>> {
		let entries = self.entries.read().await;
		match entries.get(key) {
			Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
				self.stats.hits.fetch_add(1, Ordering::Relaxed);
				Some(Arc::clone(&entry.accounts))
			}
			_ => {
				self.stats.misses.fetch_add(1, Ordering::Relaxed);
				None
			}
		}
	}

	/// Any snapshot regardless of age, counting a stale serve.
	pub async fn get_stale(&self, key: &str) -> Option<Arc<Vec<Account>>> {
		let entries = self.entries.read().await;
		entries.get(key).map(|entry| {
			self.stats.stale_serves.fetch_add(1, Ordering::Relaxed);
			Arc::clone(&entry.accounts)
		})
	}

	pub async fn put(&self, key: &str, accounts: Arc<Vec<Account>>) {
		let mut entries = self.entries.write().await;
		entries.insert(
			key.to_string(),
			CacheEntry {
				accounts,
				fetched_at: Instant::now(),
			},
		);
	}

	/// Drop every snapshot (topology changed or an operator forced refresh).
	pub async fn invalidate_all(&self) {
		self.entries.write().await.clear();
	}
}
