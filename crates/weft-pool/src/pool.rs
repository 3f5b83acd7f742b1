// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The account selection engine.
//!
//! Selection order: the active tier (when enabled and the request is
//! unscoped) serves from its hot list; otherwise candidates flow through
//! the snapshot cache, validation/repair, the hard filter, and the
//! persisted round-robin cursor. Database outages degrade to stale
//! snapshots instead of failing requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use weft_core::config::{ActivePoolConfig, AlertConfig};
use weft_core::{now_ms, Account, AccountStatus};
use weft_db::{AccountStore, CursorStore, DbError, GLOBAL_GROUP_KEY};

use crate::active::{ActiveTier, ErrorMark, TierSnapshot};
use crate::cache::{CacheStatsSnapshot, SnapshotCache, ALL_KEY, CACHE_TTL};
use crate::health::{evaluate_alerts, score, Alert, HealthInputs, PoolHealth};
use crate::repair::{validate_and_repair, RepairStats};

/// Minimum spacing between health probes while the database is down.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
	#[error("no accounts available")]
	NoAvailable,

	#[error("all candidate accounts have expired tokens")]
	AllExpired,

	#[error(transparent)]
	Store(#[from] DbError),
}

/// Introspection payload for the pool status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
	pub group_id: Option<String>,
	pub total_accounts: usize,
	pub available_accounts: usize,
	pub valid_token_accounts: usize,
	pub db_connection_failed: bool,
	pub active_tier: TierSnapshot,
	pub cache: CacheStatsSnapshot,
	pub dropped_rows: u64,
	pub repaired_rows: u64,
}

/// The pool. One instance per process; all mutable state is internal.
pub struct AccountPool {
	store: Arc<dyn AccountStore>,
	cursor: Arc<dyn CursorStore>,
	cache: SnapshotCache,
	tier: ActiveTier,
	alerts: AlertConfig,
	db_failed: AtomicBool,
	last_probe: Mutex<Option<Instant>>,
	db_failures_window: AtomicU32,
	dropped_total: AtomicU64,
	repaired_total: AtomicU64,
}

impl AccountPool {
	pub fn new(
		store: Arc<dyn AccountStore>,
		cursor: Arc<dyn CursorStore>,
		active_config: ActivePoolConfig,
		alerts: AlertConfig,
	) -> Self {
		Self::with_cache_ttl(store, cursor, active_config, alerts, CACHE_TTL)
	}

	/// Constructor with an explicit snapshot TTL (tests use zero).
	pub fn with_cache_ttl(
		store: Arc<dyn AccountStore>,
		cursor: Arc<dyn CursorStore>,
		active_config: ActivePoolConfig,
		alerts: AlertConfig,
		cache_ttl: Duration,
	) -> Self {
		Self {
			store,
			cursor,
			cache: SnapshotCache::new(cache_ttl),
			tier: ActiveTier::new(active_config),
			alerts,
			db_failed: AtomicBool::new(false),
			last_probe: Mutex::new(None),
			db_failures_window: AtomicU32::new(0),
			dropped_total: AtomicU64::new(0),
			repaired_total: AtomicU64::new(0),
		}
	}

	fn cache_key(group_id: Option<&str>) -> &str {
		group_id.unwrap_or(ALL_KEY)
	}

	/// Load the validated snapshot for a group, through the cache.
	async fn load_snapshot(&self, group_id: Option<&str>) -> Result<Arc<Vec<Account>>, PoolError> {
		let key = Self::cache_key(group_id);

		if self.db_failed.load(Ordering::Relaxed) {
			if !self.probe_database().await {
				return Ok(self.serve_stale(key).await);
			}
			// Probe succeeded: fall through to a live read.
		} else if let Some(snapshot) = self.cache.get_fresh(key).await {
			return Ok(snapshot);
		}

		match self.store.list_accounts(group_id).await {
			Ok(rows) => {
				let (valid, stats) = validate_and_repair(rows, now_ms());
				self.record_repair(stats);
				let snapshot = Arc::new(valid);
				self.cache.put(key, Arc::clone(&snapshot)).await;
				if self.db_failed.swap(false, Ordering::Relaxed) {
					tracing::info!("database connection recovered, serving live data again");
				}
				Ok(snapshot)
			}
			Err(err @ DbError::Unavailable(_)) => {
				tracing::warn!(error = %err, "account listing failed, degrading to stale cache");
				self.record_db_failure();
				Ok(self.serve_stale(key).await)
			}
			Err(err) => Err(err.into()),
		}
	}

	async fn serve_stale(&self, key: &str) -> Arc<Vec<Account>> {
		match self.cache.get_stale(key).await {
			Some(snapshot) => {
				tracing::warn!(key, "serving stale account snapshot while database is unavailable");
				snapshot
			}
			None => {
				tracing::error!(key, "no live or stale account data available");
				Arc::new(Vec::new())
			}
		}
	}

	fn record_db_failure(&self) {
		self.db_failed.store(true, Ordering::Relaxed);
		self.db_failures_window.fetch_add(1, Ordering::Relaxed);
	}

	fn record_repair(&self, stats: RepairStats) {
		self.dropped_total.fetch_add(stats.dropped, Ordering::Relaxed);
		self.repaired_total.fetch_add(stats.repaired, Ordering::Relaxed);
	}

	/// Throttled `SELECT 1`; returns whether the database answered.
	async fn probe_database(&self) -> bool {
		{
			let last = self.last_probe.lock().await;
			if let Some(at) = *last {
				if at.elapsed() < PROBE_INTERVAL {
					return false;
				}
			}
		}
		*self.last_probe.lock().await = Some(Instant::now());

		let probe = self.store.healthcheck().await;
		if probe.healthy {
			tracing::info!(latency_ms = probe.latency_ms, "database probe succeeded");
			self.db_failed.store(false, Ordering::Relaxed);
			true
		} else {
			tracing::warn!(error = ?probe.error, "database probe failed");
			false
		}
	}

	/// Accounts passing the hard filter, ordered by id for stable rotation.
	pub async fn get_available_accounts(
		&self,
		group_id: Option<&str>,
	) -> Result<Vec<Account>, PoolError> {
		let snapshot = self.load_snapshot(group_id).await?;
		Ok(snapshot.iter().filter(|a| a.selectable()).cloned().collect())
	}

	pub async fn get_account_by_id(&self, id: &str) -> Result<Option<Account>, PoolError> {
		Ok(self.store.get_account(id).await?)
	}

	/// Select the next account to serve a request.
	pub async fn get_next_account(&self, group_id: Option<&str>) -> Result<Account, PoolError> {
		let now = now_ms();

		if self.tier.enabled() && group_id.is_none() {
			let snapshot = self.load_snapshot(None).await?;
			let servable: HashMap<&str, &Account> = snapshot
				.iter()
				.filter(|a| a.selectable() && a.token_valid_at(now))
				.map(|a| (a.id.as_str(), a))
				.collect();

			let pick = self.tier.select(&|id| servable.contains_key(id)).await;
			if let Some(id) = pick {
				if let Some(account) = servable.get(id.as_str()) {
					tracing::debug!(account_id = %id, "selected account from active tier");
					return Ok((*account).clone());
				}
			}
			// Empty or unservable tier falls through to the cursor path.
		}

		self.pick_round_robin(group_id, now).await
	}

	async fn pick_round_robin(&self, group_id: Option<&str>, now: i64) -> Result<Account, PoolError> {
		let available = self.get_available_accounts(group_id).await?;
		if available.is_empty() {
			return Err(PoolError::NoAvailable);
		}

		let valid: Vec<Account> = available
			.into_iter()
			.filter(|a| a.token_valid_at(now))
			.collect();
		if valid.is_empty() {
			return Err(PoolError::AllExpired);
		}

		let key = group_id.unwrap_or(GLOBAL_GROUP_KEY);
		match self.cursor.advance(key, valid.len()).await {
			Ok(advance) if advance.count_changed => {
				// Topology changed under us: refresh the snapshot and take
				// one more fair pick against the new membership.
				tracing::debug!(group_key = key, "cursor count changed, refreshing and retrying");
				self.cache.invalidate_all().await;

				let refreshed = self.get_available_accounts(group_id).await?;
				let valid2: Vec<Account> = refreshed
					.into_iter()
					.filter(|a| a.token_valid_at(now))
					.collect();
				let candidates = if valid2.is_empty() { valid } else { valid2 };

				match self.cursor.advance(key, candidates.len()).await {
					Ok(advance) => Ok(candidates[advance.index % candidates.len()].clone()),
					Err(err) => Ok(Self::random_fallback(&candidates, &err)),
				}
			}
			Ok(advance) => Ok(valid[advance.index % valid.len()].clone()),
			Err(err) => Ok(Self::random_fallback(&valid, &err)),
		}
	}

	fn random_fallback(candidates: &[Account], err: &DbError) -> Account {
		let idx = fastrand::usize(..candidates.len());
		tracing::warn!(error = %err, index = idx, "cursor advance failed, using random selection");
		candidates[idx].clone()
	}

	/// Count an error against the account.
	///
	/// Accounts tracked by the active tier absorb errors in memory and only
	/// demote to cooling at the threshold; untracked accounts are marked
	/// `error` in the store immediately.
	pub async fn mark_account_error(&self, id: &str, message: &str) -> Result<(), PoolError> {
		if self.tier.enabled() {
			match self.tier.on_error(id, now_ms()).await {
				ErrorMark::Demoted => {
					tracing::info!(account_id = %id, error = %message, "account cooled after repeated errors");
					return Ok(());
				}
				ErrorMark::Counted(count) => {
					tracing::debug!(account_id = %id, count, "error counted against active entry");
					return Ok(());
				}
				ErrorMark::NotTracked => {}
			}
		}

		self
			.store
			.update_status(id, AccountStatus::Error, Some(message.to_string()))
			.await?;
		self.cache.invalidate_all().await;
		Ok(())
	}

	pub async fn mark_account_success(&self, id: &str) -> Result<(), PoolError> {
		self.tier.on_success(id).await;
		Ok(())
	}

	/// Quota exhaustion never cools the account; it is excluded by the hard
	/// filter until the vendor reports a usage reset.
	pub async fn mark_account_quota_exhausted(
		&self,
		id: &str,
		message: &str,
	) -> Result<(), PoolError> {
		self.store.exhaust_quota(id, message).await?;
		self.cache.invalidate_all().await;
		Ok(())
	}

	pub async fn ban_account(&self, id: &str, message: &str) -> Result<(), PoolError> {
		self
			.store
			.update_status(id, AccountStatus::Banned, Some(message.to_string()))
			.await?;
		self.tier.evict(id).await;
		self.cache.invalidate_all().await;
		Ok(())
	}

	pub async fn update_account_token(
		&self,
		id: &str,
		access_token: &str,
		refresh_token: Option<&str>,
		expires_at: i64,
	) -> Result<(), PoolError> {
		self
			.store
			.update_tokens(id, access_token, refresh_token, expires_at)
			.await?;
		self.cache.invalidate_all().await;
		Ok(())
	}

	/// Fire-and-forget usage counter bump; never delays the response path.
	pub fn increment_api_call(&self, id: &str, tokens: i64) {
		let store = Arc::clone(&self.store);
		let id = id.to_string();
		tokio::spawn(async move {
			if let Err(e) = store.increment_api_call(&id, tokens).await {
				tracing::debug!(account_id = %id, error = %e, "api call counter update failed");
			}
		});
	}

	pub async fn invalidate_cache(&self) {
		self.cache.invalidate_all().await;
	}

	/// One pass of active/cooling maintenance, normally on a 1-minute tick.
	pub async fn maintenance_tick(&self) -> Result<(), PoolError> {
		if !self.tier.enabled() {
			return Ok(());
		}
		let now = now_ms();

		// (a) demote active entries the store no longer trusts
		for id in self.tier.active_ids().await {
			match self.store.get_account(&id).await? {
				Some(account) if account.is_del => self.tier.evict(&id).await,
				Some(account)
					if matches!(account.status, AccountStatus::Banned | AccountStatus::Error) =>
				{
					tracing::info!(account_id = %id, status = account.status.as_str(), "demoting active account");
					self.tier.demote(&id, now).await;
				}
				Some(_) => {}
				None => self.tier.evict(&id).await,
			}
		}

		// (b) re-evaluate cooled entries whose period elapsed
		for entry in self.tier.due_for_reevaluation(now).await {
			match self.store.get_account(&entry.account_id).await? {
				Some(account)
					if !account.is_del
						&& account.status == AccountStatus::Active
						&& account.token_valid_at(now) =>
				{
					self.tier.promote(&entry.account_id, now).await;
				}
				Some(_) => self.tier.extend_cooling(&entry.account_id, now).await,
				None => self.tier.evict(&entry.account_id).await,
			}
		}

		// (c) refill free slots, least-used first
		if self.tier.free_slots().await > 0 {
			let tracked: Vec<String> = self.tier.tracked_ids().await;
			let mut candidates: Vec<Account> = self
				.get_available_accounts(None)
				.await?
				.into_iter()
				.filter(|a| !tracked.contains(&a.id))
				.collect();
			candidates.sort_by(|a, b| {
				a.usage
					.percent_used
					.partial_cmp(&b.usage.percent_used)
					.unwrap_or(std::cmp::Ordering::Equal)
			});
			let ids = candidates.into_iter().map(|a| a.id).collect();
			let added = self.tier.refill(ids, now).await;
			if added > 0 {
				tracing::debug!(added, "refilled active tier");
			}
		}

		Ok(())
	}

	pub async fn pool_status(&self, group_id: Option<&str>) -> Result<PoolStatus, PoolError> {
		let snapshot = self.load_snapshot(group_id).await?;
		let now = now_ms();
		let available = snapshot.iter().filter(|a| a.selectable()).count();
		let valid_tokens = snapshot
			.iter()
			.filter(|a| a.selectable() && a.token_valid_at(now))
			.count();

		Ok(PoolStatus {
			group_id: group_id.map(str::to_string),
			total_accounts: snapshot.len(),
			available_accounts: available,
			valid_token_accounts: valid_tokens,
			db_connection_failed: self.db_failed.load(Ordering::Relaxed),
			active_tier: self.tier.snapshot().await,
			cache: self.cache.stats.snapshot(),
			dropped_rows: self.dropped_total.load(Ordering::Relaxed),
			repaired_rows: self.repaired_total.load(Ordering::Relaxed),
		})
	}

	async fn health_inputs(&self) -> HealthInputs {
		let probe = self.store.healthcheck().await;
		let now = now_ms();

		let snapshot = self
			.load_snapshot(None)
			.await
			.unwrap_or_else(|_| Arc::new(Vec::new()));

		let total = snapshot.len();
		let active = snapshot
			.iter()
			.filter(|a| a.status == AccountStatus::Active)
			.count();
		let errors = snapshot
			.iter()
			.filter(|a| matches!(a.status, AccountStatus::Error | AccountStatus::Banned))
			.count();
		let expired = snapshot.iter().filter(|a| !a.token_valid_at(now)).count();
		let available = snapshot.iter().filter(|a| a.selectable()).count();

		HealthInputs {
			db_healthy: probe.healthy,
			total_accounts: total,
			active_accounts: active,
			error_accounts: errors,
			expired_accounts: expired,
			available_accounts: available,
			cache_hit_rate: self.cache.stats.hit_rate(),
			db_failures_in_window: self.db_failures_window.load(Ordering::Relaxed),
		}
	}

	pub async fn pool_health(&self) -> PoolHealth {
		score(&self.health_inputs().await)
	}

	/// Evaluate alert thresholds; the failure window resets afterwards.
	/// Normally driven by the 5-minute monitor tick.
	pub async fn monitor_tick(&self) -> Vec<Alert> {
		let inputs = self.health_inputs().await;
		let alerts = evaluate_alerts(&inputs, &self.alerts);
		for alert in &alerts {
			match alert.severity {
				crate::health::AlertSeverity::Critical => {
					tracing::error!(code = alert.code, message = %alert.message, "pool alert");
				}
				crate::health::AlertSeverity::Warning => {
					tracing::warn!(code = alert.code, message = %alert.message, "pool alert");
				}
			}
		}
		self.db_failures_window.store(0, Ordering::Relaxed);
		alerts
	}
}
