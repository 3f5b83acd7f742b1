// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Proactive background token refresh.
//!
//! A periodic scan finds active accounts whose token expires inside the
//! refresh window and rotates their credentials ahead of the request path.
//! Each account is refreshed under `kiro:refresh:<id>`, so replicas that
//! lose the lock skip instead of double-refreshing. Repeated failures that
//! look like credential invalidation ban the account.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use weft_core::account::{AccountStatus, Credentials};
use weft_core::now_ms;
use weft_db::{lock_name, with_lock, AccountStore, LockClass, NamedLocks};
use weft_kiro::{is_credential_invalidation, KiroError, RefreshedTokens};

/// Floor for the refresh window so a tight configuration cannot make every
/// tick rescan the same accounts.
pub const MIN_REFRESH_WINDOW_MS: i64 = 10 * 60 * 1000;

/// Default lookahead for "needs refresh soon".
pub const DEFAULT_REFRESH_WINDOW_MS: i64 = 30 * 60 * 1000;

/// Vendor exchange seam, fakeable in tests.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
	async fn refresh(&self, credentials: &Credentials) -> Result<RefreshedTokens, KiroError>;
}

/// Production exchanger calling the real vendor endpoints.
pub struct VendorExchanger {
	http: reqwest::Client,
}

impl VendorExchanger {
	pub fn new() -> Self {
		Self {
			http: weft_kiro::http::refresh_client(),
		}
	}
}

impl Default for VendorExchanger {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl TokenExchanger for VendorExchanger {
	async fn refresh(&self, credentials: &Credentials) -> Result<RefreshedTokens, KiroError> {
		weft_kiro::refresh_credentials(&self.http, credentials).await
	}
}

#[derive(Debug, Clone)]
pub struct RefresherConfig {
	pub interval: Duration,
	pub window_ms: i64,
	pub lock_timeout_secs: u32,
	/// Failures before an invalidation-class error bans the account.
	pub ban_threshold: u32,
}

impl Default for RefresherConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(60),
			window_ms: DEFAULT_REFRESH_WINDOW_MS,
			lock_timeout_secs: 60,
			ban_threshold: 3,
		}
	}
}

/// Counters from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RefreshSummary {
	pub checked: usize,
	pub refreshed: usize,
	pub skipped_locked: usize,
	pub failed: usize,
	pub banned: usize,
}

/// Snapshot served by the health endpoints.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextCheckInfo {
	pub next_check_time: Option<i64>,
	pub last_check_time: Option<i64>,
	pub check_interval_secs: u64,
	pub is_refreshing: bool,
	pub is_running: bool,
	pub time_until_next_check_ms: Option<i64>,
	pub retry_queue_size: usize,
}

#[derive(Debug, Default)]
struct RefresherState {
	last_check: Option<i64>,
	next_check: Option<i64>,
	is_refreshing: bool,
	is_running: bool,
}

enum RefreshOutcome {
	Refreshed,
	Failed,
	Banned,
}

pub struct TokenRefresher {
	store: Arc<dyn AccountStore>,
	locks: Arc<dyn NamedLocks>,
	exchanger: Arc<dyn TokenExchanger>,
	config: RefresherConfig,
	state: Mutex<RefresherState>,
	retry_counts: Mutex<HashMap<String, u32>>,
}

impl TokenRefresher {
	pub fn new(
		store: Arc<dyn AccountStore>,
		locks: Arc<dyn NamedLocks>,
		exchanger: Arc<dyn TokenExchanger>,
		config: RefresherConfig,
	) -> Self {
		Self {
			store,
			locks,
			exchanger,
			config,
			state: Mutex::new(RefresherState::default()),
			retry_counts: Mutex::new(HashMap::new()),
		}
	}

	/// One refresh pass over every candidate account.
	#[tracing::instrument(skip(self))]
	pub async fn tick(&self) -> RefreshSummary {
		let now = now_ms();
		{
			let mut state = self.state.lock().await;
			state.is_refreshing = true;
			state.last_check = Some(now);
			state.next_check = Some(now + self.config.interval.as_millis() as i64);
		}

		let window = self.config.window_ms.max(MIN_REFRESH_WINDOW_MS);
		let mut summary = RefreshSummary::default();

		let candidates = match self.store.find_refresh_candidates(now, window).await {
			Ok(candidates) => candidates,
			Err(e) => {
				warn!(error = %e, "refresh candidate scan failed");
				self.state.lock().await.is_refreshing = false;
				return summary;
			}
		};
		summary.checked = candidates.len();
		debug!(candidates = summary.checked, "refresh scan complete");

		for account in candidates {
			let name = lock_name(LockClass::Refresh, &account.id);
			let result = with_lock(
				self.locks.as_ref(),
				&name,
				self.config.lock_timeout_secs,
				|| async { Ok(self.refresh_account(&account.id).await) },
			)
			.await;

			match result {
				Ok(Some(RefreshOutcome::Refreshed)) => summary.refreshed += 1,
				Ok(Some(RefreshOutcome::Failed)) => summary.failed += 1,
				Ok(Some(RefreshOutcome::Banned)) => summary.banned += 1,
				Ok(None) => {
					// Another replica owns this account right now.
					debug!(account_id = %account.id, "refresh lock contended, skipping");
					summary.skipped_locked += 1;
				}
				Err(e) => {
					warn!(account_id = %account.id, error = %e, "refresh lock error");
					summary.failed += 1;
				}
			}
		}

		self.state.lock().await.is_refreshing = false;
		if summary.refreshed + summary.failed + summary.banned > 0 {
			info!(
				refreshed = summary.refreshed,
				failed = summary.failed,
				banned = summary.banned,
				skipped = summary.skipped_locked,
				"refresh pass finished"
			);
		}
		summary
	}

	/// Refresh one account while its lock is held.
	async fn refresh_account(&self, account_id: &str) -> RefreshOutcome {
		// Re-read under the lock: another replica may have already rotated.
		let account = match self.store.get_account(account_id).await {
			Ok(Some(account)) => account,
			Ok(None) => return RefreshOutcome::Failed,
			Err(e) => {
				warn!(account_id, error = %e, "account re-read failed");
				return RefreshOutcome::Failed;
			}
		};
		let window = self.config.window_ms.max(MIN_REFRESH_WINDOW_MS);
		if account.credentials.expires_at > now_ms() + window {
			debug!(account_id, "token already fresh, nothing to do");
			return RefreshOutcome::Refreshed;
		}

		match self.exchanger.refresh(&account.credentials).await {
			Ok(tokens) => {
				let write = self
					.store
					.update_tokens(
						account_id,
						&tokens.access_token,
						tokens.refresh_token.as_deref(),
						tokens.expires_at,
					)
					.await;
				match write {
					Ok(()) => {
						self.retry_counts.lock().await.remove(account_id);
						info!(account_id, expires_at = tokens.expires_at, "token refreshed");
						RefreshOutcome::Refreshed
					}
					Err(e) => {
						warn!(account_id, error = %e, "token write-back failed");
						RefreshOutcome::Failed
					}
				}
			}
			Err(err) => self.handle_refresh_failure(account_id, err).await,
		}
	}

	async fn handle_refresh_failure(&self, account_id: &str, err: KiroError) -> RefreshOutcome {
		let message = err.to_string();
		let invalidation = match &err {
			KiroError::Banned(_) => true,
			KiroError::RefreshFailed { message, .. } => is_credential_invalidation(message),
			_ => false,
		};

		let count = {
			let mut counts = self.retry_counts.lock().await;
			let count = counts.entry(account_id.to_string()).or_insert(0);
			*count += 1;
			*count
		};

		if invalidation && count >= self.config.ban_threshold {
			warn!(account_id, attempts = count, error = %message, "credentials invalidated, banning account");
			if let Err(e) = self
				.store
				.update_status(account_id, AccountStatus::Banned, Some(message))
				.await
			{
				warn!(account_id, error = %e, "failed to persist ban");
			}
			self.retry_counts.lock().await.remove(account_id);
			return RefreshOutcome::Banned;
		}

		warn!(account_id, attempts = count, error = %message, "token refresh failed, will retry");
		if let Err(e) = self
			.store
			.update_status(account_id, AccountStatus::Active, Some(message))
			.await
		{
			warn!(account_id, error = %e, "failed to record refresh error");
		}
		RefreshOutcome::Failed
	}

	pub async fn next_check_info(&self) -> NextCheckInfo {
		let state = self.state.lock().await;
		let retry_queue_size = self.retry_counts.lock().await.len();
		let now = now_ms();
		NextCheckInfo {
			next_check_time: state.next_check,
			last_check_time: state.last_check,
			check_interval_secs: self.config.interval.as_secs(),
			is_refreshing: state.is_refreshing,
			is_running: state.is_running,
			time_until_next_check_ms: state.next_check.map(|t| (t - now).max(0)),
			retry_queue_size,
		}
	}

	/// Run the periodic loop until the task is aborted.
	///
	/// Replicas that should not refresh (`DISABLE_TOKEN_REFRESH`) simply
	/// never spawn this.
	pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			{
				let mut state = self.state.lock().await;
				state.is_running = true;
				state.next_check = Some(now_ms() + self.config.interval.as_millis() as i64);
			}
			let mut ticker = tokio::time::interval(self.config.interval);
			// The immediate first tick would race startup; skip it.
			ticker.tick().await;
			loop {
				ticker.tick().await;
				self.tick().await;
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Mutex as StdMutex;

	use weft_db::{DbError, LockLease};

	use weft_core::account::{
		Account, AuthMethod, HeaderParams, HeaderVersion, Idp, Usage,
	};

	fn account(id: &str, expires_at: i64) -> Account {
		Account {
			id: id.to_string(),
			email: format!("{id}@example.com"),
			user_id: None,
			nickname: None,
			idp: Idp::AwsIdC,
			status: AccountStatus::Active,
			group_id: None,
			tags: vec![],
			credentials: Credentials {
				access_token: "at".to_string(),
				refresh_token: "rt".to_string(),
				client_id: None,
				client_id_hash: None,
				client_secret: None,
				region: "us-east-1".to_string(),
				expires_at,
				auth_method: AuthMethod::Social,
				provider: None,
			},
			header: HeaderParams {
				header_version: HeaderVersion::V2,
				amz_invocation_id: String::new(),
				kiro_device_hash: String::new(),
				sdk_js_version: "1.0.27".to_string(),
				ide_version: "0.8.0".to_string(),
			},
			usage: Usage::default(),
			subscription: None,
			resource_detail: None,
			api_call_count: 0,
			api_total_tokens: 0,
			api_last_call_at: None,
			last_error: None,
			created_at: 0,
			version: 1,
			updated_at: 0,
			is_del: false,
			deleted_at: None,
		}
	}

	/// Store fake tracking token writes and status changes.
	#[derive(Default)]
	struct MemStore {
		accounts: StdMutex<Vec<Account>>,
	}

	#[async_trait]
	impl AccountStore for MemStore {
		async fn healthcheck(&self) -> weft_db::HealthProbe {
			weft_db::HealthProbe {
				healthy: true,
				latency_ms: 0,
				error: None,
			}
		}

		async fn list_accounts(&self, _group_id: Option<&str>) -> Result<Vec<Account>, DbError> {
			Ok(self.accounts.lock().unwrap().clone())
		}

		async fn get_account(&self, id: &str) -> Result<Option<Account>, DbError> {
			Ok(self
				.accounts
				.lock()
				.unwrap()
				.iter()
				.find(|a| a.id == id)
				.cloned())
		}

		async fn insert_account(
			&self,
			account: Account,
			_explicit: Option<HeaderVersion>,
			_default: HeaderVersion,
		) -> Result<Account, DbError> {
			self.accounts.lock().unwrap().push(account.clone());
			Ok(account)
		}

		async fn update_account(
			&self,
			account: Account,
			_client_version: i64,
		) -> Result<Account, DbError> {
			Ok(account)
		}

		async fn update_status(
			&self,
			id: &str,
			status: AccountStatus,
			last_error: Option<String>,
		) -> Result<(), DbError> {
			let mut accounts = self.accounts.lock().unwrap();
			let account = accounts
				.iter_mut()
				.find(|a| a.id == id)
				.ok_or_else(|| DbError::NotFound(id.to_string()))?;
			account.status = status;
			account.last_error = last_error;
			Ok(())
		}

		async fn update_tokens(
			&self,
			id: &str,
			access_token: &str,
			refresh_token: Option<&str>,
			expires_at: i64,
		) -> Result<(), DbError> {
			let mut accounts = self.accounts.lock().unwrap();
			let account = accounts
				.iter_mut()
				.find(|a| a.id == id)
				.ok_or_else(|| DbError::NotFound(id.to_string()))?;
			account.credentials.access_token = access_token.to_string();
			if let Some(refresh) = refresh_token {
				account.credentials.refresh_token = refresh.to_string();
			}
			account.credentials.expires_at = expires_at;
			Ok(())
		}

		async fn increment_api_call(&self, _id: &str, _tokens: i64) -> Result<(), DbError> {
			Ok(())
		}

		async fn exhaust_quota(&self, _id: &str, _message: &str) -> Result<(), DbError> {
			Ok(())
		}

		async fn soft_delete(&self, _id: &str, _v: Option<i64>) -> Result<(), DbError> {
			Ok(())
		}

		async fn find_refresh_candidates(
			&self,
			now_ms: i64,
			window_ms: i64,
		) -> Result<Vec<Account>, DbError> {
			Ok(self
				.accounts
				.lock()
				.unwrap()
				.iter()
				.filter(|a| a.status == AccountStatus::Active)
				.filter(|a| {
					a.credentials.expires_at > now_ms
						&& a.credentials.expires_at <= now_ms + window_ms
				})
				.cloned()
				.collect())
		}

		async fn list_modified_since(&self, _since_ms: i64) -> Result<Vec<Account>, DbError> {
			Ok(vec![])
		}

		async fn count_non_deleted(&self) -> Result<i64, DbError> {
			Ok(self.accounts.lock().unwrap().len() as i64)
		}

		async fn hard_delete_not_in(&self, _keep: &[String]) -> Result<u64, DbError> {
			Ok(0)
		}

		async fn batch_accounts(
			&self,
			_ops: Vec<weft_db::AccountBatchOp>,
			_strategy: weft_db::RollbackStrategy,
		) -> Result<weft_db::BatchOutcome, DbError> {
			Ok(weft_db::BatchOutcome {
				results: vec![],
				committed: true,
			})
		}
	}

	/// Process-local lock fake with GET_LOCK semantics.
	#[derive(Default)]
	struct FakeLocks {
		held: StdMutex<HashSet<String>>,
	}

	#[async_trait]
	impl NamedLocks for FakeLocks {
		async fn try_acquire(
			&self,
			name: &str,
			_timeout_secs: u32,
		) -> Result<Option<LockLease>, DbError> {
			let mut held = self.held.lock().unwrap();
			if held.insert(name.to_string()) {
				Ok(Some(LockLease::detached(name)))
			} else {
				Ok(None)
			}
		}

		async fn release(&self, lease: LockLease) -> Result<(), DbError> {
			self.held.lock().unwrap().remove(lease.name());
			Ok(())
		}

		async fn is_free(&self, name: &str) -> Result<bool, DbError> {
			Ok(!self.held.lock().unwrap().contains(name))
		}

		async fn is_held(&self, name: &str) -> Result<bool, DbError> {
			Ok(self.held.lock().unwrap().contains(name))
		}
	}

	/// Exchanger that counts calls and returns scripted results.
	struct CountingExchanger {
		calls: AtomicU32,
		fail_with: Option<KiroError>,
	}

	impl CountingExchanger {
		fn ok() -> Self {
			Self {
				calls: AtomicU32::new(0),
				fail_with: None,
			}
		}

		fn failing(err: KiroError) -> Self {
			Self {
				calls: AtomicU32::new(0),
				fail_with: Some(err),
			}
		}
	}

	#[async_trait]
	impl TokenExchanger for CountingExchanger {
		async fn refresh(&self, _credentials: &Credentials) -> Result<RefreshedTokens, KiroError> {
			// Hold briefly so concurrent ticks genuinely overlap.
			tokio::time::sleep(Duration::from_millis(10)).await;
			self.calls.fetch_add(1, Ordering::SeqCst);
			match &self.fail_with {
				Some(err) => Err(err.clone()),
				None => Ok(RefreshedTokens {
					access_token: "at-new".to_string(),
					refresh_token: Some("rt-new".to_string()),
					expires_at: now_ms() + 60 * 60 * 1000,
				}),
			}
		}
	}

	fn refresher(
		store: Arc<MemStore>,
		locks: Arc<FakeLocks>,
		exchanger: Arc<CountingExchanger>,
		ban_threshold: u32,
	) -> TokenRefresher {
		TokenRefresher::new(
			store,
			locks,
			exchanger,
			RefresherConfig {
				ban_threshold,
				..RefresherConfig::default()
			},
		)
	}

	fn expiring_soon() -> i64 {
		now_ms() + 20 * 60 * 1000 // inside the 30-minute window
	}

	#[tokio::test]
	async fn refreshes_expiring_accounts() {
		let store = Arc::new(MemStore::default());
		store
			.accounts
			.lock()
			.unwrap()
			.push(account("a1", expiring_soon()));
		let exchanger = Arc::new(CountingExchanger::ok());
		let refresher = refresher(
			Arc::clone(&store),
			Arc::new(FakeLocks::default()),
			Arc::clone(&exchanger),
			3,
		);

		let summary = refresher.tick().await;
		assert_eq!(summary.checked, 1);
		assert_eq!(summary.refreshed, 1);
		assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);

		let refreshed = store.get_account("a1").await.unwrap().unwrap();
		assert_eq!(refreshed.credentials.access_token, "at-new");
		assert_eq!(refreshed.credentials.refresh_token, "rt-new");
		assert!(refreshed.credentials.expires_at > now_ms() + 50 * 60 * 1000);
	}

	#[tokio::test]
	async fn skips_accounts_outside_the_window() {
		let store = Arc::new(MemStore::default());
		// Fresh for two hours, and one already expired.
		store
			.accounts
			.lock()
			.unwrap()
			.push(account("fresh", now_ms() + 2 * 60 * 60 * 1000));
		store.accounts.lock().unwrap().push(account("dead", now_ms() - 1000));
		let exchanger = Arc::new(CountingExchanger::ok());
		let refresher = refresher(
			Arc::clone(&store),
			Arc::new(FakeLocks::default()),
			Arc::clone(&exchanger),
			3,
		);

		let summary = refresher.tick().await;
		assert_eq!(summary.checked, 0);
		assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn concurrent_replicas_refresh_exactly_once() {
		let store = Arc::new(MemStore::default());
		store
			.accounts
			.lock()
			.unwrap()
			.push(account("a1", expiring_soon()));
		let locks = Arc::new(FakeLocks::default());
		let exchanger = Arc::new(CountingExchanger::ok());

		let replica_a = refresher(
			Arc::clone(&store),
			Arc::clone(&locks),
			Arc::clone(&exchanger),
			3,
		);
		let replica_b = refresher(
			Arc::clone(&store),
			Arc::clone(&locks),
			Arc::clone(&exchanger),
			3,
		);

		let (a, b) = tokio::join!(replica_a.tick(), replica_b.tick());

		assert_eq!(
			exchanger.calls.load(Ordering::SeqCst),
			1,
			"exactly one replica performs the exchange"
		);
		assert_eq!(a.refreshed + b.refreshed, 1);
		assert_eq!(a.skipped_locked + b.skipped_locked, 1);
	}

	#[tokio::test]
	async fn transient_failures_keep_account_active() {
		let store = Arc::new(MemStore::default());
		store
			.accounts
			.lock()
			.unwrap()
			.push(account("a1", expiring_soon()));
		let exchanger = Arc::new(CountingExchanger::failing(KiroError::Http(
			"connection reset".to_string(),
		)));
		let refresher = refresher(
			Arc::clone(&store),
			Arc::new(FakeLocks::default()),
			exchanger,
			3,
		);

		let summary = refresher.tick().await;
		assert_eq!(summary.failed, 1);
		let acc = store.get_account("a1").await.unwrap().unwrap();
		assert_eq!(acc.status, AccountStatus::Active);
		assert!(acc.last_error.is_some());
	}

	#[tokio::test]
	async fn repeated_invalidation_bans_the_account() {
		let store = Arc::new(MemStore::default());
		store
			.accounts
			.lock()
			.unwrap()
			.push(account("a1", expiring_soon()));
		let exchanger = Arc::new(CountingExchanger::failing(KiroError::Banned(
			"BANNED:TEMPORARILY_SUSPENDED".to_string(),
		)));
		let refresher = refresher(
			Arc::clone(&store),
			Arc::new(FakeLocks::default()),
			exchanger,
			2,
		);

		let first = refresher.tick().await;
		assert_eq!(first.failed, 1);
		assert_eq!(
			store.get_account("a1").await.unwrap().unwrap().status,
			AccountStatus::Active,
			"below threshold the account stays active"
		);

		let second = refresher.tick().await;
		assert_eq!(second.banned, 1);
		assert_eq!(
			store.get_account("a1").await.unwrap().unwrap().status,
			AccountStatus::Banned
		);
	}

	#[tokio::test]
	async fn next_check_info_reports_state() {
		let store = Arc::new(MemStore::default());
		let refresher = refresher(
			store,
			Arc::new(FakeLocks::default()),
			Arc::new(CountingExchanger::ok()),
			3,
		);

		let info = refresher.next_check_info().await;
		assert!(!info.is_refreshing);
		assert!(info.last_check_time.is_none());

		refresher.tick().await;
		let info = refresher.next_check_info().await;
		assert!(info.last_check_time.is_some());
		assert!(info.next_check_time.is_some());
		assert_eq!(info.retry_queue_size, 0);
	}
}
