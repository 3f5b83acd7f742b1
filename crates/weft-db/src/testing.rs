// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory store fakes for tests across the workspace.
//!
//! Pool, refresher and server tests all talk to the store traits; these
//! fakes mirror the repository semantics (version checks, batch rollback
//! strategies) without a database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use weft_core::account::{
	Account, AccountStatus, AuthMethod, Credentials, HeaderParams, HeaderVersion, Idp, Usage,
};
use crate::batch::{AccountBatchOp, BatchAction, BatchOpOutcome, BatchOutcome, RollbackStrategy};
use crate::cursor::{CursorAdvance, CursorStore};
use crate::error::DbError;
use crate::pool::HealthProbe;
use crate::account::AccountStore;

/// A selectable active account with the given token expiry.
pub fn test_account(id: &str, expires_at: i64) -> Account {
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
			access_token: format!("at-{id}"),
			refresh_token: format!("rt-{id}"),
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
			amz_invocation_id: "00000000-0000-4000-8000-000000000000".to_string(),
			kiro_device_hash: "ab".repeat(32),
			sdk_js_version: "1.0.27".to_string(),
			ide_version: "0.8.0".to_string(),
		},
		usage: Usage {
			current: 0.0,
			limit: 100.0,
			percent_used: 0.0,
		},
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

/// Recorded store-level status mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCall {
	pub id: String,
	pub status: AccountStatus,
	pub last_error: Option<String>,
}

/// In-memory [`AccountStore`] with failure injection.
#[derive(Default)]
pub struct FakeStore {
	pub accounts: Mutex<BTreeMap<String, Account>>,
	pub status_calls: Mutex<Vec<StatusCall>>,
	pub quota_calls: Mutex<Vec<String>>,
	pub fail_listing: AtomicBool,
	pub unhealthy: AtomicBool,
}

impl FakeStore {
	pub fn with_accounts(accounts: Vec<Account>) -> Self {
		let store = FakeStore::default();
		{
			let mut map = store.accounts.lock().unwrap();
			for account in accounts {
				map.insert(account.id.clone(), account);
			}
		}
		store
	}

	pub fn set_status(&self, id: &str, status: AccountStatus) {
		let mut map = self.accounts.lock().unwrap();
		if let Some(account) = map.get_mut(id) {
			account.status = status;
		}
	}
}

#[async_trait]
impl AccountStore for FakeStore {
	async fn healthcheck(&self) -> HealthProbe {
		if self.unhealthy.load(Ordering::Relaxed) {
			HealthProbe {
				healthy: false,
				latency_ms: 0,
				error: Some("injected failure".to_string()),
			}
		} else {
			HealthProbe {
				healthy: true,
				latency_ms: 1,
				error: None,
			}
		}
	}

	async fn list_accounts(&self, group_id: Option<&str>) -> Result<Vec<Account>, DbError> {
		if self.fail_listing.load(Ordering::Relaxed) {
			return Err(DbError::Unavailable("injected outage".to_string()));
		}
		let map = self.accounts.lock().unwrap();
		Ok(map
			.values()
			.filter(|a| !a.is_del)
			.filter(|a| match group_id {
				Some(g) => a.group_id.as_deref() == Some(g),
				None => true,
			})
			.cloned()
			.collect())
	}

	async fn get_account(&self, id: &str) -> Result<Option<Account>, DbError> {
		Ok(self.accounts.lock().unwrap().get(id).cloned())
	}

	async fn insert_account(
		&self,
		account: Account,
		_explicit_header_version: Option<HeaderVersion>,
		_idp_default: HeaderVersion,
	) -> Result<Account, DbError> {
		self
			.accounts
			.lock()
			.unwrap()
			.insert(account.id.clone(), account.clone());
		Ok(account)
	}

	async fn update_account(
		&self,
		account: Account,
		client_version: i64,
	) -> Result<Account, DbError> {
		let mut map = self.accounts.lock().unwrap();
		let current = map
			.get(&account.id)
			.ok_or_else(|| DbError::NotFound(format!("account {}", account.id)))?;
		if current.version != client_version {
			return Err(DbError::VersionConflict {
				expected: client_version,
				current_version: current.version,
				server_data: serde_json::to_value(current)?,
			});
		}
		let mut updated = account;
		updated.version = client_version + 1;
		map.insert(updated.id.clone(), updated.clone());
		Ok(updated)
	}

	async fn update_status(
		&self,
		id: &str,
		status: AccountStatus,
		last_error: Option<String>,
	) -> Result<(), DbError> {
		self.status_calls.lock().unwrap().push(StatusCall {
			id: id.to_string(),
			status,
			last_error: last_error.clone(),
		});
		let mut map = self.accounts.lock().unwrap();
		if let Some(account) = map.get_mut(id) {
			account.status = status;
			account.last_error = last_error;
			account.version += 1;
		}
		Ok(())
	}

	async fn update_tokens(
		&self,
		id: &str,
		access_token: &str,
		refresh_token: Option<&str>,
		expires_at: i64,
	) -> Result<(), DbError> {
		let mut map = self.accounts.lock().unwrap();
		let account = map
			.get_mut(id)
			.ok_or_else(|| DbError::NotFound(format!("account {id}")))?;
		account.credentials.access_token = access_token.to_string();
		if let Some(refresh) = refresh_token {
			account.credentials.refresh_token = refresh.to_string();
		}
		account.credentials.expires_at = expires_at;
		account.last_error = None;
		account.version += 1;
		Ok(())
	}

	async fn increment_api_call(&self, id: &str, tokens: i64) -> Result<(), DbError> {
		let mut map = self.accounts.lock().unwrap();
		if let Some(account) = map.get_mut(id) {
			account.api_call_count += 1;
			account.api_total_tokens += tokens;
		}
		Ok(())
	}

	async fn exhaust_quota(&self, id: &str, message: &str) -> Result<(), DbError> {
		self.quota_calls.lock().unwrap().push(id.to_string());
		let mut map = self.accounts.lock().unwrap();
		let account = map
			.get_mut(id)
			.ok_or_else(|| DbError::NotFound(format!("account {id}")))?;
		account.usage.current = account.usage.limit;
		account.usage.percent_used = 100.0;
		account.last_error = Some(message.to_string());
		account.version += 1;
		Ok(())
	}

	async fn soft_delete(&self, id: &str, _client_version: Option<i64>) -> Result<(), DbError> {
		let mut map = self.accounts.lock().unwrap();
		let account = map
			.get_mut(id)
			.ok_or_else(|| DbError::NotFound(format!("account {id}")))?;
		account.is_del = true;
		account.version += 1;
		Ok(())
	}

	async fn find_refresh_candidates(
		&self,
		now_ms: i64,
		window_ms: i64,
	) -> Result<Vec<Account>, DbError> {
		let map = self.accounts.lock().unwrap();
		Ok(map
			.values()
			.filter(|a| !a.is_del && a.status == AccountStatus::Active)
			.filter(|a| {
				let exp = a.credentials.expires_at;
				exp > now_ms && exp <= now_ms + window_ms
			})
			.cloned()
			.collect())
	}

	async fn list_modified_since(&self, since_ms: i64) -> Result<Vec<Account>, DbError> {
		let map = self.accounts.lock().unwrap();
		Ok(map
			.values()
			.filter(|a| a.updated_at > since_ms)
			.cloned()
			.collect())
	}

	async fn count_non_deleted(&self) -> Result<i64, DbError> {
		Ok(self.accounts.lock().unwrap().values().filter(|a| !a.is_del).count() as i64)
	}

	async fn hard_delete_not_in(&self, keep: &[String]) -> Result<u64, DbError> {
		let mut map = self.accounts.lock().unwrap();
		let before = map.len();
		map.retain(|id, account| account.is_del || keep.contains(id));
		Ok((before - map.len()) as u64)
	}

	async fn batch_accounts(
		&self,
		ops: Vec<AccountBatchOp>,
		strategy: RollbackStrategy,
	) -> Result<BatchOutcome, DbError> {
		run_fake_batch(&self.accounts, ops, strategy)
	}
}

/// In-memory mirror of the batch semantics: `all` commits nothing on any
/// failure, the other strategies keep the survivors.
pub fn run_fake_batch(
	accounts: &Mutex<BTreeMap<String, Account>>,
	ops: Vec<AccountBatchOp>,
	strategy: RollbackStrategy,
) -> Result<BatchOutcome, DbError> {
	let mut map = accounts.lock().unwrap();
	let mut working = map.clone();
	let mut results = Vec::with_capacity(ops.len());

	for (index, op) in ops.iter().enumerate() {
		let result: Result<Option<String>, DbError> = match op.action {
			BatchAction::Create => match op.account.clone() {
				Some(account) => {
					let duplicate = working.values().any(|a| {
						!a.is_del && a.email == account.email && a.idp == account.idp
					});
					if duplicate {
						Err(DbError::Constraint(format!(
							"Duplicate entry '{}-{}'",
							account.email,
							account.idp.as_str()
						)))
					} else {
						let id = account.id.clone();
						working.insert(id.clone(), account);
						Ok(Some(id))
					}
				}
				None => Err(DbError::Internal("create op without account payload".into())),
			},
			BatchAction::Update => match (op.account.clone(), op.client_version) {
				(Some(account), Some(client_version)) => {
					match working.get(&account.id) {
						None => Err(DbError::NotFound(format!("account {}", account.id))),
						Some(current) if current.version != client_version => {
							Err(DbError::VersionConflict {
								expected: client_version,
								current_version: current.version,
								server_data: serde_json::to_value(current)?,
							})
						}
						Some(current) => {
							let mut updated = account;
							updated.version = current.version + 1;
							let id = updated.id.clone();
							working.insert(id.clone(), updated);
							Ok(Some(id))
						}
					}
				}
				_ => Err(DbError::Internal("update op missing payload or version".into())),
			},
			BatchAction::Delete => match op.id.clone() {
				Some(id) => match working.get_mut(&id) {
					None => Err(DbError::NotFound(format!("account {id}"))),
					Some(account) => {
						let conflict = op.client_version.filter(|&v| account.version != v);
						if let Some(expected) = conflict {
							Err(DbError::VersionConflict {
								expected,
								current_version: account.version,
								server_data: serde_json::to_value(&*account)?,
							})
						} else {
							account.is_del = true;
							account.version += 1;
							Ok(Some(id))
						}
					}
				},
				None => Err(DbError::Internal("delete op without id".into())),
			},
		};

		match result {
			Ok(id) => results.push(BatchOpOutcome {
				index,
				action: op.action,
				success: true,
				id,
				error: None,
				current_version: None,
			}),
			Err(err) => {
				let current_version = match &err {
					DbError::VersionConflict {
						current_version, ..
					} => Some(*current_version),
					_ => None,
				};
				results.push(BatchOpOutcome {
					index,
					action: op.action,
					success: false,
					id: op.id.clone().or_else(|| op.account.as_ref().map(|a| a.id.clone())),
					error: Some(err.to_string()),
					current_version,
				});
				if strategy == RollbackStrategy::All {
					for earlier in results.iter_mut() {
						earlier.success = false;
						if earlier.error.is_none() {
							earlier.error = Some("rolled back".to_string());
						}
					}
					return Ok(BatchOutcome {
						results,
						committed: false,
					});
				}
			}
		}
	}

	*map = working;
	Ok(BatchOutcome {
		results,
		committed: true,
	})
}

/// In-memory [`CursorStore`] mirroring the FOR-UPDATE advance algorithm.
#[derive(Default)]
pub struct FakeCursor {
	state: Mutex<BTreeMap<String, (i64, i64)>>,
	pub fail: AtomicBool,
}

#[async_trait]
impl CursorStore for FakeCursor {
	async fn advance(
		&self,
		group_key: &str,
		account_count: usize,
	) -> Result<CursorAdvance, DbError> {
		if self.fail.load(Ordering::Relaxed) {
			return Err(DbError::Unavailable("cursor outage".to_string()));
		}
		let mut state = self.state.lock().unwrap();
		let entry = state.entry(group_key.to_string()).or_insert((0, account_count as i64));
		let count_changed = entry.1 != account_count as i64;
		let current = if entry.0 < 0 || entry.0 >= account_count as i64 {
			0
		} else {
			entry.0 as usize
		};
		*entry = (((current + 1) % account_count) as i64, account_count as i64);
		Ok(CursorAdvance {
			index: current,
			count_changed,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn create_op(id: &str) -> AccountBatchOp {
		AccountBatchOp {
			action: BatchAction::Create,
			account: Some(test_account(id, i64::MAX / 2)),
			id: None,
			client_version: None,
			explicit_header_version: None,
			idp_default: HeaderVersion::V2,
		}
	}

	fn update_op(id: &str, client_version: i64) -> AccountBatchOp {
		AccountBatchOp {
			action: BatchAction::Update,
			account: Some(test_account(id, i64::MAX / 2)),
			id: None,
			client_version: Some(client_version),
			explicit_header_version: None,
			idp_default: HeaderVersion::V2,
		}
	}

	#[tokio::test]
	async fn failed_only_batch_commits_exactly_the_survivors() {
		let store = FakeStore::with_accounts(vec![
			test_account("u1", i64::MAX / 2),
			test_account("u2", i64::MAX / 2),
		]);

		// [ok, fail, ok, fail, ok]: two stale updates among three good ops.
		let ops = vec![
			create_op("n1"),
			update_op("u1", 99), // stale version
			create_op("n2"),
			update_op("u2", 99), // stale version
			create_op("n3"),
		];
		let outcome = store
			.batch_accounts(ops, RollbackStrategy::FailedOnly)
			.await
			.unwrap();

		assert!(outcome.committed);
		let successes: Vec<bool> = outcome.results.iter().map(|r| r.success).collect();
		assert_eq!(successes, vec![true, false, true, false, true]);
		assert!(outcome.results[1].current_version.is_some());

		// Survivors landed; failed targets are unchanged.
		assert!(store.get_account("n1").await.unwrap().is_some());
		assert!(store.get_account("n2").await.unwrap().is_some());
		assert!(store.get_account("n3").await.unwrap().is_some());
		assert_eq!(store.get_account("u1").await.unwrap().unwrap().version, 1);
		assert_eq!(store.get_account("u2").await.unwrap().unwrap().version, 1);
	}

	#[tokio::test]
	async fn all_strategy_rolls_back_everything_on_first_failure() {
		let store = FakeStore::with_accounts(vec![test_account("u1", i64::MAX / 2)]);

		let ops = vec![
			create_op("n1"),
			update_op("u1", 99), // stale version aborts the batch
			create_op("n2"),
		];
		let outcome = store
			.batch_accounts(ops, RollbackStrategy::All)
			.await
			.unwrap();

		assert!(!outcome.committed);
		assert_eq!(outcome.results.len(), 2, "processing stops at the failure");
		assert!(outcome.results.iter().all(|r| !r.success));
		assert!(store.get_account("n1").await.unwrap().is_none());
		assert!(store.get_account("n2").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn none_strategy_is_best_effort() {
		let store = FakeStore::with_accounts(vec![test_account("u1", i64::MAX / 2)]);

		let ops = vec![create_op("n1"), update_op("u1", 99), create_op("n1")];
		let outcome = store
			.batch_accounts(ops, RollbackStrategy::None)
			.await
			.unwrap();

		assert!(outcome.committed);
		// Second create of n1 collides on (email, idp).
		let successes: Vec<bool> = outcome.results.iter().map(|r| r.success).collect();
		assert_eq!(successes, vec![true, false, false]);
		assert!(store.get_account("n1").await.unwrap().is_some());
	}
}
