// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Account repository.
//!
//! All mutations bump `version` and stamp `updated_at`; the optimistic
//! update path locks the row with `SELECT … FOR UPDATE` and surfaces
//! [`DbError::VersionConflict`] with the winning row when the client's
//! version is stale. Upserts implement the conflict policies in
//! [`crate::row`]. The single-row entry points and the batch layer share
//! the same connection-level helpers, so batch savepoints see identical
//! semantics.

use async_trait::async_trait;
use sqlx::{MySqlConnection, MySqlPool};

use weft_core::account::{Account, AccountStatus, HeaderVersion};
use weft_core::now_ms;

use crate::batch::{AccountBatchOp, BatchOutcome, RollbackStrategy};
use crate::error::DbError;
use crate::pool::HealthProbe;
use crate::row::{account_from_row, merge_on_conflict, prepare_new_account, AccountRow, ACCOUNT_COLUMNS};

/// Store seam for account persistence, fakeable in tests.
#[async_trait]
pub trait AccountStore: Send + Sync {
	/// `SELECT 1` probe with latency, for pool health gating.
	async fn healthcheck(&self) -> HealthProbe;
	/// Non-deleted accounts, optionally scoped to a group, ordered by id ASC.
	async fn list_accounts(&self, group_id: Option<&str>) -> Result<Vec<Account>, DbError>;
	async fn get_account(&self, id: &str) -> Result<Option<Account>, DbError>;
	/// Upsert on `(email, idp)`; see [`crate::row::merge_on_conflict`].
	async fn insert_account(
		&self,
		account: Account,
		explicit_header_version: Option<HeaderVersion>,
		idp_default: HeaderVersion,
	) -> Result<Account, DbError>;
	/// Optimistic full-row update guarded by `client_version`.
	async fn update_account(&self, account: Account, client_version: i64)
		-> Result<Account, DbError>;
	async fn update_status(
		&self,
		id: &str,
		status: AccountStatus,
		last_error: Option<String>,
	) -> Result<(), DbError>;
	async fn update_tokens(
		&self,
		id: &str,
		access_token: &str,
		refresh_token: Option<&str>,
		expires_at: i64,
	) -> Result<(), DbError>;
	async fn increment_api_call(&self, id: &str, tokens: i64) -> Result<(), DbError>;
	/// Record quota exhaustion: pin usage at the limit so the hard filter
	/// excludes the account until the vendor reports a reset.
	async fn exhaust_quota(&self, id: &str, message: &str) -> Result<(), DbError>;
	/// Soft delete; checks `version` only when one is supplied.
	async fn soft_delete(&self, id: &str, client_version: Option<i64>) -> Result<(), DbError>;
	/// Active accounts whose token expires inside `(now, now + window_ms]`.
	async fn find_refresh_candidates(
		&self,
		now_ms: i64,
		window_ms: i64,
	) -> Result<Vec<Account>, DbError>;
	/// Every row (deleted included) touched after `since_ms`.
	async fn list_modified_since(&self, since_ms: i64) -> Result<Vec<Account>, DbError>;
	async fn count_non_deleted(&self) -> Result<i64, DbError>;
	/// Hard-delete non-deleted rows whose id is not in `keep`. Returns the
	/// number of rows removed. Only the guarded sync-delete flow calls this.
	async fn hard_delete_not_in(&self, keep: &[String]) -> Result<u64, DbError>;
	/// Run a batch of account operations under one transaction with the
	/// requested rollback strategy. See [`crate::batch`].
	async fn batch_accounts(
		&self,
		ops: Vec<AccountBatchOp>,
		strategy: RollbackStrategy,
	) -> Result<BatchOutcome, DbError>;
}

/// MySQL-backed account repository.
#[derive(Clone)]
pub struct AccountRepository {
	pub(crate) pool: MySqlPool,
}

impl AccountRepository {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}

	async fn fetch_rows(&self, sql: &str, group_id: Option<&str>) -> Result<Vec<Account>, DbError> {
		let rows = crate::pool::with_retry("accounts.fetch", || {
			let sql = sql.to_string();
			let group = group_id.map(str::to_string);
			let pool = self.pool.clone();
			async move {
				let mut query = sqlx::query_as::<_, AccountRow>(&sql);
				if let Some(group) = &group {
					query = query.bind(group);
				}
				Ok(query.fetch_all(&pool).await?)
			}
		})
		.await?;
		Ok(rows.into_iter().filter_map(account_from_row).collect())
	}
}

/// Bind every non-key column of `account` onto `query`, in the fixed order
/// used by the INSERT and UPDATE statements below.
macro_rules! bind_account_fields {
	($query:expr, $account:expr) => {{
		let tags_json = serde_json::to_string(&$account.tags)?;
		let subscription = $account
			.subscription
			.as_ref()
			.map(serde_json::Value::to_string);
		let resource_detail = $account
			.resource_detail
			.as_ref()
			.map(serde_json::Value::to_string);
		$query
			.bind(&$account.email)
			.bind(&$account.user_id)
			.bind(&$account.nickname)
			.bind($account.idp.as_str())
			.bind($account.status.as_str())
			.bind(&$account.group_id)
			.bind(tags_json)
			.bind(&$account.credentials.access_token)
			.bind(&$account.credentials.refresh_token)
			.bind(&$account.credentials.client_id)
			.bind(&$account.credentials.client_id_hash)
			.bind(&$account.credentials.client_secret)
			.bind(&$account.credentials.region)
			.bind($account.credentials.expires_at.to_string())
			.bind($account.credentials.auth_method.as_str())
			.bind(&$account.credentials.provider)
			.bind(i64::from($account.header.header_version.as_u8()))
			.bind(&$account.header.amz_invocation_id)
			.bind(&$account.header.kiro_device_hash)
			.bind(&$account.header.sdk_js_version)
			.bind(&$account.header.ide_version)
			.bind($account.usage.current)
			.bind($account.usage.limit)
			.bind($account.usage.percent_used)
			.bind(subscription)
			.bind(resource_detail)
			.bind($account.api_call_count)
			.bind($account.api_total_tokens)
			.bind($account.api_last_call_at)
			.bind(&$account.last_error)
			.bind($account.created_at)
			.bind($account.version)
			.bind($account.updated_at)
			.bind($account.is_del)
			.bind($account.deleted_at)
	}};
}

const INSERT_SQL: &str = "INSERT INTO accounts (id, email, user_id, nickname, idp, status, \
	group_id, tags, cred_access_token, cred_refresh_token, cred_client_id, cred_client_id_hash, \
	cred_client_secret, cred_region, cred_expires_at, cred_auth_method, cred_provider, \
	header_version, amz_invocation_id, kiro_device_hash, sdk_js_version, ide_version, \
	usage_current, usage_limit, usage_percent_used, subscription, resource_detail, \
	api_call_count, api_total_tokens, api_last_call_at, last_error, created_at, \
	version, updated_at, is_del, deleted_at) \
	VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPDATE_SQL: &str = "UPDATE accounts SET email = ?, user_id = ?, nickname = ?, idp = ?, \
	status = ?, group_id = ?, tags = ?, cred_access_token = ?, cred_refresh_token = ?, \
	cred_client_id = ?, cred_client_id_hash = ?, cred_client_secret = ?, cred_region = ?, \
	cred_expires_at = ?, cred_auth_method = ?, cred_provider = ?, header_version = ?, \
	amz_invocation_id = ?, kiro_device_hash = ?, sdk_js_version = ?, ide_version = ?, \
	usage_current = ?, usage_limit = ?, usage_percent_used = ?, subscription = ?, \
	resource_detail = ?, api_call_count = ?, api_total_tokens = ?, api_last_call_at = ?, \
	last_error = ?, created_at = ?, version = ?, updated_at = ?, is_del = ?, deleted_at = ? \
	WHERE id = ?";

/// Upsert one account on an open connection (transaction or savepoint).
pub(crate) async fn upsert_account_on(
	conn: &mut MySqlConnection,
	account: Account,
	explicit_header_version: Option<HeaderVersion>,
	idp_default: HeaderVersion,
) -> Result<Account, DbError> {
	let now = now_ms();

	let sql = format!(
		"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ? AND idp = ? AND is_del = 0 FOR UPDATE"
	);
	let existing = sqlx::query_as::<_, AccountRow>(&sql)
		.bind(&account.email)
		.bind(account.idp.as_str())
		.fetch_optional(&mut *conn)
		.await?
		.and_then(account_from_row);

	match existing {
		Some(existing) => {
			let merged = merge_on_conflict(&existing, account, now);
			let query = sqlx::query(UPDATE_SQL);
			bind_account_fields!(query, merged)
				.bind(&merged.id)
				.execute(&mut *conn)
				.await?;
			tracing::debug!(account_id = %merged.id, "account upsert merged into existing row");
			Ok(merged)
		}
		None => {
			let prepared = prepare_new_account(account, explicit_header_version, idp_default, now);
			let query = sqlx::query(INSERT_SQL).bind(&prepared.id);
			bind_account_fields!(query, prepared).execute(&mut *conn).await?;
			tracing::debug!(account_id = %prepared.id, "account created");
			Ok(prepared)
		}
	}
}

/// Optimistic full-row update on an open connection.
pub(crate) async fn update_account_on(
	conn: &mut MySqlConnection,
	mut account: Account,
	client_version: i64,
) -> Result<Account, DbError> {
	let now = now_ms();

	let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ? FOR UPDATE");
	let current = sqlx::query_as::<_, AccountRow>(&sql)
		.bind(&account.id)
		.fetch_optional(&mut *conn)
		.await?
		.and_then(account_from_row)
		.ok_or_else(|| DbError::NotFound(format!("account {}", account.id)))?;

	if current.version != client_version {
		return Err(DbError::VersionConflict {
			expected: client_version,
			current_version: current.version,
			server_data: serde_json::to_value(&current)?,
		});
	}

	account.version = current.version + 1;
	account.updated_at = now;
	account.created_at = current.created_at;

	let query = sqlx::query(UPDATE_SQL);
	bind_account_fields!(query, account)
		.bind(&account.id)
		.execute(&mut *conn)
		.await?;

	tracing::debug!(account_id = %account.id, version = account.version, "account updated");
	Ok(account)
}

/// Soft delete on an open connection.
pub(crate) async fn soft_delete_on(
	conn: &mut MySqlConnection,
	id: &str,
	client_version: Option<i64>,
) -> Result<(), DbError> {
	let now = now_ms();

	let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ? AND is_del = 0 FOR UPDATE");
	let current = sqlx::query_as::<_, AccountRow>(&sql)
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?
		.and_then(account_from_row)
		.ok_or_else(|| DbError::NotFound(format!("account {id}")))?;

	if let Some(expected) = client_version {
		if current.version != expected {
			return Err(DbError::VersionConflict {
				expected,
				current_version: current.version,
				server_data: serde_json::to_value(&current)?,
			});
		}
	}

	sqlx::query(
		"UPDATE accounts SET is_del = 1, deleted_at = ?, version = version + 1, updated_at = ? \
		 WHERE id = ?",
	)
	.bind(now)
	.bind(now)
	.bind(id)
	.execute(&mut *conn)
	.await?;

	tracing::info!(account_id = %id, "account soft-deleted");
	Ok(())
}

#[async_trait]
impl AccountStore for AccountRepository {
	async fn healthcheck(&self) -> HealthProbe {
		crate::pool::healthcheck(&self.pool).await
	}

	#[tracing::instrument(skip(self))]
	async fn list_accounts(&self, group_id: Option<&str>) -> Result<Vec<Account>, DbError> {
		let sql = if group_id.is_some() {
			format!(
				"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_del = 0 AND group_id = ? ORDER BY id ASC"
			)
		} else {
			format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_del = 0 ORDER BY id ASC")
		};
		self.fetch_rows(&sql, group_id).await
	}

	#[tracing::instrument(skip(self))]
	async fn get_account(&self, id: &str) -> Result<Option<Account>, DbError> {
		let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?");
		let row = crate::pool::with_retry("accounts.get", || {
			let sql = sql.clone();
			let id = id.to_string();
			let pool = self.pool.clone();
			async move {
				Ok(sqlx::query_as::<_, AccountRow>(&sql)
					.bind(id)
					.fetch_optional(&pool)
					.await?)
			}
		})
		.await?;
		Ok(row.and_then(account_from_row))
	}

	#[tracing::instrument(skip(self, account), fields(email = %account.email, idp = %account.idp.as_str()))]
	async fn insert_account(
		&self,
		account: Account,
		explicit_header_version: Option<HeaderVersion>,
		idp_default: HeaderVersion,
	) -> Result<Account, DbError> {
		let mut tx = self.pool.begin().await?;
		let stored =
			upsert_account_on(&mut tx, account, explicit_header_version, idp_default).await?;
		tx.commit().await?;
		Ok(stored)
	}

	#[tracing::instrument(skip(self, account), fields(account_id = %account.id, client_version))]
	async fn update_account(
		&self,
		account: Account,
		client_version: i64,
	) -> Result<Account, DbError> {
		let mut tx = self.pool.begin().await?;
		let updated = update_account_on(&mut tx, account, client_version).await?;
		tx.commit().await?;
		Ok(updated)
	}

	#[tracing::instrument(skip(self, last_error))]
	async fn update_status(
		&self,
		id: &str,
		status: AccountStatus,
		last_error: Option<String>,
	) -> Result<(), DbError> {
		let result = crate::pool::with_retry("accounts.update_status", || {
			let last_error = last_error.clone();
			let id = id.to_string();
			let pool = self.pool.clone();
			async move {
				Ok(sqlx::query(
					"UPDATE accounts SET status = ?, last_error = ?, version = version + 1, updated_at = ? \
					 WHERE id = ? AND is_del = 0",
				)
				.bind(status.as_str())
				.bind(last_error)
				.bind(now_ms())
				.bind(id)
				.execute(&pool)
				.await?)
			}
		})
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("account {id}")));
		}
		tracing::debug!(account_id = %id, status = status.as_str(), "account status updated");
		Ok(())
	}

	#[tracing::instrument(skip(self, access_token, refresh_token))]
	async fn update_tokens(
		&self,
		id: &str,
		access_token: &str,
		refresh_token: Option<&str>,
		expires_at: i64,
	) -> Result<(), DbError> {
		// A refresh response without a rotated refresh token keeps the old one.
		let result = sqlx::query(
			"UPDATE accounts SET cred_access_token = ?, \
			 cred_refresh_token = COALESCE(?, cred_refresh_token), cred_expires_at = ?, \
			 last_error = NULL, version = version + 1, updated_at = ? WHERE id = ? AND is_del = 0",
		)
		.bind(access_token)
		.bind(refresh_token)
		.bind(expires_at.to_string())
		.bind(now_ms())
		.bind(id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("account {id}")));
		}
		tracing::debug!(account_id = %id, expires_at, "account tokens rotated");
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn increment_api_call(&self, id: &str, tokens: i64) -> Result<(), DbError> {
		sqlx::query(
			"UPDATE accounts SET api_call_count = api_call_count + 1, \
			 api_total_tokens = api_total_tokens + ?, api_last_call_at = ?, \
			 version = version + 1, updated_at = ? WHERE id = ? AND is_del = 0",
		)
		.bind(tokens)
		.bind(now_ms())
		.bind(now_ms())
		.bind(id)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self, message))]
	async fn exhaust_quota(&self, id: &str, message: &str) -> Result<(), DbError> {
		let result = sqlx::query(
			"UPDATE accounts SET usage_current = usage_limit, usage_percent_used = 100, \
			 last_error = ?, version = version + 1, updated_at = ? WHERE id = ? AND is_del = 0",
		)
		.bind(message)
		.bind(now_ms())
		.bind(id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("account {id}")));
		}
		tracing::info!(account_id = %id, "account quota exhausted");
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn soft_delete(&self, id: &str, client_version: Option<i64>) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;
		soft_delete_on(&mut tx, id, client_version).await?;
		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn find_refresh_candidates(
		&self,
		now_ms: i64,
		window_ms: i64,
	) -> Result<Vec<Account>, DbError> {
		// Expiry is a legacy mixed-format column, so the window filter runs
		// on the parsed value rather than in SQL.
		let sql = format!(
			"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_del = 0 AND status = 'active' ORDER BY id ASC"
		);
		let accounts = self.fetch_rows(&sql, None).await?;
		Ok(accounts
			.into_iter()
			.filter(|a| {
				let expires = a.credentials.expires_at;
				expires > now_ms && expires <= now_ms + window_ms
			})
			.collect())
	}

	#[tracing::instrument(skip(self))]
	async fn list_modified_since(&self, since_ms: i64) -> Result<Vec<Account>, DbError> {
		let sql = format!(
			"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE updated_at > ? ORDER BY updated_at ASC"
		);
		let rows = sqlx::query_as::<_, AccountRow>(&sql)
			.bind(since_ms)
			.fetch_all(&self.pool)
			.await?;
		Ok(rows.into_iter().filter_map(account_from_row).collect())
	}

	async fn count_non_deleted(&self) -> Result<i64, DbError> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE is_del = 0")
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}

	#[tracing::instrument(skip(self, keep), fields(keep_count = keep.len()))]
	async fn hard_delete_not_in(&self, keep: &[String]) -> Result<u64, DbError> {
		if keep.is_empty() {
			return Err(DbError::Internal(
				"refusing to hard-delete with an empty keep list".to_string(),
			));
		}

		let placeholders = vec!["?"; keep.len()].join(", ");
		let sql =
			format!("DELETE FROM accounts WHERE is_del = 0 AND id NOT IN ({placeholders})");
		let mut query = sqlx::query(&sql);
		for id in keep {
			query = query.bind(id);
		}
		let result = query.execute(&self.pool).await?;

		tracing::warn!(deleted = result.rows_affected(), "sync-delete removed rows");
		Ok(result.rows_affected())
	}

	async fn batch_accounts(
		&self,
		ops: Vec<AccountBatchOp>,
		strategy: RollbackStrategy,
	) -> Result<BatchOutcome, DbError> {
		crate::batch::run_account_batch(self, ops, strategy).await
	}
}
