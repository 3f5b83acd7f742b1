// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batched account operations with savepoint rollback.
//!
//! One outer transaction wraps the whole batch. Strategy `all` aborts and
//! rolls everything back at the first failure; `failed-only` wraps each
//! operation in a savepoint so failures roll back individually while
//! survivors commit; `none` is best-effort within the single transaction.

use serde::{Deserialize, Serialize};
use sqlx::Acquire;

use weft_core::account::{Account, HeaderVersion};

use crate::account::{soft_delete_on, update_account_on, upsert_account_on, AccountRepository};
use crate::error::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStrategy {
	/// Best effort: failures are recorded, survivors commit.
	None,
	/// First failure aborts and rolls back the whole batch.
	All,
	/// Failures roll back to their savepoint; survivors commit.
	FailedOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
	Create,
	Update,
	Delete,
}

/// One operation in a batch request.
#[derive(Debug, Clone)]
pub struct AccountBatchOp {
	pub action: BatchAction,
	/// Payload for create/update.
	pub account: Option<Account>,
	/// Target id for delete.
	pub id: Option<String>,
	/// Version guard for update (required) and delete (optional).
	pub client_version: Option<i64>,
	/// Header version the client pinned explicitly on create.
	pub explicit_header_version: Option<HeaderVersion>,
	/// Per-IDP default applied when none was pinned.
	pub idp_default: HeaderVersion,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOpOutcome {
	pub index: usize,
	pub action: BatchAction,
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
	pub results: Vec<BatchOpOutcome>,
	/// Whether the outer transaction committed.
	pub committed: bool,
}

async fn run_one(
	conn: &mut sqlx::MySqlConnection,
	op: &AccountBatchOp,
) -> Result<Option<String>, DbError> {
	match op.action {
		BatchAction::Create => {
			let account = op
				.account
				.clone()
				.ok_or_else(|| DbError::Internal("create op without account payload".into()))?;
			let stored =
				upsert_account_on(conn, account, op.explicit_header_version, op.idp_default)
					.await?;
			Ok(Some(stored.id))
		}
		BatchAction::Update => {
			let account = op
				.account
				.clone()
				.ok_or_else(|| DbError::Internal("update op without account payload".into()))?;
			let client_version = op
				.client_version
				.ok_or_else(|| DbError::Internal("update op without version".into()))?;
			let updated = update_account_on(conn, account, client_version).await?;
			Ok(Some(updated.id))
		}
		BatchAction::Delete => {
			let id = op
				.id
				.clone()
				.ok_or_else(|| DbError::Internal("delete op without id".into()))?;
			soft_delete_on(conn, &id, op.client_version).await?;
			Ok(Some(id))
		}
	}
}

fn failure_outcome(index: usize, op: &AccountBatchOp, err: &DbError) -> BatchOpOutcome {
	let current_version = match err {
		DbError::VersionConflict {
			current_version, ..
		} => Some(*current_version),
		_ => None,
	};
	BatchOpOutcome {
		index,
		action: op.action,
		success: false,
		id: op.id.clone().or_else(|| op.account.as_ref().map(|a| a.id.clone())),
		error: Some(err.to_string()),
		current_version,
	}
}

/// Execute a batch on the repository's pool.
#[tracing::instrument(skip(repo, ops), fields(op_count = ops.len(), strategy = ?strategy))]
pub async fn run_account_batch(
	repo: &AccountRepository,
	ops: Vec<AccountBatchOp>,
	strategy: RollbackStrategy,
) -> Result<BatchOutcome, DbError> {
	let mut tx = repo.pool.begin().await?;
	let mut results = Vec::with_capacity(ops.len());

	for (index, op) in ops.iter().enumerate() {
		let result = match strategy {
			RollbackStrategy::FailedOnly => {
				// Nested begin issues a SAVEPOINT on the outer transaction.
				let mut savepoint = tx.begin().await?;
				match run_one(&mut savepoint, op).await {
					Ok(id) => {
						savepoint.commit().await?;
						Ok(id)
					}
					Err(err) => {
						savepoint.rollback().await?;
						Err(err)
					}
				}
			}
			_ => run_one(&mut tx, op).await,
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
				tracing::debug!(index, error = %err, "batch operation failed");
				results.push(failure_outcome(index, op, &err));
				if strategy == RollbackStrategy::All {
					tx.rollback().await?;
					// Everything before the failure is rolled back too.
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

	tx.commit().await?;
	Ok(BatchOutcome {
		results,
		committed: true,
	})
}
