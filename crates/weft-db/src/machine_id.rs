// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Machine-id bindings.
//!
//! One current binding per account plus an append-only history of every
//! change. History rows are never updated or deleted through this API.

use async_trait::async_trait;
use sqlx::MySqlPool;
use uuid::Uuid;

use weft_core::{now_ms, MachineIdBinding, MachineIdHistoryEntry};

use crate::error::DbError;

#[async_trait]
pub trait MachineIdStore: Send + Sync {
	async fn get_binding(&self, account_id: &str) -> Result<Option<MachineIdBinding>, DbError>;
	/// Bind `machine_id` to the account, appending a history entry when the
	/// value actually changed.
	async fn bind(&self, account_id: &str, machine_id: &str) -> Result<MachineIdBinding, DbError>;
	async fn history(&self, account_id: &str) -> Result<Vec<MachineIdHistoryEntry>, DbError>;
}

#[derive(Clone)]
pub struct MachineIdRepository {
	pool: MySqlPool,
}

impl MachineIdRepository {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl MachineIdStore for MachineIdRepository {
	async fn get_binding(&self, account_id: &str) -> Result<Option<MachineIdBinding>, DbError> {
		let row: Option<(String, String, i64)> = sqlx::query_as(
			"SELECT account_id, machine_id, updated_at FROM account_machine_ids WHERE account_id = ?",
		)
		.bind(account_id)
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(|(account_id, machine_id, updated_at)| MachineIdBinding {
			account_id,
			machine_id,
			updated_at,
		}))
	}

	#[tracing::instrument(skip(self))]
	async fn bind(&self, account_id: &str, machine_id: &str) -> Result<MachineIdBinding, DbError> {
		let now = now_ms();
		let mut tx = self.pool.begin().await?;

		let existing: Option<(String,)> = sqlx::query_as(
			"SELECT machine_id FROM account_machine_ids WHERE account_id = ? FOR UPDATE",
		)
		.bind(account_id)
		.fetch_optional(&mut *tx)
		.await?;

		let changed = existing.as_ref().map(|(m,)| m.as_str()) != Some(machine_id);

		match existing {
			Some(_) => {
				sqlx::query(
					"UPDATE account_machine_ids SET machine_id = ?, updated_at = ? WHERE account_id = ?",
				)
				.bind(machine_id)
				.bind(now)
				.bind(account_id)
				.execute(&mut *tx)
				.await?;
			}
			None => {
				sqlx::query(
					"INSERT INTO account_machine_ids (account_id, machine_id, updated_at) VALUES (?, ?, ?)",
				)
				.bind(account_id)
				.bind(machine_id)
				.bind(now)
				.execute(&mut *tx)
				.await?;
			}
		}

		if changed {
			sqlx::query(
				"INSERT INTO machine_id_history (id, account_id, machine_id, changed_at) VALUES (?, ?, ?, ?)",
			)
			.bind(Uuid::new_v4().to_string())
			.bind(account_id)
			.bind(machine_id)
			.bind(now)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(MachineIdBinding {
			account_id: account_id.to_string(),
			machine_id: machine_id.to_string(),
			updated_at: now,
		})
	}

	async fn history(&self, account_id: &str) -> Result<Vec<MachineIdHistoryEntry>, DbError> {
		let rows: Vec<(String, String, i64)> = sqlx::query_as(
			"SELECT account_id, machine_id, changed_at FROM machine_id_history \
			 WHERE account_id = ? ORDER BY changed_at DESC",
		)
		.bind(account_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows
			.into_iter()
			.map(|(account_id, machine_id, changed_at)| MachineIdHistoryEntry {
				account_id,
				machine_id,
				changed_at,
			})
			.collect())
	}
}
