// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Group repository.
//!
//! Groups scope API keys; `find_by_api_key` backs the bearer-auth lookup
//! and is the hot read, everything else is admin CRUD with the standard
//! optimistic-version protocol.

use async_trait::async_trait;
use sqlx::MySqlPool;

use weft_core::{now_ms, Group};

use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct GroupRow {
	id: String,
	name: String,
	api_key: Option<String>,
	color: Option<String>,
	sort_order: i64,
	description: Option<String>,
	version: i64,
	updated_at: i64,
}

impl From<GroupRow> for Group {
	fn from(row: GroupRow) -> Self {
		Group {
			id: row.id,
			name: row.name,
			api_key: row.api_key,
			color: row.color,
			order: row.sort_order,
			description: row.description,
			version: row.version,
			updated_at: row.updated_at,
		}
	}
}

const COLUMNS: &str = "id, name, api_key, color, sort_order, description, version, updated_at";

#[async_trait]
pub trait GroupStore: Send + Sync {
	async fn list_groups(&self) -> Result<Vec<Group>, DbError>;
	async fn get_group(&self, id: &str) -> Result<Option<Group>, DbError>;
	async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Group>, DbError>;
	async fn create_group(&self, group: Group) -> Result<Group, DbError>;
	async fn update_group(&self, group: Group, client_version: i64) -> Result<Group, DbError>;
	async fn delete_group(&self, id: &str, client_version: Option<i64>) -> Result<(), DbError>;
}

#[derive(Clone)]
pub struct GroupRepository {
	pool: MySqlPool,
}

impl GroupRepository {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl GroupStore for GroupRepository {
	#[tracing::instrument(skip(self))]
	async fn list_groups(&self) -> Result<Vec<Group>, DbError> {
		let rows = sqlx::query_as::<_, GroupRow>(&format!(
			"SELECT {COLUMNS} FROM `groups` ORDER BY sort_order ASC, name ASC"
		))
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.into_iter().map(Group::from).collect())
	}

	async fn get_group(&self, id: &str) -> Result<Option<Group>, DbError> {
		let row = sqlx::query_as::<_, GroupRow>(&format!("SELECT {COLUMNS} FROM `groups` WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(Group::from))
	}

	#[tracing::instrument(skip(self, api_key))]
	async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Group>, DbError> {
		let row = sqlx::query_as::<_, GroupRow>(&format!(
			"SELECT {COLUMNS} FROM `groups` WHERE api_key = ?"
		))
		.bind(api_key)
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(Group::from))
	}

	#[tracing::instrument(skip(self, group), fields(group_id = %group.id))]
	async fn create_group(&self, mut group: Group) -> Result<Group, DbError> {
		group.version = 1;
		group.updated_at = now_ms();
		sqlx::query(
			"INSERT INTO `groups` (id, name, api_key, color, sort_order, description, version, updated_at) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(&group.id)
		.bind(&group.name)
		.bind(&group.api_key)
		.bind(&group.color)
		.bind(group.order)
		.bind(&group.description)
		.bind(group.version)
		.bind(group.updated_at)
		.execute(&self.pool)
		.await?;
		tracing::debug!(group_id = %group.id, "group created");
		Ok(group)
	}

	#[tracing::instrument(skip(self, group), fields(group_id = %group.id, client_version))]
	async fn update_group(&self, mut group: Group, client_version: i64) -> Result<Group, DbError> {
		let mut tx = self.pool.begin().await?;

		let current = sqlx::query_as::<_, GroupRow>(&format!(
			"SELECT {COLUMNS} FROM `groups` WHERE id = ? FOR UPDATE"
		))
		.bind(&group.id)
		.fetch_optional(&mut *tx)
		.await?
		.map(Group::from)
		.ok_or_else(|| DbError::NotFound(format!("group {}", group.id)))?;

		if current.version != client_version {
			tx.rollback().await?;
			return Err(DbError::VersionConflict {
				expected: client_version,
				current_version: current.version,
				server_data: serde_json::to_value(&current)?,
			});
		}

		group.version = current.version + 1;
		group.updated_at = now_ms();
		sqlx::query(
			"UPDATE `groups` SET name = ?, api_key = ?, color = ?, sort_order = ?, description = ?, \
			 version = ?, updated_at = ? WHERE id = ?",
		)
		.bind(&group.name)
		.bind(&group.api_key)
		.bind(&group.color)
		.bind(group.order)
		.bind(&group.description)
		.bind(group.version)
		.bind(group.updated_at)
		.bind(&group.id)
		.execute(&mut *tx)
		.await?;
		tx.commit().await?;
		Ok(group)
	}

	#[tracing::instrument(skip(self))]
	async fn delete_group(&self, id: &str, client_version: Option<i64>) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		let current = sqlx::query_as::<_, GroupRow>(&format!(
			"SELECT {COLUMNS} FROM `groups` WHERE id = ? FOR UPDATE"
		))
		.bind(id)
		.fetch_optional(&mut *tx)
		.await?
		.map(Group::from)
		.ok_or_else(|| DbError::NotFound(format!("group {id}")))?;

		if let Some(expected) = client_version {
			if current.version != expected {
				tx.rollback().await?;
				return Err(DbError::VersionConflict {
					expected,
					current_version: current.version,
					server_data: serde_json::to_value(&current)?,
				});
			}
		}

		// Detach members before removing the group itself.
		sqlx::query("UPDATE accounts SET group_id = NULL, version = version + 1, updated_at = ? WHERE group_id = ?")
			.bind(now_ms())
			.bind(id)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM `groups` WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::info!(group_id = %id, "group deleted");
		Ok(())
	}
}
