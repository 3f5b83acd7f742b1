// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tag repository.

use async_trait::async_trait;
use sqlx::MySqlPool;

use weft_core::{now_ms, Tag};

use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct TagRow {
	id: String,
	name: String,
	color: Option<String>,
	version: i64,
	updated_at: i64,
}

impl From<TagRow> for Tag {
	fn from(row: TagRow) -> Self {
		Tag {
			id: row.id,
			name: row.name,
			color: row.color,
			version: row.version,
			updated_at: row.updated_at,
		}
	}
}

const COLUMNS: &str = "id, name, color, version, updated_at";

#[async_trait]
pub trait TagStore: Send + Sync {
	async fn list_tags(&self) -> Result<Vec<Tag>, DbError>;
	async fn get_tag(&self, id: &str) -> Result<Option<Tag>, DbError>;
	async fn create_tag(&self, tag: Tag) -> Result<Tag, DbError>;
	async fn update_tag(&self, tag: Tag, client_version: i64) -> Result<Tag, DbError>;
	async fn delete_tag(&self, id: &str, client_version: Option<i64>) -> Result<(), DbError>;
}

#[derive(Clone)]
pub struct TagRepository {
	pool: MySqlPool,
}

impl TagRepository {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl TagStore for TagRepository {
	async fn list_tags(&self) -> Result<Vec<Tag>, DbError> {
		let rows =
			sqlx::query_as::<_, TagRow>(&format!("SELECT {COLUMNS} FROM tags ORDER BY name ASC"))
				.fetch_all(&self.pool)
				.await?;
		Ok(rows.into_iter().map(Tag::from).collect())
	}

	async fn get_tag(&self, id: &str) -> Result<Option<Tag>, DbError> {
		let row = sqlx::query_as::<_, TagRow>(&format!("SELECT {COLUMNS} FROM tags WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(Tag::from))
	}

	#[tracing::instrument(skip(self, tag), fields(tag_id = %tag.id))]
	async fn create_tag(&self, mut tag: Tag) -> Result<Tag, DbError> {
		tag.version = 1;
		tag.updated_at = now_ms();
		sqlx::query("INSERT INTO tags (id, name, color, version, updated_at) VALUES (?, ?, ?, ?, ?)")
			.bind(&tag.id)
			.bind(&tag.name)
			.bind(&tag.color)
			.bind(tag.version)
			.bind(tag.updated_at)
			.execute(&self.pool)
			.await?;
		Ok(tag)
	}

	#[tracing::instrument(skip(self, tag), fields(tag_id = %tag.id, client_version))]
	async fn update_tag(&self, mut tag: Tag, client_version: i64) -> Result<Tag, DbError> {
		let mut tx = self.pool.begin().await?;

		let current =
			sqlx::query_as::<_, TagRow>(&format!("SELECT {COLUMNS} FROM tags WHERE id = ? FOR UPDATE"))
				.bind(&tag.id)
				.fetch_optional(&mut *tx)
				.await?
				.map(Tag::from)
				.ok_or_else(|| DbError::NotFound(format!("tag {}", tag.id)))?;

		if current.version != client_version {
			tx.rollback().await?;
			return Err(DbError::VersionConflict {
				expected: client_version,
				current_version: current.version,
				server_data: serde_json::to_value(&current)?,
			});
		}

		tag.version = current.version + 1;
		tag.updated_at = now_ms();
		sqlx::query("UPDATE tags SET name = ?, color = ?, version = ?, updated_at = ? WHERE id = ?")
			.bind(&tag.name)
			.bind(&tag.color)
			.bind(tag.version)
			.bind(tag.updated_at)
			.bind(&tag.id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(tag)
	}

	#[tracing::instrument(skip(self))]
	async fn delete_tag(&self, id: &str, client_version: Option<i64>) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		let current =
			sqlx::query_as::<_, TagRow>(&format!("SELECT {COLUMNS} FROM tags WHERE id = ? FOR UPDATE"))
				.bind(id)
				.fetch_optional(&mut *tx)
				.await?
				.map(Tag::from)
				.ok_or_else(|| DbError::NotFound(format!("tag {id}")))?;

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

		sqlx::query("DELETE FROM tags WHERE id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}
}
