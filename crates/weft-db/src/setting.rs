// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Settings repository.
//!
//! Settings are keyed rows with a typed value stored as `(value_type, raw)`
//! text; [`weft_core::SettingValue`] handles the encode/decode.

use async_trait::async_trait;
use sqlx::MySqlPool;

use weft_core::{now_ms, Setting, SettingValue};

use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SettingRow {
	setting_key: String,
	value_type: String,
	value_raw: String,
	version: i64,
	updated_at: i64,
}

impl From<SettingRow> for Setting {
	fn from(row: SettingRow) -> Self {
		Setting {
			key: row.setting_key,
			value: SettingValue::decode(&row.value_type, &row.value_raw),
			version: row.version,
			updated_at: row.updated_at,
		}
	}
}

const COLUMNS: &str = "setting_key, value_type, value_raw, version, updated_at";

#[async_trait]
pub trait SettingStore: Send + Sync {
	async fn list_settings(&self) -> Result<Vec<Setting>, DbError>;
	async fn get_setting(&self, key: &str) -> Result<Option<Setting>, DbError>;
	/// Create-or-update; the version check applies only to updates and only
	/// when `client_version` is supplied.
	async fn put_setting(
		&self,
		key: &str,
		value: SettingValue,
		client_version: Option<i64>,
	) -> Result<Setting, DbError>;
	async fn delete_setting(&self, key: &str, client_version: Option<i64>) -> Result<(), DbError>;
}

#[derive(Clone)]
pub struct SettingRepository {
	pool: MySqlPool,
}

impl SettingRepository {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl SettingStore for SettingRepository {
	async fn list_settings(&self) -> Result<Vec<Setting>, DbError> {
		let rows = sqlx::query_as::<_, SettingRow>(&format!(
			"SELECT {COLUMNS} FROM settings ORDER BY setting_key ASC"
		))
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.into_iter().map(Setting::from).collect())
	}

	async fn get_setting(&self, key: &str) -> Result<Option<Setting>, DbError> {
		let row = sqlx::query_as::<_, SettingRow>(&format!(
			"SELECT {COLUMNS} FROM settings WHERE setting_key = ?"
		))
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(Setting::from))
	}

	#[tracing::instrument(skip(self, value))]
	async fn put_setting(
		&self,
		key: &str,
		value: SettingValue,
		client_version: Option<i64>,
	) -> Result<Setting, DbError> {
		let now = now_ms();
		let (kind, raw) = value.encode();
		let mut tx = self.pool.begin().await?;

		let current = sqlx::query_as::<_, SettingRow>(&format!(
			"SELECT {COLUMNS} FROM settings WHERE setting_key = ? FOR UPDATE"
		))
		.bind(key)
		.fetch_optional(&mut *tx)
		.await?
		.map(Setting::from);

		let stored = match current {
			None => {
				sqlx::query(
					"INSERT INTO settings (setting_key, value_type, value_raw, version, updated_at) \
					 VALUES (?, ?, ?, 1, ?)",
				)
				.bind(key)
				.bind(kind)
				.bind(&raw)
				.bind(now)
				.execute(&mut *tx)
				.await?;
				Setting {
					key: key.to_string(),
					value,
					version: 1,
					updated_at: now,
				}
			}
			Some(current) => {
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
				let next_version = current.version + 1;
				sqlx::query(
					"UPDATE settings SET value_type = ?, value_raw = ?, version = ?, updated_at = ? \
					 WHERE setting_key = ?",
				)
				.bind(kind)
				.bind(&raw)
				.bind(next_version)
				.bind(now)
				.bind(key)
				.execute(&mut *tx)
				.await?;
				Setting {
					key: key.to_string(),
					value,
					version: next_version,
					updated_at: now,
				}
			}
		};

		tx.commit().await?;
		Ok(stored)
	}

	#[tracing::instrument(skip(self))]
	async fn delete_setting(&self, key: &str, client_version: Option<i64>) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		let current = sqlx::query_as::<_, SettingRow>(&format!(
			"SELECT {COLUMNS} FROM settings WHERE setting_key = ? FOR UPDATE"
		))
		.bind(key)
		.fetch_optional(&mut *tx)
		.await?
		.map(Setting::from)
		.ok_or_else(|| DbError::NotFound(format!("setting {key}")))?;

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

		sqlx::query("DELETE FROM settings WHERE setting_key = ?")
			.bind(key)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}
}
