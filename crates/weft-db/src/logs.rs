// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request and system log persistence.
//!
//! Both tables are append-only and trimmed by the hourly cleanup job.
//! Writers batch entries through a channel so a slow database never blocks
//! a response.

use async_trait::async_trait;
use sqlx::MySqlPool;
use uuid::Uuid;

use weft_core::now_ms;

use crate::error::DbError;

/// One completed (or failed) inbound chat request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
	pub request_id: String,
	pub group_id: Option<String>,
	pub account_id: Option<String>,
	pub model: String,
	pub endpoint: String,
	pub status: u16,
	pub latency_ms: i64,
	pub prompt_tokens: i64,
	pub completion_tokens: i64,
	pub error: Option<String>,
}

/// One internal event worth keeping (pool transitions, refresher outcomes).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLogEntry {
	pub level: String,
	pub source: String,
	pub message: String,
	pub detail: Option<serde_json::Value>,
}

#[async_trait]
pub trait LogStore: Send + Sync {
	async fn write_request_logs(&self, entries: &[RequestLogEntry]) -> Result<(), DbError>;
	async fn write_system_log(&self, entry: &SystemLogEntry) -> Result<(), DbError>;
	/// Delete log rows older than `cutoff_ms`; returns rows removed.
	async fn delete_logs_older_than(&self, cutoff_ms: i64) -> Result<u64, DbError>;
}

#[derive(Clone)]
pub struct LogRepository {
	pool: MySqlPool,
}

impl LogRepository {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl LogStore for LogRepository {
	#[tracing::instrument(skip(self, entries), fields(count = entries.len()))]
	async fn write_request_logs(&self, entries: &[RequestLogEntry]) -> Result<(), DbError> {
		if entries.is_empty() {
			return Ok(());
		}
		let now = now_ms();
		let mut tx = self.pool.begin().await?;
		for entry in entries {
			sqlx::query(
				"INSERT INTO api_request_logs (id, request_id, group_id, account_id, model, \
				 endpoint, status, latency_ms, prompt_tokens, completion_tokens, error, created_at) \
				 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
			)
			.bind(Uuid::new_v4().to_string())
			.bind(&entry.request_id)
			.bind(&entry.group_id)
			.bind(&entry.account_id)
			.bind(&entry.model)
			.bind(&entry.endpoint)
			.bind(i64::from(entry.status))
			.bind(entry.latency_ms)
			.bind(entry.prompt_tokens)
			.bind(entry.completion_tokens)
			.bind(&entry.error)
			.bind(now)
			.execute(&mut *tx)
			.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	async fn write_system_log(&self, entry: &SystemLogEntry) -> Result<(), DbError> {
		let detail = entry.detail.as_ref().map(serde_json::Value::to_string);
		sqlx::query(
			"INSERT INTO system_logs (id, level, source, message, detail, created_at) \
			 VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(Uuid::new_v4().to_string())
		.bind(&entry.level)
		.bind(&entry.source)
		.bind(&entry.message)
		.bind(detail)
		.bind(now_ms())
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn delete_logs_older_than(&self, cutoff_ms: i64) -> Result<u64, DbError> {
		let requests = sqlx::query("DELETE FROM api_request_logs WHERE created_at < ?")
			.bind(cutoff_ms)
			.execute(&self.pool)
			.await?;
		let system = sqlx::query("DELETE FROM system_logs WHERE created_at < ?")
			.bind(cutoff_ms)
			.execute(&self.pool)
			.await?;
		let removed = requests.rows_affected() + system.rows_affected();
		if removed > 0 {
			tracing::debug!(removed, "log cleanup removed rows");
		}
		Ok(removed)
	}
}
