// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};

use weft_core::config::DbConfig;

use crate::error::DbError;

/// Retry policy for transient storage failures.
pub const RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 100;
pub const RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Create a MySqlPool from gateway configuration.
///
/// # Errors
/// Returns `DbError::Unavailable` if the server cannot be reached.
#[tracing::instrument(skip(config), fields(host = %config.host, database = %config.database))]
pub async fn create_pool(config: &DbConfig) -> Result<MySqlPool, DbError> {
	let options = MySqlConnectOptions::new()
		.host(&config.host)
		.port(config.port)
		.username(&config.user)
		.password(&config.password)
		.database(&config.database);

	let pool = MySqlPoolOptions::new()
		.max_connections(config.max_connections)
		.acquire_timeout(Duration::from_secs(10))
		.connect_with(options)
		.await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Run `op` with retry on transient errors.
///
/// Backoff starts at 100 ms and doubles per attempt, capped at 2 s, for at
/// most 3 attempts. Non-transient errors propagate immediately.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, DbError>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, DbError>>,
{
	let mut attempt = 0;
	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(err) if err.is_transient() && attempt + 1 < RETRY_ATTEMPTS => {
				let delay = backoff_delay_ms(attempt);
				attempt += 1;
				tracing::warn!(
					operation = op_name,
					attempt,
					delay_ms = delay,
					error = %err,
					"transient storage error, retrying"
				);
				tokio::time::sleep(Duration::from_millis(delay)).await;
			}
			Err(err) => return Err(err),
		}
	}
}

/// Delay before retry number `attempt + 1` (0-based).
pub fn backoff_delay_ms(attempt: u32) -> u64 {
	(RETRY_BASE_DELAY_MS << attempt).min(RETRY_MAX_DELAY_MS)
}

/// Result of the `SELECT 1` health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthProbe {
	pub healthy: bool,
	pub latency_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Probe the database with `SELECT 1` and report latency.
pub async fn healthcheck(pool: &MySqlPool) -> HealthProbe {
	let start = std::time::Instant::now();
	match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
		Ok(_) => HealthProbe {
			healthy: true,
			latency_ms: start.elapsed().as_millis() as u64,
			error: None,
		},
		Err(e) => HealthProbe {
			healthy: false,
			latency_ms: start.elapsed().as_millis() as u64,
			error: Some(e.to_string()),
		},
	}
}
