// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Background control loops.
//!
//! Independent tickers: active-pool maintenance (1 min), the pool alert
//! monitor (5 min), and log cleanup (hourly, dropping rows older than a
//! day). The token refresher has its own loop in `weft-refresh`.

use std::sync::Arc;
use std::time::Duration;

use weft_core::now_ms;
use weft_db::LogStore;
use weft_pool::AccountPool;

pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const LOG_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const LOG_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// Active/cooling pool maintenance tick.
pub fn spawn_pool_maintenance(pool: Arc<AccountPool>) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
		ticker.tick().await;
		loop {
			ticker.tick().await;
			if let Err(e) = pool.maintenance_tick().await {
				tracing::warn!(error = %e, "pool maintenance tick failed");
			}
		}
	})
}

/// Pool health monitor firing alert logs.
pub fn spawn_pool_monitor(pool: Arc<AccountPool>) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
		ticker.tick().await;
		loop {
			ticker.tick().await;
			let alerts = pool.monitor_tick().await;
			if alerts.is_empty() {
				tracing::debug!("pool monitor: no alerts");
			}
		}
	})
}

/// Hourly log table pruning.
pub fn spawn_log_cleanup(logs: Arc<dyn LogStore>) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(LOG_CLEANUP_INTERVAL);
		ticker.tick().await;
		loop {
			ticker.tick().await;
			let cutoff = now_ms() - LOG_RETENTION_MS;
			match logs.delete_logs_older_than(cutoff).await {
				Ok(removed) if removed > 0 => {
					tracing::info!(removed, "log cleanup finished");
				}
				Ok(_) => {}
				Err(e) => tracing::warn!(error = %e, "log cleanup failed"),
			}
		}
	})
}
