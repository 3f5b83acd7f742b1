// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pool health scoring and alerting.

use serde::Serialize;

use weft_core::config::AlertConfig;

/// Inputs to the health score, a point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthInputs {
	pub db_healthy: bool,
	pub total_accounts: usize,
	pub active_accounts: usize,
	pub error_accounts: usize,
	pub expired_accounts: usize,
	pub available_accounts: usize,
	pub cache_hit_rate: f64,
	pub db_failures_in_window: u32,
}

/// Health report served by `/api/health` and `getPoolHealth`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolHealth {
	pub healthy: bool,
	pub score: i32,
	pub db_healthy: bool,
	pub total_accounts: usize,
	pub active_accounts: usize,
	pub error_accounts: usize,
	pub expired_accounts: usize,
	pub available_accounts: usize,
	pub cache_hit_rate: f64,
}

/// Score the pool in `[0, 100]`.
///
/// Deductions: −50 DB unhealthy, −30 no active accounts, −20/−10 for the
/// high error-rate tiers, −10 high expired rate, −5 low cache-hit rate.
pub fn score(inputs: &HealthInputs) -> PoolHealth {
	let mut score = 100i32;

	if !inputs.db_healthy {
		score -= 50;
	}
	if inputs.active_accounts == 0 {
		score -= 30;
	}

	let total = inputs.total_accounts.max(1) as f64;
	let error_rate = inputs.error_accounts as f64 / total;
	if error_rate > 0.5 {
		score -= 20;
	} else if error_rate > 0.3 {
		score -= 10;
	}

	let expired_rate = inputs.expired_accounts as f64 / total;
	if expired_rate > 0.3 {
		score -= 10;
	}

	if inputs.cache_hit_rate < 0.5 {
		score -= 5;
	}

	let score = score.clamp(0, 100);
	PoolHealth {
		healthy: score >= 60,
		score,
		db_healthy: inputs.db_healthy,
		total_accounts: inputs.total_accounts,
		active_accounts: inputs.active_accounts,
		error_accounts: inputs.error_accounts,
		expired_accounts: inputs.expired_accounts,
		available_accounts: inputs.available_accounts,
		cache_hit_rate: inputs.cache_hit_rate,
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
	Warning,
	Critical,
}

/// One fired alert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
	pub severity: AlertSeverity,
	pub code: &'static str,
	pub message: String,
}

/// Evaluate the monitor thresholds against the current inputs.
pub fn evaluate_alerts(inputs: &HealthInputs, config: &AlertConfig) -> Vec<Alert> {
	let mut alerts = Vec::new();

	if inputs.available_accounts < config.min_available_accounts {
		alerts.push(Alert {
			severity: AlertSeverity::Critical,
			code: "available_accounts_critical",
			message: format!(
				"only {} available accounts (minimum {})",
				inputs.available_accounts, config.min_available_accounts
			),
		});
	} else if inputs.available_accounts < config.warning_available_accounts {
		alerts.push(Alert {
			severity: AlertSeverity::Warning,
			code: "available_accounts_low",
			message: format!(
				"{} available accounts (warning below {})",
				inputs.available_accounts, config.warning_available_accounts
			),
		});
	}

	let total = inputs.total_accounts.max(1) as f64;
	let error_rate = inputs.error_accounts as f64 / total;
	if error_rate > 0.5 {
		alerts.push(Alert {
			severity: AlertSeverity::Critical,
			code: "error_rate_critical",
			message: format!("error account rate {:.0}%", error_rate * 100.0),
		});
	} else if error_rate > config.max_error_account_rate {
		alerts.push(Alert {
			severity: AlertSeverity::Warning,
			code: "error_rate_high",
			message: format!("error account rate {:.0}%", error_rate * 100.0),
		});
	}

	if inputs.db_failures_in_window >= config.max_db_connection_failures {
		alerts.push(Alert {
			severity: AlertSeverity::Critical,
			code: "db_connection_failures",
			message: format!(
				"{} database connection failures in window",
				inputs.db_failures_in_window
			),
		});
	}

	alerts
}
