// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Gateway configuration.
//!
//! Everything is driven by environment variables so replicas behind a load
//! balancer can be configured identically. Invalid numeric values fall back
//! to their defaults with a logged warning rather than failing startup.

use std::env;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::account::HeaderVersion;
use crate::account::Idp;

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
	pub host: String,
	pub port: u16,
	pub user: String,
	pub password: String,
	pub database: String,
	pub max_connections: u32,
}

impl Default for DbConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 3306,
			user: "root".to_string(),
			password: String::new(),
			database: "weft".to_string(),
			max_connections: 10,
		}
	}
}

/// Active/cooling pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePoolConfig {
	pub enabled: bool,
	/// Maximum number of accounts held hot.
	pub limit: usize,
	/// Consecutive errors before an account is demoted to cooling.
	pub error_threshold: u32,
	/// How long a demoted account sits in the cooling pool.
	pub cooling_period_ms: i64,
}

impl Default for ActivePoolConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			limit: 5,
			error_threshold: 5,
			cooling_period_ms: 10 * 60 * 1000,
		}
	}
}

/// Alerting thresholds for the pool monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
	pub min_available_accounts: usize,
	pub warning_available_accounts: usize,
	/// Error-account rate (0.0–1.0) above which a warning fires.
	pub max_error_account_rate: f64,
	pub max_db_connection_failures: u32,
}

impl Default for AlertConfig {
	fn default() -> Self {
		Self {
			min_available_accounts: 2,
			warning_available_accounts: 5,
			max_error_account_rate: 0.3,
			max_db_connection_failures: 3,
		}
	}
}

/// Full gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub port: u16,
	pub server_id: String,
	pub worker_index: u32,
	pub app_version: String,
	pub default_api_key: Option<String>,
	pub web_login_password: Option<String>,
	pub electron_auth_secret: Option<String>,
	pub jwt_secret: String,
	pub default_header_version: HeaderVersion,
	pub disable_token_refresh: bool,
	pub token_refresh_interval_secs: u64,
	pub max_account_retries: u32,
	pub active_pool: ActivePoolConfig,
	pub alerts: AlertConfig,
	pub db: DbConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			port: 3000,
			server_id: "weft-0".to_string(),
			worker_index: 0,
			app_version: env!("CARGO_PKG_VERSION").to_string(),
			default_api_key: None,
			web_login_password: None,
			electron_auth_secret: None,
			jwt_secret: "weft-dev-secret".to_string(),
			default_header_version: HeaderVersion::V2,
			disable_token_refresh: false,
			token_refresh_interval_secs: 60,
			max_account_retries: 5,
			active_pool: ActivePoolConfig::default(),
			alerts: AlertConfig::default(),
			db: DbConfig::default(),
		}
	}
}

impl Config {
	/// Load configuration from the process environment.
	pub fn from_env() -> Self {
		let defaults = Config::default();
		let db = DbConfig {
			host: env_string("DB_HOST", &defaults.db.host),
			port: env_parse("DB_PORT", defaults.db.port),
			user: env_string("DB_USER", &defaults.db.user),
			password: env_string("DB_PASSWORD", &defaults.db.password),
			database: env_string("DB_NAME", &defaults.db.database),
			max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.db.max_connections),
		};
		let active_pool = ActivePoolConfig {
			enabled: env_bool("ACTIVE_POOL_ENABLED", defaults.active_pool.enabled),
			limit: env_parse("ACTIVE_POOL_LIMIT", defaults.active_pool.limit),
			error_threshold: env_parse(
				"ACTIVE_POOL_ERROR_THRESHOLD",
				defaults.active_pool.error_threshold,
			),
			cooling_period_ms: env_parse(
				"ACTIVE_POOL_COOLING_PERIOD_MS",
				defaults.active_pool.cooling_period_ms,
			),
		};
		let alerts = AlertConfig {
			min_available_accounts: env_parse(
				"ALERT_MIN_AVAILABLE_ACCOUNTS",
				defaults.alerts.min_available_accounts,
			),
			warning_available_accounts: env_parse(
				"ALERT_WARNING_AVAILABLE_ACCOUNTS",
				defaults.alerts.warning_available_accounts,
			),
			max_error_account_rate: env_parse(
				"ALERT_MAX_ERROR_ACCOUNT_RATE",
				defaults.alerts.max_error_account_rate,
			),
			max_db_connection_failures: env_parse(
				"ALERT_MAX_DB_CONNECTION_FAILURES",
				defaults.alerts.max_db_connection_failures,
			),
		};

		Self {
			port: env_parse("PORT", defaults.port),
			server_id: env_string("SERVER_ID", &defaults.server_id),
			worker_index: env_parse("WORKER_INDEX", defaults.worker_index),
			app_version: env_string("APP_VERSION", &defaults.app_version),
			default_api_key: env::var("DEFAULT_API_KEY").ok().filter(|s| !s.is_empty()),
			web_login_password: env::var("WEB_LOGIN_PASSWORD").ok().filter(|s| !s.is_empty()),
			electron_auth_secret: env::var("ELECTRON_AUTH_SECRET").ok().filter(|s| !s.is_empty()),
			jwt_secret: env_string("JWT_SECRET", &defaults.jwt_secret),
			default_header_version: env_header_version(
				"DEFAULT_HEADER_VERSION",
				defaults.default_header_version,
			),
			disable_token_refresh: env_bool("DISABLE_TOKEN_REFRESH", false),
			token_refresh_interval_secs: env_parse(
				"TOKEN_REFRESH_INTERVAL_SECS",
				defaults.token_refresh_interval_secs,
			),
			max_account_retries: env_parse("MAX_ACCOUNT_RETRIES", defaults.max_account_retries),
			active_pool,
			alerts,
			db,
		}
	}

	/// Header version to assign a freshly created account for `idp`,
	/// honoring per-IDP environment overrides before the global default.
	pub fn header_version_for(&self, idp: Idp) -> HeaderVersion {
		let override_key = match idp {
			Idp::AwsIdC => "HEADER_VERSION_IDC",
			Idp::BuilderId => "HEADER_VERSION_BUILDER_ID",
			Idp::Github => "HEADER_VERSION_GITHUB",
			Idp::Google => "HEADER_VERSION_GOOGLE",
		};
		if let Ok(raw) = env::var(override_key) {
			if let Some(v) = raw.parse::<u8>().ok().and_then(HeaderVersion::from_u8) {
				return v;
			}
			warn!(key = override_key, value = %raw, "invalid header version override, ignoring");
		}
		match idp {
			Idp::AwsIdC | Idp::BuilderId => HeaderVersion::V2,
			Idp::Github | Idp::Google => HeaderVersion::V1,
		}
	}
}

fn env_string(key: &str, default: &str) -> String {
	env::var(key).ok().filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
	match env::var(key) {
		Ok(raw) => match raw.parse() {
			Ok(v) => v,
			Err(_) => {
				warn!(key, value = %raw, "invalid numeric value, using default");
				default
			}
		},
		Err(_) => default,
	}
}

fn env_bool(key: &str, default: bool) -> bool {
	match env::var(key) {
		Ok(raw) => matches!(raw.as_str(), "1" | "true" | "TRUE" | "yes"),
		Err(_) => default,
	}
}

fn env_header_version(key: &str, default: HeaderVersion) -> HeaderVersion {
	match env::var(key) {
		Ok(raw) => raw
			.parse::<u8>()
			.ok()
			.and_then(HeaderVersion::from_u8)
			.unwrap_or_else(|| {
				warn!(key, value = %raw, "invalid header version, using default");
				default
			}),
		Err(_) => default,
	}
}
