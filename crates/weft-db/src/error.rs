// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database error classification.
//!
//! Raw driver errors are sorted into classes the callers act on: transient
//! classes are retried by [`crate::with_retry`], conflicts surface as HTTP
//! 409, connection failures flip the pool into stale-cache mode.

use weft_core::{ApiError, ErrorCode};

// MySQL server error numbers this layer reacts to.
const ER_DUP_ENTRY: u16 = 1062;
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
const ER_LOCK_DEADLOCK: u16 = 1213;
const ER_NO_REFERENCED_ROW_2: u16 = 1452;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Version conflict: expected {expected}, current {current_version}")]
	VersionConflict {
		expected: i64,
		current_version: i64,
		/// Full current representation of the contested row.
		server_data: serde_json::Value,
	},

	#[error("Constraint violation: {0}")]
	Constraint(String),

	#[error("Lock timeout: {0}")]
	LockTimeout(String),

	#[error("Database unavailable: {0}")]
	Unavailable(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for DbError {
	fn from(err: sqlx::Error) -> Self {
		classify(err)
	}
}

/// Sort a driver error into the class callers dispatch on.
fn classify(err: sqlx::Error) -> DbError {
	match &err {
		sqlx::Error::RowNotFound => DbError::NotFound("row not found".to_string()),
		sqlx::Error::PoolTimedOut => DbError::Unavailable("connection pool timed out".to_string()),
		sqlx::Error::PoolClosed => DbError::Unavailable("connection pool closed".to_string()),
		sqlx::Error::Io(e) => DbError::Unavailable(format!("connection failure: {e}")),
		sqlx::Error::Tls(e) => DbError::Unavailable(format!("tls failure: {e}")),
		sqlx::Error::Database(db) => {
			let number = db
				.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
				.map(|e| e.number());
			match number {
				Some(ER_LOCK_DEADLOCK) => DbError::Conflict("deadlock detected".to_string()),
				Some(ER_LOCK_WAIT_TIMEOUT) => DbError::Conflict("lock wait timeout".to_string()),
				Some(ER_DUP_ENTRY) => DbError::Constraint(db.message().to_string()),
				Some(ER_NO_REFERENCED_ROW_2) => DbError::Constraint(db.message().to_string()),
				_ => DbError::Sqlx(err),
			}
		}
		_ => DbError::Sqlx(err),
	}
}

impl DbError {
	/// Whether a retry with backoff may succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			DbError::Unavailable(_) => true,
			DbError::Conflict(msg) => {
				msg.contains("deadlock") || msg.contains("lock wait timeout")
			}
			_ => false,
		}
	}

	/// Map to the client-facing error taxonomy.
	pub fn to_api_error(&self) -> ApiError {
		match self {
			DbError::NotFound(msg) => ApiError::not_found(msg.clone()),
			DbError::VersionConflict {
				current_version,
				server_data,
				..
			} => ApiError::conflict(*current_version, server_data.clone()),
			DbError::Conflict(msg) => ApiError::new(ErrorCode::ConflictError, msg.clone()),
			DbError::Constraint(msg) => {
				if msg.contains("Duplicate entry") {
					ApiError::new(ErrorCode::ConflictError, msg.clone())
				} else {
					ApiError::validation(msg.clone())
				}
			}
			DbError::Unavailable(msg) => ApiError::new(ErrorCode::UpstreamUnavailable, msg.clone()),
			DbError::LockTimeout(msg) => ApiError::new(ErrorCode::ConflictError, msg.clone()),
			_ => ApiError::internal("storage operation failed"),
		}
	}
}

pub type Result<T> = std::result::Result<T, DbError>;
