// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway error taxonomy.
//!
//! Every error that reaches a client is one of the [`ErrorCode`] classes,
//! carries a request id for log correlation, and (for conflicts) the
//! server's current representation so the client can retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::now_ms;

/// Stable error classes with their HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	ValidationError,
	AuthError,
	Forbidden,
	NotFound,
	ConflictError,
	QuotaExhausted,
	AccountBanned,
	RateLimited,
	NoAvailableAccounts,
	UpstreamUnavailable,
	InternalError,
}

impl ErrorCode {
	pub fn http_status(&self) -> u16 {
		match self {
			ErrorCode::ValidationError => 400,
			ErrorCode::AuthError => 401,
			ErrorCode::QuotaExhausted => 402,
			ErrorCode::Forbidden | ErrorCode::AccountBanned => 403,
			ErrorCode::NotFound => 404,
			ErrorCode::ConflictError => 409,
			ErrorCode::RateLimited => 429,
			ErrorCode::InternalError => 500,
			ErrorCode::NoAvailableAccounts | ErrorCode::UpstreamUnavailable => 503,
		}
	}
}

/// Generate a request id: `req_<epoch_ms>_<random>`.
pub fn new_request_id() -> String {
	let mut rng = [0u8; 4];
	rand::Rng::fill(&mut rand::thread_rng(), &mut rng[..]);
	format!(
		"req_{}_{:08x}",
		now_ms(),
		u32::from_be_bytes(rng)
	)
}

/// An error ready to be rendered to a client.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
	pub code: ErrorCode,
	pub message: String,
	pub request_id: String,
	/// For version conflicts: the row's current version.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_version: Option<i64>,
	/// For conflicts and 503s: the server's view of the contested state.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub server_data: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retryable: Option<bool>,
}

impl ApiError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			request_id: new_request_id(),
			current_version: None,
			server_data: None,
			retryable: None,
		}
	}

	pub fn validation(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::ValidationError, message)
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::NotFound, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InternalError, message)
	}

	/// Version conflict carrying the winning row.
	pub fn conflict(current_version: i64, server_data: serde_json::Value) -> Self {
		Self {
			current_version: Some(current_version),
			server_data: Some(server_data),
			retryable: Some(true),
			..Self::new(ErrorCode::ConflictError, "version conflict")
		}
	}

	pub fn with_server_data(mut self, data: serde_json::Value) -> Self {
		self.server_data = Some(data);
		self
	}

	pub fn http_status(&self) -> u16 {
		self.code.http_status()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_id_shape() {
		let id = new_request_id();
		assert!(id.starts_with("req_"));
		let parts: Vec<&str> = id.split('_').collect();
		assert_eq!(parts.len(), 3);
		assert!(parts[1].parse::<i64>().unwrap() > 0);
		assert_eq!(parts[2].len(), 8);
	}

	#[test]
	fn conflict_carries_server_state() {
		let err = ApiError::conflict(7, serde_json::json!({"id": "a"}));
		assert_eq!(err.http_status(), 409);
		assert_eq!(err.current_version, Some(7));
		assert_eq!(err.retryable, Some(true));
	}

	#[test]
	fn status_mapping() {
		assert_eq!(ErrorCode::QuotaExhausted.http_status(), 402);
		assert_eq!(ErrorCode::AccountBanned.http_status(), 403);
		assert_eq!(ErrorCode::NoAvailableAccounts.http_status(), 503);
		assert_eq!(ErrorCode::RateLimited.http_status(), 429);
	}
}
