// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP error rendering.
//!
//! Two shapes leave this server: authentication failures use the
//! `{"error":{"message","type":"authentication_error","code"}}` body the
//! API clients expect, everything else uses the generic error envelope
//! with the request id and, for conflicts, the server's current data.
//! Claude routes re-render through the Anthropic error schema instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use weft_core::{ApiError, ErrorCode};

/// Specific 401 classes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
	MissingAuthorization,
	InvalidAuthorizationFormat,
	InvalidApiKey,
	TokenExpired,
}

impl AuthFailure {
	pub fn code(&self) -> &'static str {
		match self {
			AuthFailure::MissingAuthorization => "missing_authorization",
			AuthFailure::InvalidAuthorizationFormat => "invalid_authorization_format",
			AuthFailure::InvalidApiKey => "invalid_api_key",
			AuthFailure::TokenExpired => "token_expired",
		}
	}

	pub fn message(&self) -> &'static str {
		match self {
			AuthFailure::MissingAuthorization => "Missing Authorization header",
			AuthFailure::InvalidAuthorizationFormat => {
				"Invalid Authorization header format, expected 'Bearer <key>'"
			}
			AuthFailure::InvalidApiKey => "Invalid API key",
			AuthFailure::TokenExpired => "Session token expired",
		}
	}
}

/// Error type returned by handlers.
#[derive(Debug)]
pub enum ServerError {
	Auth(AuthFailure),
	Api(ApiError),
}

impl From<ApiError> for ServerError {
	fn from(err: ApiError) -> Self {
		ServerError::Api(err)
	}
}

impl From<weft_db::DbError> for ServerError {
	fn from(err: weft_db::DbError) -> Self {
		ServerError::Api(err.to_api_error())
	}
}

impl From<weft_pool::PoolError> for ServerError {
	fn from(err: weft_pool::PoolError) -> Self {
		ServerError::Api(pool_error_to_api(err))
	}
}

/// Map pool selection failures onto the client-facing taxonomy.
pub fn pool_error_to_api(err: weft_pool::PoolError) -> ApiError {
	match err {
		weft_pool::PoolError::NoAvailable => ApiError::new(
			ErrorCode::NoAvailableAccounts,
			"no accounts available to serve this request",
		)
		.with_server_data(serde_json::json!({"reason": "no_available_accounts"})),
		weft_pool::PoolError::AllExpired => ApiError::new(
			ErrorCode::NoAvailableAccounts,
			"all candidate accounts have expired tokens",
		)
		.with_server_data(serde_json::json!({"reason": "all_tokens_expired"})),
		weft_pool::PoolError::Store(db) => db.to_api_error(),
	}
}

/// Wire name for an error class in the generic envelope.
pub fn error_type_name(code: ErrorCode) -> &'static str {
	match code {
		ErrorCode::ValidationError => "validation_error",
		ErrorCode::AuthError => "authentication_error",
		ErrorCode::Forbidden => "forbidden",
		ErrorCode::NotFound => "not_found",
		ErrorCode::ConflictError => "conflict_error",
		ErrorCode::QuotaExhausted => "quota_exhausted",
		ErrorCode::AccountBanned => "account_banned",
		ErrorCode::RateLimited => "rate_limited",
		ErrorCode::NoAvailableAccounts => "no_available_accounts",
		ErrorCode::UpstreamUnavailable => "upstream_unavailable",
		ErrorCode::InternalError => "internal_error",
	}
}

/// Generic error envelope body.
pub fn error_body(err: &ApiError) -> serde_json::Value {
	let mut body = serde_json::json!({
		"error": {
			"message": err.message,
			"type": error_type_name(err.code),
			"code": err.code,
		},
		"requestId": err.request_id,
	});
	if let Some(version) = err.current_version {
		body["currentVersion"] = serde_json::json!(version);
	}
	if let Some(data) = &err.server_data {
		body["serverData"] = data.clone();
	}
	if let Some(retryable) = err.retryable {
		body["retryable"] = serde_json::json!(retryable);
	}
	body
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		match self {
			ServerError::Auth(failure) => {
				let body = serde_json::json!({
					"error": {
						"message": failure.message(),
						"type": "authentication_error",
						"code": failure.code(),
					}
				});
				(StatusCode::UNAUTHORIZED, Json(body)).into_response()
			}
			ServerError::Api(err) => {
				let status =
					StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
				if status.is_server_error() {
					tracing::error!(request_id = %err.request_id, error = %err.message, "request failed");
				} else {
					tracing::debug!(request_id = %err.request_id, error = %err.message, "request rejected");
				}
				(status, Json(error_body(&err))).into_response()
			}
		}
	}
}
