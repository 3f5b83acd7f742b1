// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vendor client errors.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum KiroError {
	#[error("HTTP error: {0}")]
	Http(String),

	#[error("Vendor API error ({status}): {message}")]
	Api { status: u16, message: String },

	#[error("TOKEN_EXPIRED")]
	TokenExpired,

	#[error("Quota exhausted: {0}")]
	QuotaExhausted(String),

	#[error("Account banned: {0}")]
	Banned(String),

	#[error("Token refresh failed ({status}): {message}")]
	RefreshFailed { status: u16, message: String },

	#[error("Invalid response: {0}")]
	InvalidResponse(String),

	#[error("Request timed out")]
	Timeout,
}

impl From<reqwest::Error> for KiroError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			KiroError::Timeout
		} else {
			KiroError::Http(err.to_string())
		}
	}
}

/// Vendor messages that mean the credentials are gone for good.
pub fn is_credential_invalidation(message: &str) -> bool {
	message.contains("Bad credentials") || message.contains("BANNED:TEMPORARILY_SUSPENDED")
}

/// Error text that should be treated as a recoverable token problem.
pub fn is_token_expiry_message(message: &str) -> bool {
	let lower = message.to_lowercase();
	lower.contains("token") || lower.contains("expired") || lower.contains("unauthorized")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn credential_invalidation_matches_known_messages() {
		assert!(is_credential_invalidation("Bad credentials"));
		assert!(is_credential_invalidation("error: BANNED:TEMPORARILY_SUSPENDED"));
		assert!(!is_credential_invalidation("rate limited"));
	}

	#[test]
	fn token_expiry_matches_loosely() {
		assert!(is_token_expiry_message("The security token included is expired"));
		assert!(is_token_expiry_message("401 Unauthorized"));
		assert!(!is_token_expiry_message("internal error"));
	}
}
