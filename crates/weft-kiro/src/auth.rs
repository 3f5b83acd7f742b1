// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vendor token refresh.
//!
//! Two exchange paths, keyed by the account's auth method: social accounts
//! refresh against the Kiro desktop auth endpoint, OIDC/IdC accounts
//! against the regional OIDC token endpoint with client credentials.

use serde::{Deserialize, Serialize};

use weft_core::account::{AuthMethod, Credentials};
use weft_core::now_ms;

use crate::error::{is_credential_invalidation, KiroError};
use crate::http::SOCIAL_REFRESH_USER_AGENT;

/// Rotated credential material from a successful refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedTokens {
	pub access_token: String,
	/// Absent when the endpoint did not rotate the refresh token.
	pub refresh_token: Option<String>,
	/// Epoch milliseconds.
	pub expires_at: i64,
}

/// Social refresh endpoint for a region.
pub fn social_refresh_url(region: &str) -> String {
	format!("https://prod.{region}.auth.desktop.kiro.dev/refreshToken")
}

/// OIDC token endpoint for a region.
pub fn oidc_refresh_url(region: &str) -> String {
	format!("https://oidc.{region}.amazonaws.com/token")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SocialRefreshRequest<'a> {
	refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcRefreshRequest<'a> {
	client_id: &'a str,
	client_secret: &'a str,
	refresh_token: &'a str,
	grant_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
	#[serde(alias = "access_token")]
	access_token: String,
	#[serde(default, alias = "refresh_token")]
	refresh_token: Option<String>,
	#[serde(alias = "expires_in")]
	expires_in: i64,
}

impl TokenResponse {
	fn into_tokens(self, now_ms: i64) -> RefreshedTokens {
		RefreshedTokens {
			access_token: self.access_token,
			refresh_token: self.refresh_token,
			expires_at: now_ms + self.expires_in * 1000,
		}
	}
}

/// Exchange the refresh token for fresh credentials.
#[tracing::instrument(skip(http, credentials), fields(auth_method = credentials.auth_method.as_str(), region = %credentials.region))]
pub async fn refresh_credentials(
	http: &reqwest::Client,
	credentials: &Credentials,
) -> Result<RefreshedTokens, KiroError> {
	let response = match credentials.auth_method {
		AuthMethod::Social => {
			http
				.post(social_refresh_url(&credentials.region))
				.header("Content-Type", "application/json")
				.header("User-Agent", SOCIAL_REFRESH_USER_AGENT)
				.json(&SocialRefreshRequest {
					refresh_token: &credentials.refresh_token,
				})
				.send()
				.await?
		}
		AuthMethod::Oidc | AuthMethod::IdC => {
			http
				.post(oidc_refresh_url(&credentials.region))
				.header("Content-Type", "application/json")
				.json(&OidcRefreshRequest {
					client_id: credentials.client_id.as_deref().unwrap_or_default(),
					client_secret: credentials.client_secret.as_deref().unwrap_or_default(),
					refresh_token: &credentials.refresh_token,
					grant_type: "refresh_token",
				})
				.send()
				.await?
		}
	};

	let status = response.status();
	if status.is_success() {
		let parsed: TokenResponse = response
			.json()
			.await
			.map_err(|e| KiroError::InvalidResponse(format!("token response: {e}")))?;
		tracing::debug!("token refresh succeeded");
		return Ok(parsed.into_tokens(now_ms()));
	}

	let message = response.text().await.unwrap_or_default();
	tracing::warn!(status = status.as_u16(), message = %message, "token refresh failed");
	if is_credential_invalidation(&message) {
		return Err(KiroError::Banned(message));
	}
	Err(KiroError::RefreshFailed {
		status: status.as_u16(),
		message,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn refresh_urls_embed_region() {
		assert_eq!(
			social_refresh_url("us-east-1"),
			"https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
		);
		assert_eq!(
			oidc_refresh_url("eu-west-1"),
			"https://oidc.eu-west-1.amazonaws.com/token"
		);
	}

	#[test]
	fn token_response_accepts_both_casings() {
		let camel: TokenResponse = serde_json::from_str(
			r#"{"accessToken":"at","refreshToken":"rt","expiresIn":3600}"#,
		)
		.unwrap();
		assert_eq!(camel.access_token, "at");

		let snake: TokenResponse =
			serde_json::from_str(r#"{"access_token":"at","expires_in":3600}"#).unwrap();
		assert_eq!(snake.access_token, "at");
		assert!(snake.refresh_token.is_none());
	}

	#[test]
	fn expires_in_converts_to_epoch_ms() {
		let parsed: TokenResponse =
			serde_json::from_str(r#"{"accessToken":"at","expiresIn":3600}"#).unwrap();
		let tokens = parsed.into_tokens(1_000_000);
		assert_eq!(tokens.expires_at, 1_000_000 + 3_600_000);
	}

	#[test]
	fn oidc_request_serializes_grant_type() {
		let body = serde_json::to_value(OidcRefreshRequest {
			client_id: "cid",
			client_secret: "sec",
			refresh_token: "rt",
			grant_type: "refresh_token",
		})
		.unwrap();
		assert_eq!(body["grantType"], "refresh_token");
		assert_eq!(body["clientId"], "cid");
	}
}
