// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client construction.
//!
//! Chat calls set their full header set per request, so the vendor client
//! carries no default User-Agent. Refresh calls use endpoint-specific
//! user-agent policies: the social endpoint expects the batch-login CLI
//! string, the OIDC endpoint gets no custom agent at all.

use std::time::Duration;

use reqwest::Client;

/// User-Agent the social refresh endpoint expects.
pub const SOCIAL_REFRESH_USER_AGENT: &str = "KiroBatchLoginCLI/1.0.0";

/// Hard ceiling on one vendor chat call, matching the inbound deadline.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(600);

/// Token refresh calls are short round trips.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for vendor chat calls (headers are set per request).
pub fn vendor_client() -> Client {
	Client::builder()
		.timeout(CHAT_TIMEOUT)
		.connect_timeout(Duration::from_secs(10))
		.build()
		.expect("failed to build HTTP client")
}

/// Client for token refresh calls.
pub fn refresh_client() -> Client {
	Client::builder()
		.timeout(REFRESH_TIMEOUT)
		.connect_timeout(Duration::from_secs(10))
		.build()
		.expect("failed to build HTTP client")
}
