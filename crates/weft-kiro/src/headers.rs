// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound header generation.
//!
//! Every account carries pinned header-generation parameters (invocation
//! id, device hash, SDK/IDE version strings); the header version decides
//! both the endpoint host and the extra V2 headers.

use weft_core::account::{generate_invocation_id, HeaderParams, HeaderVersion};

/// Chat endpoint URL for an account's header generation and region.
pub fn chat_endpoint(version: HeaderVersion, region: &str) -> String {
	match version {
		HeaderVersion::V1 => {
			format!("https://codewhisperer.{region}.amazonaws.com/generateAssistantResponse")
		}
		HeaderVersion::V2 => format!("https://q.{region}.amazonaws.com/generateAssistantResponse"),
	}
}

/// Header set for one vendor chat call.
pub fn chat_headers(params: &HeaderParams, access_token: &str, max_attempts: u32) -> Vec<(String, String)> {
	let invocation_id = if params.amz_invocation_id.is_empty() {
		generate_invocation_id()
	} else {
		params.amz_invocation_id.clone()
	};

	let sdk = &params.sdk_js_version;
	let ide = &params.ide_version;
	let hash = &params.kiro_device_hash;

	let mut headers = vec![
		("Content-Type".to_string(), "application/json".to_string()),
		("Accept".to_string(), "application/json".to_string()),
		("Authorization".to_string(), format!("Bearer {access_token}")),
		("Connection".to_string(), "close".to_string()),
		("amz-sdk-invocation-id".to_string(), invocation_id),
		(
			"amz-sdk-request".to_string(),
			format!("attempt=1; max={max_attempts}"),
		),
		(
			"x-amz-user-agent".to_string(),
			format!("aws-sdk-js/{sdk} KiroIDE-{ide}-{hash}"),
		),
		(
			"user-agent".to_string(),
			format!(
				"aws-sdk-js/{sdk} ua/2.1 os/linux lang/js md/nodejs#18.20.3 \
				 api/codewhispererstreaming#{sdk} m/E KiroIDE-{ide}-{hash}"
			),
		),
	];

	if params.header_version == HeaderVersion::V2 {
		headers.push((
			"x-amzn-kiro-agent-mode".to_string(),
			"vibe".to_string(),
		));
		headers.push((
			"x-amzn-codewhisperer-optout".to_string(),
			"true".to_string(),
		));
	}

	headers
}
