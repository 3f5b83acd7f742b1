// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Anthropic Messages protocol adapter.

pub mod translate;
pub mod types;

pub use translate::{
	claude_error_kind, to_chat_request, to_messages_response, ClaudeSseEncoder,
};
pub use types::{
	is_supported_version, ClaudeErrorBody, CountTokensResponse, MessagesRequest, MessagesResponse,
	SUPPORTED_ANTHROPIC_VERSIONS,
};
