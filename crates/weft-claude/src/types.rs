// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Anthropic Messages API wire types.

use serde::{Deserialize, Serialize};

/// `anthropic-version` values this surface accepts.
pub const SUPPORTED_ANTHROPIC_VERSIONS: &[&str] = &["2023-01-01", "2023-06-01", "2024-01-01"];

pub fn is_supported_version(version: &str) -> bool {
	SUPPORTED_ANTHROPIC_VERSIONS.contains(&version)
}

/// `POST /v1/messages` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
	#[serde(default)]
	pub model: Option<String>,
	pub messages: Vec<ClaudeMessage>,
	#[serde(default)]
	pub max_tokens: Option<u32>,
	#[serde(default)]
	pub system: Option<ClaudeSystem>,
	#[serde(default)]
	pub stream: bool,
	#[serde(default)]
	pub tools: Option<Vec<ClaudeTool>>,
	#[serde(default)]
	pub thinking: Option<ClaudeThinking>,
	/// Pin the request to one upstream account (disables failover).
	#[serde(default)]
	pub account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeSystem {
	Text(String),
	Blocks(Vec<ClaudeSystemBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeSystemBlock {
	#[serde(rename = "type", default)]
	pub kind: Option<String>,
	#[serde(default)]
	pub text: String,
}

impl ClaudeSystem {
	pub fn joined(&self) -> String {
		match self {
			ClaudeSystem::Text(text) => text.clone(),
			ClaudeSystem::Blocks(blocks) => blocks
				.iter()
				.map(|b| b.text.as_str())
				.collect::<Vec<_>>()
				.join("\n\n"),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessage {
	pub role: String,
	pub content: ClaudeContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeContent {
	Text(String),
	Blocks(Vec<ClaudeBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeBlock {
	Text {
		text: String,
	},
	Image {
		source: ClaudeImageSource,
	},
	ToolUse {
		id: String,
		name: String,
		input: serde_json::Value,
	},
	ToolResult {
		tool_use_id: String,
		#[serde(default)]
		content: Option<serde_json::Value>,
		#[serde(default)]
		is_error: bool,
	},
	Thinking {
		#[serde(default)]
		thinking: String,
		#[serde(default)]
		signature: Option<String>,
	},
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeImageSource {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub media_type: Option<String>,
	#[serde(default)]
	pub data: Option<String>,
	#[serde(default)]
	pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeThinking {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub budget_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeTool {
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub input_schema: serde_json::Value,
}

// ---- response side ----

#[derive(Debug, Clone, Serialize)]
pub struct MessagesResponse {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: &'static str,
	pub role: &'static str,
	pub model: String,
	pub content: Vec<ResponseBlock>,
	pub stop_reason: Option<String>,
	pub stop_sequence: Option<String>,
	pub usage: ClaudeUsage,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
	Text {
		text: String,
	},
	Thinking {
		thinking: String,
	},
	ToolUse {
		id: String,
		name: String,
		input: serde_json::Value,
	},
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClaudeUsage {
	pub input_tokens: u32,
	pub output_tokens: u32,
}

/// `POST /v1/messages/count_tokens` response.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CountTokensResponse {
	pub input_tokens: u32,
}

/// Claude-shaped error body.
#[derive(Debug, Clone, Serialize)]
pub struct ClaudeErrorBody {
	#[serde(rename = "type")]
	pub kind: &'static str,
	pub error: ClaudeErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeErrorDetail {
	#[serde(rename = "type")]
	pub kind: String,
	pub message: String,
}

impl ClaudeErrorBody {
	pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			kind: "error",
			error: ClaudeErrorDetail {
				kind: kind.into(),
				message: message.into(),
			},
		}
	}
}
