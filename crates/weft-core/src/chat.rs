// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Protocol-neutral chat request model.
//!
//! Both protocol adapters (OpenAI and Claude) normalize inbound requests
//! into this shape before the vendor client translates it to the Kiro wire
//! format. Content is a tagged union so heterogeneous block lists (text,
//! images, tool calls, tool results, thinking) survive the round trip.

use serde::{Deserialize, Serialize};

/// Message author role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	#[default]
	User,
	Assistant,
	Tool,
}

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
	Base64 { data: String },
	Url { url: String },
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
	Text {
		text: String,
	},
	Image {
		format: String,
		source: ImageSource,
	},
	ToolUse {
		id: String,
		name: String,
		input: serde_json::Value,
	},
	ToolResult {
		tool_use_id: String,
		content: String,
		#[serde(default)]
		is_error: bool,
	},
	Thinking {
		text: String,
	},
}

impl ContentBlock {
	pub fn text(text: impl Into<String>) -> Self {
		ContentBlock::Text { text: text.into() }
	}

	/// The plain-text rendering of this block, empty for non-text blocks.
	pub fn as_text(&self) -> &str {
		match self {
			ContentBlock::Text { text } | ContentBlock::Thinking { text } => text,
			_ => "",
		}
	}
}

/// A normalized chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: Vec<ContentBlock>,
}

impl ChatMessage {
	pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
		Self { role, content }
	}

	pub fn user(text: impl Into<String>) -> Self {
		Self::new(Role::User, vec![ContentBlock::text(text)])
	}

	pub fn assistant(text: impl Into<String>) -> Self {
		Self::new(Role::Assistant, vec![ContentBlock::text(text)])
	}

	/// Concatenated text of every text block.
	pub fn joined_text(&self) -> String {
		self
			.content
			.iter()
			.filter_map(|b| match b {
				ContentBlock::Text { text } => Some(text.as_str()),
				_ => None,
			})
			.collect::<Vec<_>>()
			.join("")
	}
}

/// A tool the model may call, in vendor-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub input_schema: serde_json::Value,
}

/// A normalized chat request handed to the vendor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
	pub model: String,
	pub messages: Vec<ChatMessage>,
	#[serde(default)]
	pub system: Option<String>,
	#[serde(default)]
	pub tools: Vec<ToolSpec>,
	/// Thinking budget in tokens; `None` disables thinking mode.
	#[serde(default)]
	pub thinking_budget: Option<u32>,
}
