// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OpenAI chat-completions wire types.
//!
//! Request shapes are deliberately lenient (string-or-blocks content,
//! optional everything) because real OpenAI clients disagree on details;
//! response shapes are emitted bit-compatibly with the OpenAI schema.

use serde::{Deserialize, Serialize};

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
	#[serde(default)]
	pub model: Option<String>,
	pub messages: Vec<OpenAiMessage>,
	#[serde(default)]
	pub stream: bool,
	#[serde(default)]
	pub tools: Option<Vec<OpenAiTool>>,
	#[serde(default)]
	pub reasoning_effort: Option<String>,
	/// Pin the request to one upstream account (disables failover).
	#[serde(default)]
	pub account_id: Option<String>,
	#[serde(default)]
	pub thinking: Option<ThinkingParam>,
	#[serde(default)]
	pub max_tokens: Option<u32>,
	#[serde(default)]
	pub temperature: Option<f32>,
}

/// Anthropic-style thinking parameter accepted for convenience.
#[derive(Debug, Clone, Deserialize)]
pub struct ThinkingParam {
	#[serde(default, rename = "type")]
	pub kind: Option<String>,
	#[serde(default)]
	pub budget_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
	pub role: String,
	#[serde(default)]
	pub content: Option<OpenAiContent>,
	#[serde(default)]
	pub tool_calls: Option<Vec<OpenAiToolCall>>,
	#[serde(default)]
	pub tool_call_id: Option<String>,
	#[serde(default)]
	pub name: Option<String>,
}

/// String or array-of-parts content.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
	Text(String),
	Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
	Text { text: String },
	ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
	pub url: String,
	#[serde(default)]
	pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiToolCall {
	pub id: String,
	#[serde(rename = "type", default)]
	pub kind: Option<String>,
	pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionCall {
	pub name: String,
	#[serde(default)]
	pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
	#[serde(rename = "type", default)]
	pub kind: Option<String>,
	pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDef {
	pub name: String,
	#[serde(default)]
	pub description: String,
	#[serde(default = "empty_schema")]
	pub parameters: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
	serde_json::json!({"type": "object", "properties": {}})
}

// ---- response side ----

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
	pub id: String,
	pub object: &'static str,
	pub created: i64,
	pub model: String,
	pub choices: Vec<Choice>,
	pub usage: CompletionUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
	pub index: u32,
	pub message: AssistantMessage,
	pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
	pub role: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reasoning_content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseToolCall {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: &'static str,
	pub function: ResponseFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFunctionCall {
	pub name: String,
	pub arguments: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CompletionUsage {
	pub prompt_tokens: u32,
	pub completion_tokens: u32,
	pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
	pub id: String,
	pub object: &'static str,
	pub created: i64,
	pub model: String,
	pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
	pub index: u32,
	pub delta: Delta,
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub role: Option<&'static str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reasoning_content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaToolCall {
	pub index: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(rename = "type", skip_serializing_if = "Option::is_none")]
	pub kind: Option<&'static str>,
	pub function: DeltaFunctionCall,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeltaFunctionCall {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub arguments: Option<String>,
}

/// `GET /v1/models` entry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
	pub id: String,
	pub object: &'static str,
	pub created: i64,
	pub owned_by: &'static str,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_accepts_string_and_block_content() {
		let raw = r#"{
			"model": "claude-sonnet-4-5",
			"messages": [
				{"role": "user", "content": "plain"},
				{"role": "user", "content": [
					{"type": "text", "text": "hi"},
					{"type": "image_url", "image_url": {"url": "data:image/png;base64,eA=="}}
				]}
			]
		}"#;
		let parsed: ChatCompletionRequest = serde_json::from_str(raw).unwrap();
		assert_eq!(parsed.messages.len(), 2);
		assert!(matches!(
			parsed.messages[0].content,
			Some(OpenAiContent::Text(_))
		));
		assert!(matches!(
			parsed.messages[1].content,
			Some(OpenAiContent::Parts(ref parts)) if parts.len() == 2
		));
	}

	#[test]
	fn request_accepts_tool_messages() {
		let raw = r#"{
			"messages": [
				{"role": "assistant", "tool_calls": [
					{"id": "t1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
				]},
				{"role": "tool", "tool_call_id": "t1", "content": "result"}
			]
		}"#;
		let parsed: ChatCompletionRequest = serde_json::from_str(raw).unwrap();
		assert!(parsed.messages[0].tool_calls.is_some());
		assert_eq!(parsed.messages[1].tool_call_id.as_deref(), Some("t1"));
	}

	#[test]
	fn chunk_serialization_omits_empty_fields() {
		let chunk = ChatCompletionChunk {
			id: "chatcmpl-1".to_string(),
			object: "chat.completion.chunk",
			created: 1,
			model: "claude-sonnet-4-5".to_string(),
			choices: vec![ChunkChoice {
				index: 0,
				delta: Delta {
					content: Some("hi".to_string()),
					..Delta::default()
				},
				finish_reason: None,
			}],
		};
		let json = serde_json::to_string(&chunk).unwrap();
		assert!(json.contains("\"content\":\"hi\""));
		assert!(!json.contains("reasoning_content"));
		assert!(!json.contains("tool_calls"));
		assert!(json.contains("\"finish_reason\":null"));
	}
}
