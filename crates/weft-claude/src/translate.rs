// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Messages API ⇄ normalized request translation and Anthropic SSE events.

use weft_core::chat::{ChatMessage, ChatRequest, ContentBlock, ImageSource, Role};
use weft_core::{ApiError, ErrorCode, ToolSpec};
use weft_kiro::{CallOutcome, KiroEvent, DEFAULT_MODEL};
use weft_openai::tokens::{estimate_prompt_tokens, estimate_text_tokens};

use crate::types::{
	ClaudeBlock, ClaudeContent, ClaudeUsage, MessagesRequest, MessagesResponse, ResponseBlock,
};

/// Map the gateway taxonomy onto Anthropic error type names.
pub fn claude_error_kind(code: ErrorCode) -> &'static str {
	match code {
		ErrorCode::ValidationError => "invalid_request_error",
		ErrorCode::AuthError => "authentication_error",
		ErrorCode::Forbidden | ErrorCode::AccountBanned => "permission_error",
		ErrorCode::NotFound => "not_found_error",
		ErrorCode::ConflictError => "invalid_request_error",
		ErrorCode::QuotaExhausted | ErrorCode::RateLimited => "rate_limit_error",
		ErrorCode::NoAvailableAccounts | ErrorCode::UpstreamUnavailable => "overloaded_error",
		ErrorCode::InternalError => "api_error",
	}
}

/// Normalize a Messages request into the vendor-neutral form.
pub fn to_chat_request(request: &MessagesRequest) -> Result<ChatRequest, ApiError> {
	if request.messages.is_empty() {
		return Err(ApiError::validation("messages must not be empty"));
	}

	let mut messages = Vec::with_capacity(request.messages.len());
	for message in &request.messages {
		let role = match message.role.as_str() {
			"user" => Role::User,
			"assistant" => Role::Assistant,
			other => {
				return Err(ApiError::validation(format!("unknown role: {other}")));
			}
		};
		messages.push(ChatMessage::new(role, convert_content(&message.content)?));
	}

	let thinking_budget = request
		.thinking
		.as_ref()
		.filter(|t| t.kind == "enabled")
		.map(|t| t.budget_tokens.unwrap_or(16_000));

	let tools = request
		.tools
		.as_ref()
		.map(|tools| {
			tools
				.iter()
				.map(|tool| ToolSpec {
					name: tool.name.clone(),
					description: tool.description.clone(),
					input_schema: tool.input_schema.clone(),
				})
				.collect()
		})
		.unwrap_or_default();

	Ok(ChatRequest {
		model: request
			.model
			.clone()
			.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
		messages,
		system: request.system.as_ref().map(|s| s.joined()),
		tools,
		thinking_budget,
	})
}

fn convert_content(content: &ClaudeContent) -> Result<Vec<ContentBlock>, ApiError> {
	match content {
		ClaudeContent::Text(text) => Ok(vec![ContentBlock::text(text.clone())]),
		ClaudeContent::Blocks(blocks) => blocks.iter().map(convert_block).collect(),
	}
}

fn convert_block(block: &ClaudeBlock) -> Result<ContentBlock, ApiError> {
	match block {
		ClaudeBlock::Text { text } => Ok(ContentBlock::text(text.clone())),
		ClaudeBlock::Thinking { thinking, .. } => Ok(ContentBlock::Thinking {
			text: thinking.clone(),
		}),
		ClaudeBlock::ToolUse { id, name, input } => Ok(ContentBlock::ToolUse {
			id: id.clone(),
			name: name.clone(),
			input: input.clone(),
		}),
		ClaudeBlock::ToolResult {
			tool_use_id,
			content,
			is_error,
		} => Ok(ContentBlock::ToolResult {
			tool_use_id: tool_use_id.clone(),
			content: tool_result_text(content),
			is_error: *is_error,
		}),
		ClaudeBlock::Image { source } => {
			let format = source
				.media_type
				.as_deref()
				.and_then(|m| m.strip_prefix("image/"))
				.unwrap_or("png")
				.to_string();
			match source.kind.as_str() {
				"base64" => Ok(ContentBlock::Image {
					format,
					source: ImageSource::Base64 {
						data: source.data.clone().unwrap_or_default(),
					},
				}),
				"url" => Ok(ContentBlock::Image {
					format,
					source: ImageSource::Url {
						url: source.url.clone().unwrap_or_default(),
					},
				}),
				other => Err(ApiError::validation(format!(
					"unsupported image source type: {other}"
				))),
			}
		}
	}
}

/// Tool results may be a plain string or a block list; flatten to text.
fn tool_result_text(content: &Option<serde_json::Value>) -> String {
	match content {
		None => String::new(),
		Some(serde_json::Value::String(s)) => s.clone(),
		Some(serde_json::Value::Array(items)) => items
			.iter()
			.filter_map(|item| item.get("text").and_then(|t| t.as_str()))
			.collect::<Vec<_>>()
			.join("\n"),
		Some(other) => other.to_string(),
	}
}

fn message_id() -> String {
	format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// Assemble the non-streaming Messages response.
pub fn to_messages_response(request: &ChatRequest, outcome: &CallOutcome) -> MessagesResponse {
	let mut content = Vec::new();
	for block in &outcome.content_blocks {
		match block {
			ContentBlock::Text { text } => content.push(ResponseBlock::Text { text: text.clone() }),
			ContentBlock::Thinking { text } => content.push(ResponseBlock::Thinking {
				thinking: text.clone(),
			}),
			ContentBlock::ToolUse { id, name, input } => content.push(ResponseBlock::ToolUse {
				id: id.clone(),
				name: name.clone(),
				input: input.clone(),
			}),
			_ => {}
		}
	}

	let stop_reason = if outcome.tool_uses.is_empty() {
		"end_turn"
	} else {
		"tool_use"
	};

	let input_tokens = estimate_prompt_tokens(&request.messages, request.system.as_deref());
	let output_tokens = estimate_text_tokens(&outcome.content);

	MessagesResponse {
		id: message_id(),
		kind: "message",
		role: "assistant",
		model: request.model.clone(),
		content,
		stop_reason: Some(stop_reason.to_string()),
		stop_sequence: None,
		usage: ClaudeUsage {
			input_tokens,
			output_tokens,
		},
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
	Text,
	Thinking,
	ToolUse,
}

/// Stateful encoder producing the Anthropic SSE event sequence.
///
/// Thinking, text and tool-use blocks share one incrementing `index`; the
/// encoder opens and closes `content_block` envelopes as the vendor event
/// kind changes.
pub struct ClaudeSseEncoder {
	message_id: String,
	model: String,
	input_tokens: u32,
	output_tokens: u32,
	index: u32,
	open: Option<OpenBlock>,
	saw_tool_use: bool,
	started: bool,
}

impl ClaudeSseEncoder {
	pub fn new(model: impl Into<String>, input_tokens: u32) -> Self {
		Self {
			message_id: message_id(),
			model: model.into(),
			input_tokens,
			output_tokens: 0,
			index: 0,
			open: None,
			saw_tool_use: false,
			started: false,
		}
	}

	fn frame(&self, event: &str, data: serde_json::Value) -> String {
		format!("event: {event}\ndata: {data}\n\n")
	}

	fn start_frames(&mut self, out: &mut Vec<String>) {
		if self.started {
			return;
		}
		self.started = true;
		out.push(self.frame(
			"message_start",
			serde_json::json!({
				"type": "message_start",
				"message": {
					"id": self.message_id,
					"type": "message",
					"role": "assistant",
					"model": self.model,
					"content": [],
					"stop_reason": null,
					"stop_sequence": null,
					"usage": {"input_tokens": self.input_tokens, "output_tokens": 0}
				}
			}),
		));
	}

	fn close_block(&mut self, out: &mut Vec<String>) {
		if self.open.take().is_some() {
			out.push(self.frame(
				"content_block_stop",
				serde_json::json!({"type": "content_block_stop", "index": self.index}),
			));
			self.index += 1;
		}
	}

	fn open_block(&mut self, kind: OpenBlock, start: serde_json::Value, out: &mut Vec<String>) {
		self.close_block(out);
		self.open = Some(kind);
		out.push(self.frame(
			"content_block_start",
			serde_json::json!({
				"type": "content_block_start",
				"index": self.index,
				"content_block": start
			}),
		));
	}

	/// Encode one vendor event into zero or more SSE frames.
	pub fn encode(&mut self, event: &KiroEvent) -> Vec<String> {
		let mut out = Vec::new();
		self.start_frames(&mut out);

		match event {
			KiroEvent::Content(text) => {
				if text.is_empty() {
					return out;
				}
				if self.open != Some(OpenBlock::Text) {
					self.open_block(
						OpenBlock::Text,
						serde_json::json!({"type": "text", "text": ""}),
						&mut out,
					);
				}
				self.output_tokens += estimate_text_tokens(text);
				out.push(self.frame(
					"content_block_delta",
					serde_json::json!({
						"type": "content_block_delta",
						"index": self.index,
						"delta": {"type": "text_delta", "text": text}
					}),
				));
			}
			KiroEvent::ThinkingStart => {
				self.open_block(
					OpenBlock::Thinking,
					serde_json::json!({"type": "thinking", "thinking": ""}),
					&mut out,
				);
			}
			KiroEvent::Thinking(text) => {
				if self.open != Some(OpenBlock::Thinking) {
					self.open_block(
						OpenBlock::Thinking,
						serde_json::json!({"type": "thinking", "thinking": ""}),
						&mut out,
					);
				}
				self.output_tokens += estimate_text_tokens(text);
				out.push(self.frame(
					"content_block_delta",
					serde_json::json!({
						"type": "content_block_delta",
						"index": self.index,
						"delta": {"type": "thinking_delta", "thinking": text}
					}),
				));
			}
			KiroEvent::ThinkingEnd => {
				if self.open == Some(OpenBlock::Thinking) {
					self.close_block(&mut out);
				}
			}
			KiroEvent::ToolUseBegin { tool_use_id, name } => {
				self.saw_tool_use = true;
				self.open_block(
					OpenBlock::ToolUse,
					serde_json::json!({
						"type": "tool_use",
						"id": tool_use_id,
						"name": name,
						"input": {}
					}),
					&mut out,
				);
			}
			KiroEvent::ToolUseInput { fragment } => {
				if self.open == Some(OpenBlock::ToolUse) && !fragment.is_empty() {
					out.push(self.frame(
						"content_block_delta",
						serde_json::json!({
							"type": "content_block_delta",
							"index": self.index,
							"delta": {"type": "input_json_delta", "partial_json": fragment}
						}),
					));
				}
			}
			KiroEvent::ToolUseStop { .. } => {
				if self.open == Some(OpenBlock::ToolUse) {
					self.close_block(&mut out);
				}
			}
			KiroEvent::ContextUsage(_) | KiroEvent::TokenRefreshed { .. } => {}
		}

		out
	}

	/// Close any open block and emit `message_delta` + `message_stop`.
	pub fn finish(&mut self) -> Vec<String> {
		let mut out = Vec::new();
		self.start_frames(&mut out);
		self.close_block(&mut out);

		let stop_reason = if self.saw_tool_use {
			"tool_use"
		} else {
			"end_turn"
		};
		out.push(self.frame(
			"message_delta",
			serde_json::json!({
				"type": "message_delta",
				"delta": {"stop_reason": stop_reason, "stop_sequence": null},
				"usage": {"output_tokens": self.output_tokens}
			}),
		));
		out.push(self.frame(
			"message_stop",
			serde_json::json!({"type": "message_stop"}),
		));
		out
	}

	/// Error event in the Anthropic SSE schema.
	pub fn error_frame(&self, kind: &str, message: &str) -> String {
		self.frame(
			"error",
			serde_json::json!({
				"type": "error",
				"error": {"type": kind, "message": message}
			}),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{ClaudeMessage, ClaudeThinking, ClaudeTool};

	fn request(messages: Vec<ClaudeMessage>) -> MessagesRequest {
		MessagesRequest {
			model: Some("claude-sonnet-4-5".to_string()),
			messages,
			max_tokens: Some(512),
			system: None,
			stream: false,
			tools: None,
			thinking: None,
			account_id: None,
		}
	}

	fn user(text: &str) -> ClaudeMessage {
		ClaudeMessage {
			role: "user".to_string(),
			content: ClaudeContent::Text(text.to_string()),
		}
	}

	#[test]
	fn translates_roles_and_thinking() {
		let mut req = request(vec![user("hi")]);
		req.thinking = Some(ClaudeThinking {
			kind: "enabled".to_string(),
			budget_tokens: Some(9_000),
		});
		let chat = to_chat_request(&req).unwrap();
		assert_eq!(chat.thinking_budget, Some(9_000));
		assert_eq!(chat.messages[0].role, Role::User);

		req.thinking = Some(ClaudeThinking {
			kind: "disabled".to_string(),
			budget_tokens: None,
		});
		assert_eq!(to_chat_request(&req).unwrap().thinking_budget, None);
	}

	#[test]
	fn rejects_unknown_roles_and_empty_messages() {
		assert_eq!(to_chat_request(&request(vec![])).unwrap_err().http_status(), 400);

		let bad = request(vec![ClaudeMessage {
			role: "narrator".to_string(),
			content: ClaudeContent::Text("x".to_string()),
		}]);
		assert_eq!(to_chat_request(&bad).unwrap_err().http_status(), 400);
	}

	#[test]
	fn tools_pass_through_to_vendor_shape() {
		let mut req = request(vec![user("hi")]);
		req.tools = Some(vec![ClaudeTool {
			name: "get_time".to_string(),
			description: "time".to_string(),
			input_schema: serde_json::json!({"type": "object"}),
		}]);
		let chat = to_chat_request(&req).unwrap();
		assert_eq!(chat.tools.len(), 1);
		assert_eq!(chat.tools[0].name, "get_time");
	}

	#[test]
	fn tool_result_content_flattens_blocks() {
		assert_eq!(
			tool_result_text(&Some(serde_json::json!([
				{"type": "text", "text": "a"},
				{"type": "text", "text": "b"}
			]))),
			"a\nb"
		);
		assert_eq!(
			tool_result_text(&Some(serde_json::json!("plain"))),
			"plain"
		);
		assert_eq!(tool_result_text(&None), "");
	}

	#[test]
	fn error_kinds_map_to_anthropic_names() {
		assert_eq!(claude_error_kind(ErrorCode::AuthError), "authentication_error");
		assert_eq!(claude_error_kind(ErrorCode::QuotaExhausted), "rate_limit_error");
		assert_eq!(
			claude_error_kind(ErrorCode::NoAvailableAccounts),
			"overloaded_error"
		);
		assert_eq!(claude_error_kind(ErrorCode::AccountBanned), "permission_error");
	}

	#[test]
	fn sse_sequence_interleaves_thinking_and_text() {
		let mut encoder = ClaudeSseEncoder::new("claude-sonnet-4-5", 3);
		let mut frames = Vec::new();
		for event in [
			KiroEvent::ThinkingStart,
			KiroEvent::Thinking("why".to_string()),
			KiroEvent::ThinkingEnd,
			KiroEvent::Content("answer".to_string()),
		] {
			frames.extend(encoder.encode(&event));
		}
		frames.extend(encoder.finish());

		let joined = frames.join("");
		let expected_order = [
			"event: message_start",
			"\"type\":\"thinking\"",
			"thinking_delta",
			"event: content_block_stop",
			"\"type\":\"text\"",
			"text_delta",
			"event: message_delta",
			"event: message_stop",
		];
		let mut cursor = 0;
		for needle in expected_order {
			let found = joined[cursor..]
				.find(needle)
				.unwrap_or_else(|| panic!("missing {needle} after byte {cursor}"));
			cursor += found + needle.len();
		}

		// Thinking block is index 0, text block index 1.
		assert!(joined.contains("\"index\":0"));
		assert!(joined.contains("\"index\":1"));
		assert!(joined.contains("\"stop_reason\":\"end_turn\""));
	}

	#[test]
	fn sse_tool_use_sets_stop_reason() {
		let mut encoder = ClaudeSseEncoder::new("m", 0);
		let mut frames = Vec::new();
		frames.extend(encoder.encode(&KiroEvent::ToolUseBegin {
			tool_use_id: "t1".to_string(),
			name: "get_time".to_string(),
		}));
		frames.extend(encoder.encode(&KiroEvent::ToolUseInput {
			fragment: "{}".to_string(),
		}));
		frames.extend(encoder.encode(&KiroEvent::ToolUseStop {
			tool_use_id: "t1".to_string(),
			name: "get_time".to_string(),
			input: serde_json::json!({}),
		}));
		frames.extend(encoder.finish());

		let joined = frames.join("");
		assert!(joined.contains("input_json_delta"));
		assert!(joined.contains("\"stop_reason\":\"tool_use\""));
	}

	#[test]
	fn non_stream_response_orders_blocks() {
		let chat = to_chat_request(&request(vec![user("hi")])).unwrap();
		let outcome = CallOutcome {
			content: "world".to_string(),
			content_blocks: vec![
				ContentBlock::Thinking {
					text: "hmm".to_string(),
				},
				ContentBlock::text("world"),
			],
			tool_uses: vec![],
			context_usage: None,
			new_tokens: None,
		};
		let response = to_messages_response(&chat, &outcome);
		assert_eq!(response.kind, "message");
		assert_eq!(
			response.content[0],
			ResponseBlock::Thinking {
				thinking: "hmm".to_string()
			}
		);
		assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
		assert!(response.id.starts_with("msg_"));
	}
}
