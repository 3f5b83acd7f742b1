// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OpenAI ⇄ normalized request translation and SSE chunk framing.

use weft_core::chat::{ChatMessage, ChatRequest, ContentBlock, ImageSource, Role};
use weft_core::{now_ms, ApiError, ToolSpec};
use weft_kiro::{CallOutcome, KiroEvent, DEFAULT_MODEL};

use crate::tokens::{estimate_prompt_tokens, estimate_text_tokens};
use crate::types::{
	AssistantMessage, ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, Choice,
	ChunkChoice, CompletionUsage, Delta, DeltaFunctionCall, DeltaToolCall, OpenAiContent,
	OpenAiContentPart, ResponseFunctionCall, ResponseToolCall,
};

/// Thinking budgets for `reasoning_effort` levels.
pub fn thinking_budget_for_effort(effort: &str) -> Option<u32> {
	match effort {
		"low" => Some(8_000),
		"medium" => Some(16_000),
		"high" => Some(24_000),
		_ => None,
	}
}

/// Normalize an OpenAI request into the vendor-neutral form.
pub fn to_chat_request(request: &ChatCompletionRequest) -> Result<ChatRequest, ApiError> {
	if request.messages.is_empty() {
		return Err(ApiError::validation("messages must not be empty"));
	}

	let mut system_parts: Vec<String> = Vec::new();
	let mut messages: Vec<ChatMessage> = Vec::new();

	for message in &request.messages {
		match message.role.as_str() {
			"system" | "developer" => {
				if let Some(text) = content_text(&message.content) {
					system_parts.push(text);
				}
			}
			"tool" => {
				let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
				let content = content_text(&message.content).unwrap_or_default();
				messages.push(ChatMessage::new(
					Role::Tool,
					vec![ContentBlock::ToolResult {
						tool_use_id,
						content,
						is_error: false,
					}],
				));
			}
			"assistant" => {
				let mut blocks = content_blocks(&message.content)?;
				if let Some(tool_calls) = &message.tool_calls {
					for call in tool_calls {
						let input = serde_json::from_str(&call.function.arguments)
							.unwrap_or_else(|e| {
								tracing::warn!(call_id = %call.id, error = %e, "unparseable tool arguments, defaulting to empty object");
								serde_json::Value::Object(serde_json::Map::new())
							});
						blocks.push(ContentBlock::ToolUse {
							id: call.id.clone(),
							name: call.function.name.clone(),
							input,
						});
					}
				}
				messages.push(ChatMessage::new(Role::Assistant, blocks));
			}
			"user" => {
				messages.push(ChatMessage::new(Role::User, content_blocks(&message.content)?));
			}
			other => {
				return Err(ApiError::validation(format!("unknown role: {other}")));
			}
		}
	}

	// Explicit thinking config wins over reasoning_effort.
	let thinking_budget = match &request.thinking {
		Some(thinking) if thinking.kind.as_deref() != Some("disabled") => {
			thinking.budget_tokens.or(Some(16_000))
		}
		Some(_) => None,
		None => request
			.reasoning_effort
			.as_deref()
			.and_then(thinking_budget_for_effort),
	};

	let tools = request
		.tools
		.as_ref()
		.map(|tools| {
			tools
				.iter()
				.map(|tool| ToolSpec {
					name: tool.function.name.clone(),
					description: tool.function.description.clone(),
					input_schema: tool.function.parameters.clone(),
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
		system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
		tools,
		thinking_budget,
	})
}

fn content_text(content: &Option<OpenAiContent>) -> Option<String> {
	match content {
		Some(OpenAiContent::Text(text)) => Some(text.clone()),
		Some(OpenAiContent::Parts(parts)) => {
			let text: Vec<&str> = parts
				.iter()
				.filter_map(|p| match p {
					OpenAiContentPart::Text { text } => Some(text.as_str()),
					_ => None,
				})
				.collect();
			(!text.is_empty()).then(|| text.join("\n"))
		}
		None => None,
	}
}

fn content_blocks(content: &Option<OpenAiContent>) -> Result<Vec<ContentBlock>, ApiError> {
	match content {
		None => Ok(vec![]),
		Some(OpenAiContent::Text(text)) => Ok(vec![ContentBlock::text(text.clone())]),
		Some(OpenAiContent::Parts(parts)) => parts
			.iter()
			.map(|part| match part {
				OpenAiContentPart::Text { text } => Ok(ContentBlock::text(text.clone())),
				OpenAiContentPart::ImageUrl { image_url } => image_block(&image_url.url),
			})
			.collect(),
	}
}

/// `data:` URLs become inline base64 blocks; other URLs pass through.
fn image_block(url: &str) -> Result<ContentBlock, ApiError> {
	if let Some(rest) = url.strip_prefix("data:") {
		let (mime, data) = rest
			.split_once(";base64,")
			.ok_or_else(|| ApiError::validation("unsupported data url (expected base64)"))?;
		let format = mime.strip_prefix("image/").unwrap_or("png").to_string();
		return Ok(ContentBlock::Image {
			format,
			source: ImageSource::Base64 {
				data: data.to_string(),
			},
		});
	}

	let format = url
		.rsplit('.')
		.next()
		.filter(|ext| matches!(*ext, "png" | "jpg" | "jpeg" | "gif" | "webp"))
		.unwrap_or("png")
		.to_string();
	Ok(ContentBlock::Image {
		format,
		source: ImageSource::Url {
			url: url.to_string(),
		},
	})
}

fn completion_id() -> String {
	format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Assemble the non-streaming response body.
pub fn to_chat_completion(
	request: &ChatRequest,
	outcome: &CallOutcome,
) -> ChatCompletion {
	let reasoning: String = outcome
		.content_blocks
		.iter()
		.filter_map(|b| match b {
			ContentBlock::Thinking { text } => Some(text.as_str()),
			_ => None,
		})
		.collect();

	let tool_calls: Vec<ResponseToolCall> = outcome
		.tool_uses
		.iter()
		.map(|tool| ResponseToolCall {
			id: tool.tool_use_id.clone(),
			kind: "function",
			function: ResponseFunctionCall {
				name: tool.name.clone(),
				arguments: tool.input.to_string(),
			},
		})
		.collect();

	let finish_reason = if tool_calls.is_empty() {
		"stop"
	} else {
		"tool_calls"
	};

	let prompt_tokens = estimate_prompt_tokens(&request.messages, request.system.as_deref());
	let completion_tokens =
		estimate_text_tokens(&outcome.content) + estimate_text_tokens(&reasoning);

	ChatCompletion {
		id: completion_id(),
		object: "chat.completion",
		created: now_ms() / 1000,
		model: request.model.clone(),
		choices: vec![Choice {
			index: 0,
			message: AssistantMessage {
				role: "assistant",
				content: Some(outcome.content.clone()),
				reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
				tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
			},
			finish_reason: finish_reason.to_string(),
		}],
		usage: CompletionUsage {
			prompt_tokens,
			completion_tokens,
			total_tokens: prompt_tokens + completion_tokens,
		},
	}
}

/// Stateful encoder turning vendor events into OpenAI SSE chunks.
///
/// Framing rules: the first chunk carries `delta.role`, content and
/// reasoning deltas follow, tool calls stream name-then-arguments at
/// index 0, and the terminator chunk has an empty delta plus the finish
/// reason before the literal `data: [DONE]` line.
pub struct SseEncoder {
	id: String,
	created: i64,
	model: String,
	role_sent: bool,
	saw_tool_use: bool,
}

impl SseEncoder {
	pub fn new(model: impl Into<String>) -> Self {
		Self {
			id: completion_id(),
			created: now_ms() / 1000,
			model: model.into(),
			role_sent: false,
			saw_tool_use: false,
		}
	}

	fn chunk(&self, delta: Delta, finish_reason: Option<String>) -> String {
		let chunk = ChatCompletionChunk {
			id: self.id.clone(),
			object: "chat.completion.chunk",
			created: self.created,
			model: self.model.clone(),
			choices: vec![ChunkChoice {
				index: 0,
				delta,
				finish_reason,
			}],
		};
		// Serializing a value with no non-serializable fields cannot fail.
		let body = serde_json::to_string(&chunk).unwrap_or_default();
		format!("data: {body}\n\n")
	}

	fn role_preamble(&mut self, out: &mut Vec<String>) {
		if !self.role_sent {
			self.role_sent = true;
			out.push(self.chunk(
				Delta {
					role: Some("assistant"),
					content: Some(String::new()),
					..Delta::default()
				},
				None,
			));
		}
	}

	/// Encode one vendor event into zero or more SSE frames.
	pub fn encode(&mut self, event: &KiroEvent) -> Vec<String> {
		let mut out = Vec::new();
		match event {
			KiroEvent::Content(content) => {
				if content.is_empty() {
					return out;
				}
				self.role_preamble(&mut out);
				out.push(self.chunk(
					Delta {
						content: Some(content.clone()),
						..Delta::default()
					},
					None,
				));
			}
			KiroEvent::Thinking(text) => {
				if text.is_empty() {
					return out;
				}
				self.role_preamble(&mut out);
				out.push(self.chunk(
					Delta {
						reasoning_content: Some(text.clone()),
						..Delta::default()
					},
					None,
				));
			}
			KiroEvent::ThinkingStart | KiroEvent::ThinkingEnd => {}
			KiroEvent::ToolUseBegin { tool_use_id, name } => {
				self.saw_tool_use = true;
				self.role_preamble(&mut out);
				out.push(self.chunk(
					Delta {
						tool_calls: Some(vec![DeltaToolCall {
							index: 0,
							id: Some(tool_use_id.clone()),
							kind: Some("function"),
							function: DeltaFunctionCall {
								name: Some(name.clone()),
								arguments: Some(String::new()),
							},
						}]),
						..Delta::default()
					},
					None,
				));
			}
			KiroEvent::ToolUseInput { fragment } => {
				if fragment.is_empty() {
					return out;
				}
				self.role_preamble(&mut out);
				out.push(self.chunk(
					Delta {
						tool_calls: Some(vec![DeltaToolCall {
							index: 0,
							id: None,
							kind: None,
							function: DeltaFunctionCall {
								name: None,
								arguments: Some(fragment.clone()),
							},
						}]),
						..Delta::default()
					},
					None,
				));
			}
			// Stop frames, usage telemetry and token rotations are handled
			// by the orchestrator, not surfaced as chunks.
			KiroEvent::ToolUseStop { .. }
			| KiroEvent::ContextUsage(_)
			| KiroEvent::TokenRefreshed { .. } => {}
		}
		out
	}

	/// Terminator chunk plus the `[DONE]` sentinel.
	pub fn finish(&mut self) -> Vec<String> {
		let mut out = Vec::new();
		self.role_preamble(&mut out);
		let finish_reason = if self.saw_tool_use {
			"tool_calls"
		} else {
			"stop"
		};
		out.push(self.chunk(Delta::default(), Some(finish_reason.to_string())));
		out.push("data: [DONE]\n\n".to_string());
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{OpenAiMessage, ThinkingParam};
	use weft_kiro::VendorToolUse;

	fn user_message(text: &str) -> OpenAiMessage {
		OpenAiMessage {
			role: "user".to_string(),
			content: Some(OpenAiContent::Text(text.to_string())),
			tool_calls: None,
			tool_call_id: None,
			name: None,
		}
	}

	fn base_request(messages: Vec<OpenAiMessage>) -> ChatCompletionRequest {
		ChatCompletionRequest {
			model: Some("claude-sonnet-4-5".to_string()),
			messages,
			stream: false,
			tools: None,
			reasoning_effort: None,
			account_id: None,
			thinking: None,
			max_tokens: None,
			temperature: None,
		}
	}

	#[test]
	fn system_messages_concatenate_into_system_prompt() {
		let mut messages = vec![user_message("hi")];
		messages.insert(
			0,
			OpenAiMessage {
				role: "system".to_string(),
				content: Some(OpenAiContent::Text("one".to_string())),
				tool_calls: None,
				tool_call_id: None,
				name: None,
			},
		);
		messages.push(OpenAiMessage {
			role: "system".to_string(),
			content: Some(OpenAiContent::Text("two".to_string())),
			tool_calls: None,
			tool_call_id: None,
			name: None,
		});

		let chat = to_chat_request(&base_request(messages)).unwrap();
		assert_eq!(chat.system.as_deref(), Some("one\n\ntwo"));
		assert_eq!(chat.messages.len(), 1);
	}

	#[test]
	fn tool_role_becomes_tool_result_block() {
		let messages = vec![
			user_message("call it"),
			OpenAiMessage {
				role: "tool".to_string(),
				content: Some(OpenAiContent::Text("42".to_string())),
				tool_calls: None,
				tool_call_id: Some("t1".to_string()),
				name: None,
			},
		];
		let chat = to_chat_request(&base_request(messages)).unwrap();
		assert_eq!(
			chat.messages[1].content[0],
			ContentBlock::ToolResult {
				tool_use_id: "t1".to_string(),
				content: "42".to_string(),
				is_error: false,
			}
		);
	}

	#[test]
	fn assistant_tool_calls_become_tool_use_blocks() {
		let messages = vec![
			user_message("time?"),
			OpenAiMessage {
				role: "assistant".to_string(),
				content: None,
				tool_calls: Some(vec![crate::types::OpenAiToolCall {
					id: "t1".to_string(),
					kind: Some("function".to_string()),
					function: crate::types::OpenAiFunctionCall {
						name: "get_time".to_string(),
						arguments: r#"{"tz":"UTC"}"#.to_string(),
					},
				}]),
				tool_call_id: None,
				name: None,
			},
		];
		let chat = to_chat_request(&base_request(messages)).unwrap();
		assert_eq!(
			chat.messages[1].content[0],
			ContentBlock::ToolUse {
				id: "t1".to_string(),
				name: "get_time".to_string(),
				input: serde_json::json!({"tz": "UTC"}),
			}
		);
	}

	#[test]
	fn data_urls_become_base64_blocks() {
		let block = image_block("data:image/jpeg;base64,eA==").unwrap();
		assert_eq!(
			block,
			ContentBlock::Image {
				format: "jpeg".to_string(),
				source: ImageSource::Base64 {
					data: "eA==".to_string()
				}
			}
		);

		let block = image_block("https://example.com/pic.webp").unwrap();
		assert!(matches!(
			block,
			ContentBlock::Image { format, source: ImageSource::Url { .. } } if format == "webp"
		));
	}

	#[test]
	fn reasoning_effort_maps_to_budgets() {
		assert_eq!(thinking_budget_for_effort("low"), Some(8_000));
		assert_eq!(thinking_budget_for_effort("medium"), Some(16_000));
		assert_eq!(thinking_budget_for_effort("high"), Some(24_000));
		assert_eq!(thinking_budget_for_effort("none"), None);

		let mut request = base_request(vec![user_message("solve")]);
		request.reasoning_effort = Some("medium".to_string());
		assert_eq!(
			to_chat_request(&request).unwrap().thinking_budget,
			Some(16_000)
		);

		// Explicit thinking config wins.
		request.thinking = Some(ThinkingParam {
			kind: Some("enabled".to_string()),
			budget_tokens: Some(4_000),
		});
		assert_eq!(
			to_chat_request(&request).unwrap().thinking_budget,
			Some(4_000)
		);
	}

	#[test]
	fn empty_messages_rejected() {
		let err = to_chat_request(&base_request(vec![])).unwrap_err();
		assert_eq!(err.http_status(), 400);
	}

	#[test]
	fn non_stream_response_carries_usage_and_finish_reason() {
		let chat = to_chat_request(&base_request(vec![user_message("hi")])).unwrap();
		let outcome = CallOutcome {
			content: "hello there".to_string(),
			content_blocks: vec![ContentBlock::text("hello there")],
			tool_uses: vec![],
			context_usage: None,
			new_tokens: None,
		};
		let completion = to_chat_completion(&chat, &outcome);
		assert_eq!(completion.object, "chat.completion");
		assert_eq!(completion.choices[0].finish_reason, "stop");
		assert_eq!(completion.usage.prompt_tokens, 1);
		assert_eq!(
			completion.choices[0].message.content.as_deref(),
			Some("hello there")
		);

		let outcome = CallOutcome {
			content: String::new(),
			content_blocks: vec![],
			tool_uses: vec![VendorToolUse {
				tool_use_id: "t1".to_string(),
				name: "get_time".to_string(),
				input: serde_json::json!({}),
			}],
			context_usage: None,
			new_tokens: None,
		};
		let completion = to_chat_completion(&chat, &outcome);
		assert_eq!(completion.choices[0].finish_reason, "tool_calls");
		assert_eq!(
			completion.choices[0]
				.message
				.tool_calls
				.as_ref()
				.unwrap()
				.len(),
			1
		);
	}

	#[test]
	fn sse_stream_frames_role_content_and_done() {
		let mut encoder = SseEncoder::new("claude-sonnet-4-5");
		let mut frames = Vec::new();
		frames.extend(encoder.encode(&KiroEvent::Content("hello".to_string())));
		frames.extend(encoder.encode(&KiroEvent::Content(" world".to_string())));
		frames.extend(encoder.finish());

		assert_eq!(frames.len(), 5);
		assert!(frames[0].contains("\"role\":\"assistant\""));
		assert!(frames[1].contains("\"content\":\"hello\""));
		assert!(frames[2].contains("\"content\":\" world\""));
		assert!(frames[3].contains("\"finish_reason\":\"stop\""));
		assert_eq!(frames[4], "data: [DONE]\n\n");
	}

	#[test]
	fn sse_thinking_frames_use_reasoning_content() {
		let mut encoder = SseEncoder::new("m");
		let frames: Vec<String> = [
			encoder.encode(&KiroEvent::ThinkingStart),
			encoder.encode(&KiroEvent::Thinking("because".to_string())),
			encoder.encode(&KiroEvent::ThinkingEnd),
			encoder.encode(&KiroEvent::Content("answer".to_string())),
		]
		.into_iter()
		.flatten()
		.collect();

		assert!(frames
			.iter()
			.any(|f| f.contains("\"reasoning_content\":\"because\"")));
		assert!(frames.iter().any(|f| f.contains("\"content\":\"answer\"")));
	}

	#[test]
	fn sse_tool_calls_stream_name_then_arguments() {
		let mut encoder = SseEncoder::new("m");
		let mut frames = Vec::new();
		frames.extend(encoder.encode(&KiroEvent::ToolUseBegin {
			tool_use_id: "t1".to_string(),
			name: "get_time".to_string(),
		}));
		frames.extend(encoder.encode(&KiroEvent::ToolUseInput {
			fragment: "{\"tz\":".to_string(),
		}));
		frames.extend(encoder.finish());

		assert!(frames[1].contains("\"name\":\"get_time\""));
		assert!(frames[1].contains("\"id\":\"t1\""));
		assert!(frames[2].contains("\"arguments\":\"{\\\"tz\\\":\""));
		assert!(frames[3].contains("\"finish_reason\":\"tool_calls\""));
	}
}
