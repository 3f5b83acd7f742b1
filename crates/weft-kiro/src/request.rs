// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vendor request construction.
//!
//! The vendor speaks a conversation-state shape with strict invariants:
//! alternating user/assistant history ending on an assistant entry, tool
//! results that exactly match the previous assistant's tool-use ids, and
//! size caps on tool names and descriptions. Everything here is pure
//! translation from the normalized [`ChatRequest`].

use serde::Serialize;

use weft_core::chat::{ChatMessage, ChatRequest, ContentBlock, ImageSource, Role};
use weft_core::ToolSpec;

use crate::model::vendor_model_id;

pub const MAX_TOOL_NAME_LEN: usize = 64;
pub const MAX_TOOL_DESCRIPTION_LEN: usize = 10_237;
/// History entries beyond this distance from the end lose their images.
pub const IMAGE_HISTORY_WINDOW: usize = 5;

const THINKING_MODE_TAG: &str = "<thinking_mode>enabled</thinking_mode>";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorRequest {
	pub conversation_state: ConversationState,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub profile_arn: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
	pub chat_trigger_type: String,
	pub conversation_id: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub history: Vec<HistoryEntry>,
	pub current_message: CurrentMessage,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum HistoryEntry {
	UserInputMessage(UserInputMessage),
	AssistantResponseMessage(AssistantResponseMessage),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMessage {
	pub user_input_message: UserInputMessage,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
	pub content: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model_id: Option<String>,
	pub origin: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub images: Option<Vec<VendorImage>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_input_message_context: Option<UserInputMessageContext>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<VendorToolSpec>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_results: Option<Vec<VendorToolResult>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseMessage {
	pub content: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_uses: Option<Vec<VendorToolUse>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorToolSpec {
	pub tool_specification: ToolSpecification,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
	pub name: String,
	pub description: String,
	pub input_schema: InputSchema,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
	pub json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorToolUse {
	pub tool_use_id: String,
	pub name: String,
	pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorToolResult {
	pub tool_use_id: String,
	pub content: Vec<ToolResultContent>,
	pub status: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolResultContent {
	pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorImage {
	pub format: String,
	pub source: VendorImageSource,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum VendorImageSource {
	Bytes { bytes: String },
	Url { url: String },
}

/// Per-call inputs that do not come from the chat request itself.
#[derive(Debug, Clone)]
pub struct RequestOptions {
	pub conversation_id: String,
	pub profile_arn: Option<String>,
}

/// Intermediate shape after role merging.
#[derive(Debug, Default, Clone)]
struct Normalized {
	role: Role,
	text_parts: Vec<String>,
	images: Vec<VendorImage>,
	tool_uses: Vec<VendorToolUse>,
	tool_results: Vec<VendorToolResult>,
	synthesized: bool,
}

impl Normalized {
	fn content(&self) -> String {
		self.text_parts.join("\n")
	}

	fn prepend_text(&mut self, text: &str) {
		match self.text_parts.first_mut() {
			Some(first) => *first = format!("{text}\n\n{first}"),
			None => self.text_parts.push(text.to_string()),
		}
	}
}

/// Build the vendor request for a normalized chat request.
pub fn build_vendor_request(request: &ChatRequest, options: &RequestOptions) -> VendorRequest {
	let mut messages = normalize_messages(&request.messages);
	let system = effective_system(request);

	// Trailing assistant turns become history; the vendor always receives a
	// user message as the current turn.
	let current = match messages.last() {
		Some(last) if last.role == Role::Assistant => Normalized {
			role: Role::User,
			text_parts: vec!["Continue".to_string()],
			synthesized: true,
			..Normalized::default()
		},
		Some(_) => messages.pop().unwrap_or_default(),
		None => Normalized {
			role: Role::User,
			text_parts: vec!["Continue".to_string()],
			synthesized: true,
			..Normalized::default()
		},
	};
	let mut current = current;

	// System prompt lands on the first real user message, or at history head.
	if let Some(system) = system {
		if let Some(first_user) = messages.iter_mut().find(|m| m.role == Role::User) {
			first_user.prepend_text(&system);
		} else if !current.synthesized {
			current.prepend_text(&system);
		} else {
			messages.insert(
				0,
				Normalized {
					role: Role::User,
					text_parts: vec![system],
					..Normalized::default()
				},
			);
		}
	}

	let expected_tool_ids = last_assistant_tool_ids(&messages);
	let history = build_history(messages);

	let tools = sanitize_tools(&request.tools);
	let tool_results = match_tool_results(current.tool_results.clone(), &expected_tool_ids);

	let context = if tools.is_empty() && tool_results.is_empty() {
		None
	} else {
		Some(UserInputMessageContext {
			tools: (!tools.is_empty()).then_some(tools),
			tool_results: (!tool_results.is_empty()).then_some(tool_results),
		})
	};

	let current_message = CurrentMessage {
		user_input_message: UserInputMessage {
			content: current.content(),
			model_id: Some(vendor_model_id(&request.model).to_string()),
			origin: "AI_EDITOR".to_string(),
			images: (!current.images.is_empty()).then(|| current.images.clone()),
			user_input_message_context: context,
		},
	};

	VendorRequest {
		conversation_state: ConversationState {
			chat_trigger_type: "MANUAL".to_string(),
			conversation_id: options.conversation_id.clone(),
			history,
			current_message,
		},
		profile_arn: options.profile_arn.clone(),
	}
}

/// Collapse adjacent same-role messages and flatten blocks.
fn normalize_messages(messages: &[ChatMessage]) -> Vec<Normalized> {
	let mut out: Vec<Normalized> = Vec::new();

	for message in messages {
		// Tool-result carriers behave as user turns; stray system messages
		// degrade to user text rather than being dropped.
		let role = match message.role {
			Role::Assistant => Role::Assistant,
			_ => Role::User,
		};

		let mut normalized = Normalized {
			role,
			..Normalized::default()
		};

		for block in &message.content {
			match block {
				ContentBlock::Text { text } => {
					if !text.is_empty() {
						normalized.text_parts.push(text.clone());
					}
				}
				ContentBlock::Thinking { .. } => {}
				ContentBlock::Image { format, source } => {
					normalized.images.push(convert_image(format, source));
				}
				ContentBlock::ToolUse { id, name, input } => {
					normalized.tool_uses.push(VendorToolUse {
						tool_use_id: id.clone(),
						name: name.clone(),
						input: input.clone(),
					});
				}
				ContentBlock::ToolResult {
					tool_use_id,
					content,
					is_error,
				} => {
					normalized.tool_results.push(VendorToolResult {
						tool_use_id: tool_use_id.clone(),
						content: vec![ToolResultContent {
							text: content.clone(),
						}],
						status: if *is_error { "error" } else { "success" }.to_string(),
					});
				}
			}
		}

		match out.last_mut() {
			Some(prev) if prev.role == normalized.role => {
				prev.text_parts.extend(normalized.text_parts);
				prev.images.extend(normalized.images);
				prev.tool_uses.extend(normalized.tool_uses);
				prev.tool_results.extend(normalized.tool_results);
			}
			_ => out.push(normalized),
		}
	}

	out
}

fn convert_image(format: &str, source: &ImageSource) -> VendorImage {
	match source {
		ImageSource::Base64 { data } => VendorImage {
			format: format.to_string(),
			source: VendorImageSource::Bytes {
				bytes: data.clone(),
			},
		},
		ImageSource::Url { url } => VendorImage {
			format: format.to_string(),
			source: VendorImageSource::Url { url: url.clone() },
		},
	}
}

/// The system text sent to the vendor, with thinking-mode tags injected
/// when a budget is set and the tags are not already present.
fn effective_system(request: &ChatRequest) -> Option<String> {
	let mut system = request.system.clone().unwrap_or_default();

	if let Some(budget) = request.thinking_budget {
		if !system.contains(THINKING_MODE_TAG) {
			system.push_str(&format!(
				"{THINKING_MODE_TAG}<max_thinking_length>{budget}</max_thinking_length>"
			));
		}
	}

	(!system.is_empty()).then_some(system)
}

/// Tool-use ids the vendor will demand results for.
fn last_assistant_tool_ids(messages: &[Normalized]) -> Vec<String> {
	messages
		.iter()
		.rev()
		.find(|m| m.role == Role::Assistant)
		.map(|m| m.tool_uses.iter().map(|t| t.tool_use_id.clone()).collect())
		.unwrap_or_default()
}

/// Convert normalized history, enforcing the trailing-assistant invariant
/// and the image retention window.
fn build_history(messages: Vec<Normalized>) -> Vec<HistoryEntry> {
	let len = messages.len();
	let mut history: Vec<HistoryEntry> = Vec::with_capacity(len + 1);

	for (idx, message) in messages.into_iter().enumerate() {
		match message.role {
			Role::Assistant => {
				history.push(HistoryEntry::AssistantResponseMessage(
					AssistantResponseMessage {
						content: message.content(),
						tool_uses: (!message.tool_uses.is_empty())
							.then(|| message.tool_uses.clone()),
					},
				));
			}
			_ => {
				let in_window = len - idx <= IMAGE_HISTORY_WINDOW;
				let mut content = message.content();
				let images = if in_window || message.images.is_empty() {
					(!message.images.is_empty()).then(|| message.images.clone())
				} else {
					let count = message.images.len();
					let placeholder = format!(
						"[This message contains {count} image(s), omitted from history]"
					);
					if content.is_empty() {
						content = placeholder;
					} else {
						content = format!("{content}\n{placeholder}");
					}
					None
				};
				let tool_results = (!message.tool_results.is_empty())
					.then(|| message.tool_results.clone());
				history.push(HistoryEntry::UserInputMessage(UserInputMessage {
					content,
					model_id: None,
					origin: "AI_EDITOR".to_string(),
					images,
					user_input_message_context: tool_results.map(|tr| UserInputMessageContext {
						tools: None,
						tool_results: Some(tr),
					}),
				}));
			}
		}
	}

	if matches!(history.last(), Some(HistoryEntry::UserInputMessage(_))) {
		history.push(HistoryEntry::AssistantResponseMessage(
			AssistantResponseMessage {
				content: "Continue".to_string(),
				tool_uses: None,
			},
		));
	}

	history
}

/// Dedupe tool results by id and reconcile them with the ids the vendor
/// expects from the previous assistant turn.
pub fn match_tool_results(
	results: Vec<VendorToolResult>,
	expected_ids: &[String],
) -> Vec<VendorToolResult> {
	let mut seen = std::collections::HashSet::new();
	let mut deduped: Vec<VendorToolResult> = results
		.into_iter()
		.filter(|r| seen.insert(r.tool_use_id.clone()))
		.collect();

	if expected_ids.is_empty() {
		return deduped;
	}

	// The vendor rejects results it never asked for.
	deduped.retain(|r| expected_ids.contains(&r.tool_use_id));

	for expected in expected_ids {
		if !deduped.iter().any(|r| &r.tool_use_id == expected) {
			deduped.push(VendorToolResult {
				tool_use_id: expected.clone(),
				content: vec![ToolResultContent {
					text: "tool result provided".to_string(),
				}],
				status: "success".to_string(),
			});
		}
	}

	deduped
}

/// Drop vendor-filtered tools and enforce the name/description caps.
pub fn sanitize_tools(tools: &[ToolSpec]) -> Vec<VendorToolSpec> {
	tools
		.iter()
		.filter(|tool| {
			let lower = tool.name.to_lowercase();
			lower != "web_search" && lower != "websearch"
		})
		.map(|tool| VendorToolSpec {
			tool_specification: ToolSpecification {
				name: sanitize_tool_name(&tool.name),
				description: sanitize_tool_description(&tool.description),
				input_schema: InputSchema {
					json: tool.input_schema.clone(),
				},
			},
		})
		.collect()
}

/// Cap a tool name at 64 chars, keeping the first 32 and last 31 joined
/// with `_` so both the prefix and the distinguishing suffix survive.
pub fn sanitize_tool_name(name: &str) -> String {
	let chars: Vec<char> = name.chars().collect();
	if chars.len() <= MAX_TOOL_NAME_LEN {
		return name.to_string();
	}
	let head: String = chars[..32].iter().collect();
	let tail: String = chars[chars.len() - 31..].iter().collect();
	format!("{head}_{tail}")
}

/// Non-empty description capped at the vendor limit, ellipsized.
pub fn sanitize_tool_description(description: &str) -> String {
	if description.is_empty() {
		return "No description provided".to_string();
	}
	let chars: Vec<char> = description.chars().collect();
	if chars.len() <= MAX_TOOL_DESCRIPTION_LEN {
		return description.to_string();
	}
	let head: String = chars[..MAX_TOOL_DESCRIPTION_LEN - 3].iter().collect();
	format!("{head}...")
}

#[cfg(test)]
mod tests {
	use super::*;
	use weft_core::chat::ChatMessage;

	fn options() -> RequestOptions {
		RequestOptions {
			conversation_id: "conv-1".to_string(),
			profile_arn: None,
		}
	}

	fn request(messages: Vec<ChatMessage>) -> ChatRequest {
		ChatRequest {
			model: "claude-sonnet-4-5".to_string(),
			messages,
			system: None,
			tools: vec![],
			thinking_budget: None,
		}
	}

	fn current_content(vr: &VendorRequest) -> &str {
		&vr.conversation_state.current_message.user_input_message.content
	}

	#[test]
	fn single_user_message_has_no_history() {
		let vr = build_vendor_request(&request(vec![ChatMessage::user("hi")]), &options());
		assert!(vr.conversation_state.history.is_empty());
		assert_eq!(current_content(&vr), "hi");
		assert_eq!(
			vr.conversation_state
				.current_message
				.user_input_message
				.model_id
				.as_deref(),
			Some("CLAUDE_SONNET_4_5_20250929_V1_0")
		);
		assert_eq!(vr.conversation_state.chat_trigger_type, "MANUAL");
	}

	#[test]
	fn adjacent_same_role_messages_merge_with_newline() {
		let vr = build_vendor_request(
			&request(vec![
				ChatMessage::user("first"),
				ChatMessage::user("second"),
			]),
			&options(),
		);
		assert!(vr.conversation_state.history.is_empty());
		assert_eq!(current_content(&vr), "first\nsecond");
	}

	#[test]
	fn trailing_assistant_moves_to_history_with_continue() {
		let vr = build_vendor_request(
			&request(vec![
				ChatMessage::user("question"),
				ChatMessage::assistant("partial answer"),
			]),
			&options(),
		);
		assert_eq!(current_content(&vr), "Continue");
		let history = &vr.conversation_state.history;
		assert_eq!(history.len(), 2);
		assert!(matches!(&history[0], HistoryEntry::UserInputMessage(m) if m.content == "question"));
		assert!(matches!(
			&history[1],
			HistoryEntry::AssistantResponseMessage(m) if m.content == "partial answer"
		));
	}

	#[test]
	fn history_always_ends_with_assistant_entry() {
		let vr = build_vendor_request(
			&request(vec![
				ChatMessage::user("q1"),
				ChatMessage::assistant("a1"),
				ChatMessage::user("tool output"),
				ChatMessage::assistant("a2"),
				ChatMessage::user("q2"),
			]),
			&options(),
		);
		let history = &vr.conversation_state.history;
		assert!(matches!(
			history.last(),
			Some(HistoryEntry::AssistantResponseMessage(_))
		));
		assert_eq!(current_content(&vr), "q2");
	}

	#[test]
	fn system_prepends_to_first_user_content() {
		let mut req = request(vec![ChatMessage::user("hi")]);
		req.system = Some("be terse".to_string());
		let vr = build_vendor_request(&req, &options());
		assert_eq!(current_content(&vr), "be terse\n\nhi");
	}

	#[test]
	fn system_without_user_message_becomes_history_head() {
		let mut req = request(vec![ChatMessage::assistant("hello")]);
		req.system = Some("be terse".to_string());
		let vr = build_vendor_request(&req, &options());
		let history = &vr.conversation_state.history;
		assert!(matches!(
			&history[0],
			HistoryEntry::UserInputMessage(m) if m.content == "be terse"
		));
		assert_eq!(current_content(&vr), "Continue");
	}

	#[test]
	fn thinking_budget_injects_tags_once() {
		let mut req = request(vec![ChatMessage::user("solve")]);
		req.thinking_budget = Some(16_000);
		let vr = build_vendor_request(&req, &options());
		assert!(current_content(&vr).starts_with(
			"<thinking_mode>enabled</thinking_mode><max_thinking_length>16000</max_thinking_length>"
		));

		// Already-present tags are not duplicated.
		req.system = Some("<thinking_mode>enabled</thinking_mode> custom".to_string());
		let vr = build_vendor_request(&req, &options());
		let content = current_content(&vr);
		assert_eq!(content.matches("<thinking_mode>").count(), 1);
	}

	#[test]
	fn base64_images_become_byte_sources() {
		let message = ChatMessage::new(
			Role::User,
			vec![
				ContentBlock::text("look"),
				ContentBlock::Image {
					format: "png".to_string(),
					source: ImageSource::Base64 {
						data: "aGVsbG8=".to_string(),
					},
				},
			],
		);
		let vr = build_vendor_request(&request(vec![message]), &options());
		let images = vr
			.conversation_state
			.current_message
			.user_input_message
			.images
			.as_ref()
			.unwrap();
		assert_eq!(
			images[0],
			VendorImage {
				format: "png".to_string(),
				source: VendorImageSource::Bytes {
					bytes: "aGVsbG8=".to_string()
				}
			}
		);
	}

	#[test]
	fn old_history_images_collapse_to_placeholder() {
		// Build 8 user/assistant pairs so early user entries fall outside
		// the retention window.
		let mut messages = Vec::new();
		messages.push(ChatMessage::new(
			Role::User,
			vec![
				ContentBlock::text("first"),
				ContentBlock::Image {
					format: "png".to_string(),
					source: ImageSource::Base64 {
						data: "eA==".to_string(),
					},
				},
			],
		));
		messages.push(ChatMessage::assistant("a0"));
		for i in 0..4 {
			messages.push(ChatMessage::user(format!("q{i}")));
			messages.push(ChatMessage::assistant(format!("a{i}")));
		}
		messages.push(ChatMessage::user("current"));

		let vr = build_vendor_request(&request(messages), &options());
		let HistoryEntry::UserInputMessage(first) = &vr.conversation_state.history[0] else {
			panic!("expected user entry first");
		};
		assert!(first.images.is_none());
		assert!(first
			.content
			.contains("[This message contains 1 image(s), omitted from history]"));
	}

	#[test]
	fn tool_name_truncation_is_exact() {
		let name = "x".repeat(100);
		let sanitized = sanitize_tool_name(&name);
		assert_eq!(sanitized.chars().count(), 64);
		assert_eq!(sanitized.chars().nth(32), Some('_'));

		let distinct = format!("{}{}", "a".repeat(50), "b".repeat(50));
		let sanitized = sanitize_tool_name(&distinct);
		assert!(sanitized.starts_with(&"a".repeat(32)));
		assert!(sanitized.ends_with(&"b".repeat(31)));
	}

	#[test]
	fn short_tool_names_pass_through() {
		assert_eq!(sanitize_tool_name("get_time"), "get_time");
		let exactly = "y".repeat(64);
		assert_eq!(sanitize_tool_name(&exactly), exactly);
	}

	#[test]
	fn tool_description_defaults_and_caps() {
		assert_eq!(sanitize_tool_description(""), "No description provided");

		let long = "d".repeat(MAX_TOOL_DESCRIPTION_LEN + 10);
		let sanitized = sanitize_tool_description(&long);
		assert_eq!(sanitized.chars().count(), MAX_TOOL_DESCRIPTION_LEN);
		assert!(sanitized.ends_with("..."));
	}

	#[test]
	fn web_search_tools_are_filtered() {
		let tools = vec![
			ToolSpec {
				name: "web_search".to_string(),
				description: "search".to_string(),
				input_schema: serde_json::json!({}),
			},
			ToolSpec {
				name: "WebSearch".to_string(),
				description: "search".to_string(),
				input_schema: serde_json::json!({}),
			},
			ToolSpec {
				name: "get_time".to_string(),
				description: "time".to_string(),
				input_schema: serde_json::json!({}),
			},
		];
		let sanitized = sanitize_tools(&tools);
		assert_eq!(sanitized.len(), 1);
		assert_eq!(sanitized[0].tool_specification.name, "get_time");
	}

	#[test]
	fn tool_results_dedupe_and_synthesize() {
		let result = |id: &str| VendorToolResult {
			tool_use_id: id.to_string(),
			content: vec![ToolResultContent {
				text: "out".to_string(),
			}],
			status: "success".to_string(),
		};
		let expected = vec!["t1".to_string(), "t2".to_string()];

		let matched = match_tool_results(vec![result("t1"), result("t1"), result("t9")], &expected);
		assert_eq!(matched.len(), 2);
		assert_eq!(matched[0].tool_use_id, "t1");
		assert_eq!(matched[0].content[0].text, "out");
		// t9 was never asked for; t2 gets a synthetic entry.
		assert_eq!(matched[1].tool_use_id, "t2");
		assert_eq!(matched[1].content[0].text, "tool result provided");
	}

	#[test]
	fn tool_results_flow_into_current_message_context() {
		let messages = vec![
			ChatMessage::user("call a tool"),
			ChatMessage::new(
				Role::Assistant,
				vec![ContentBlock::ToolUse {
					id: "t1".to_string(),
					name: "get_time".to_string(),
					input: serde_json::json!({}),
				}],
			),
			ChatMessage::new(
				Role::Tool,
				vec![ContentBlock::ToolResult {
					tool_use_id: "t1".to_string(),
					content: "12:00".to_string(),
					is_error: false,
				}],
			),
		];
		let vr = build_vendor_request(&request(messages), &options());
		let context = vr
			.conversation_state
			.current_message
			.user_input_message
			.user_input_message_context
			.as_ref()
			.unwrap();
		let results = context.tool_results.as_ref().unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].tool_use_id, "t1");
		assert_eq!(results[0].content[0].text, "12:00");

		// History carries the assistant tool use and still ends on assistant.
		assert!(matches!(
			vr.conversation_state.history.last(),
			Some(HistoryEntry::AssistantResponseMessage(m)) if m.tool_uses.is_some()
		));
	}

	#[test]
	fn serialized_shape_uses_camel_case_tags() {
		let vr = build_vendor_request(
			&request(vec![
				ChatMessage::user("q"),
				ChatMessage::assistant("a"),
				ChatMessage::user("q2"),
			]),
			&options(),
		);
		let json = serde_json::to_value(&vr).unwrap();
		assert_eq!(json["conversationState"]["chatTriggerType"], "MANUAL");
		assert!(json["conversationState"]["history"][0]["userInputMessage"].is_object());
		assert!(json["conversationState"]["history"][1]["assistantResponseMessage"].is_object());
		assert_eq!(
			json["conversationState"]["currentMessage"]["userInputMessage"]["origin"],
			"AI_EDITOR"
		);
		assert!(json.get("profileArn").is_none());
	}
}
