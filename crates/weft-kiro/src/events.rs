// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vendor event-stream parsing.
//!
//! The vendor frames logical events as bare JSON objects concatenated
//! back-to-back in the response body (no SSE framing). The scanner looks
//! for a known set of opening token sequences, brace-matches each payload
//! with string/escape awareness, and keeps unrecognized or incomplete
//! tails for the next chunk.

use serde::Deserialize;

/// Logical events produced by the vendor stream.
#[derive(Debug, Clone, PartialEq)]
pub enum KiroEvent {
	Content(String),
	ThinkingStart,
	Thinking(String),
	ThinkingEnd,
	ToolUseBegin {
		tool_use_id: String,
		name: String,
	},
	ToolUseInput {
		fragment: String,
	},
	ToolUseStop {
		tool_use_id: String,
		name: String,
		input: serde_json::Value,
	},
	ContextUsage(f64),
	/// Emitted by the client when an in-band token refresh succeeded, so
	/// the orchestrator can persist the rotated credentials.
	TokenRefreshed {
		access_token: String,
		refresh_token: Option<String>,
		expires_at: i64,
	},
}

/// Opening token sequences the scanner recognizes.
const KNOWN_PREFIXES: &[&str] = &[
	"{\"content\":",
	"{\"name\":",
	"{\"followupPrompt\":",
	"{\"input\":",
	"{\"stop\":",
	"{\"contextUsagePercentage\":",
];

#[derive(Debug, Deserialize)]
struct ContentPayload {
	content: String,
}

#[derive(Debug, Deserialize)]
struct ToolUsePayload {
	name: Option<String>,
	#[serde(rename = "toolUseId")]
	tool_use_id: Option<String>,
	input: Option<serde_json::Value>,
	stop: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ContextUsagePayload {
	#[serde(rename = "contextUsagePercentage")]
	context_usage_percentage: f64,
}

#[derive(Debug, Default)]
struct ToolUseState {
	tool_use_id: String,
	name: String,
	input_fragments: String,
}

/// Incremental payload scanner. Feed chunks, collect [`KiroEvent`]s.
#[derive(Debug, Default)]
pub struct EventStreamParser {
	buffer: String,
	current_tool: Option<ToolUseState>,
	last_content: Option<String>,
}

impl EventStreamParser {
	pub fn new() -> Self {
		Self::default()
	}

	/// Consume one transport chunk and return the completed events.
	pub fn feed(&mut self, chunk: &str) -> Vec<KiroEvent> {
		self.buffer.push_str(chunk);
		let mut events = Vec::new();

		loop {
			let Some(start) = self.next_payload_start() else {
				// Nothing recognizable: keep only a tail that could still
				// become the start of a known prefix.
				self.trim_garbage();
				break;
			};
			let Some(end) = find_json_end(&self.buffer, start) else {
				// Incomplete payload: drop the garbage before it, wait for
				// more data.
				if start > 0 {
					self.buffer.drain(..start);
				}
				break;
			};

			let payload = self.buffer[start..=end].to_string();
			self.buffer.drain(..=end);
			self.dispatch(&payload, &mut events);
		}

		events
	}

	/// Flush any tool-use left open at end of stream.
	pub fn finish(&mut self) -> Vec<KiroEvent> {
		let mut events = Vec::new();
		if let Some(state) = self.current_tool.take() {
			events.push(close_tool(state));
		}
		events
	}

	/// Earliest offset at which a known payload begins.
	fn next_payload_start(&self) -> Option<usize> {
		KNOWN_PREFIXES
			.iter()
			.filter_map(|prefix| self.buffer.find(prefix))
			.min()
	}

	/// Keep at most a suffix that could still be a prefix of a known token.
	fn trim_garbage(&mut self) {
		let keep_from = self.buffer.rfind('{').unwrap_or(self.buffer.len());
		if keep_from > 0 {
			self.buffer.drain(..keep_from);
		}
	}

	fn dispatch(&mut self, payload: &str, events: &mut Vec<KiroEvent>) {
		if payload.starts_with("{\"content\":") {
			match serde_json::from_str::<ContentPayload>(payload) {
				Ok(parsed) => {
					// The vendor occasionally repeats a frame verbatim.
					if self.last_content.as_deref() == Some(parsed.content.as_str()) {
						tracing::trace!("dropping duplicated content frame");
						return;
					}
					self.last_content = Some(parsed.content.clone());
					events.push(KiroEvent::Content(parsed.content));
				}
				Err(e) => tracing::warn!(error = %e, "unparseable content payload"),
			}
			return;
		}

		if payload.starts_with("{\"contextUsagePercentage\":") {
			match serde_json::from_str::<ContextUsagePayload>(payload) {
				Ok(parsed) => events.push(KiroEvent::ContextUsage(parsed.context_usage_percentage)),
				Err(e) => tracing::warn!(error = %e, "unparseable context usage payload"),
			}
			return;
		}

		if payload.starts_with("{\"followupPrompt\":") {
			tracing::trace!("ignoring followup prompt payload");
			return;
		}

		// Everything else is part of the tool-use protocol: a named begin
		// frame, bare input continuations, and a stop frame.
		match serde_json::from_str::<ToolUsePayload>(payload) {
			Ok(parsed) => self.dispatch_tool(parsed, events),
			Err(e) => tracing::warn!(error = %e, payload, "unparseable tool payload"),
		}
	}

	fn dispatch_tool(&mut self, payload: ToolUsePayload, events: &mut Vec<KiroEvent>) {
		if let Some(name) = payload.name {
			// A new named frame closes any tool left open.
			if let Some(open) = self.current_tool.take() {
				events.push(close_tool(open));
			}
			let tool_use_id = payload.tool_use_id.unwrap_or_default();
			events.push(KiroEvent::ToolUseBegin {
				tool_use_id: tool_use_id.clone(),
				name: name.clone(),
			});
			let mut state = ToolUseState {
				tool_use_id,
				name,
				input_fragments: String::new(),
			};
			if let Some(input) = payload.input {
				let fragment = input_fragment(&input);
				events.push(KiroEvent::ToolUseInput {
					fragment: fragment.clone(),
				});
				state.input_fragments.push_str(&fragment);
			}
			if payload.stop == Some(true) {
				events.push(close_tool(state));
			} else {
				self.current_tool = Some(state);
			}
			return;
		}

		if let Some(input) = payload.input {
			let fragment = input_fragment(&input);
			if let Some(state) = self.current_tool.as_mut() {
				state.input_fragments.push_str(&fragment);
				events.push(KiroEvent::ToolUseInput { fragment });
			} else {
				tracing::debug!("input payload outside a tool use, ignoring");
			}
			return;
		}

		if payload.stop == Some(true) {
			if let Some(state) = self.current_tool.take() {
				events.push(close_tool(state));
			}
		}
	}
}

fn input_fragment(input: &serde_json::Value) -> String {
	match input {
		serde_json::Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

fn close_tool(state: ToolUseState) -> KiroEvent {
	let input = if state.input_fragments.is_empty() {
		serde_json::Value::Object(serde_json::Map::new())
	} else {
		serde_json::from_str(&state.input_fragments)
			.unwrap_or(serde_json::Value::String(state.input_fragments.clone()))
	};
	KiroEvent::ToolUseStop {
		tool_use_id: state.tool_use_id,
		name: state.name,
		input,
	}
}

/// Index of the brace closing the JSON object that starts at `start`.
///
/// Tracks string state and escapes so braces inside string literals do not
/// confuse the depth counter.
pub fn find_json_end(s: &str, start: usize) -> Option<usize> {
	let bytes = s.as_bytes();
	debug_assert_eq!(bytes.get(start), Some(&b'{'));

	let mut depth = 0usize;
	let mut in_string = false;
	let mut escaped = false;

	for (offset, &b) in bytes[start..].iter().enumerate() {
		if escaped {
			escaped = false;
			continue;
		}
		match b {
			b'\\' if in_string => escaped = true,
			b'"' => in_string = !in_string,
			b'{' if !in_string => depth += 1,
			b'}' if !in_string => {
				depth -= 1;
				if depth == 0 {
					return Some(start + offset);
				}
			}
			_ => {}
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	fn feed_all(chunks: &[&str]) -> Vec<KiroEvent> {
		let mut parser = EventStreamParser::new();
		let mut events = Vec::new();
		for chunk in chunks {
			events.extend(parser.feed(chunk));
		}
		events.extend(parser.finish());
		events
	}

	#[test]
	fn finds_json_end_through_strings_and_escapes() {
		let s = r#"{"content":"brace } in \" string"}"#;
		assert_eq!(find_json_end(s, 0), Some(s.len() - 1));

		let nested = r#"{"a":{"b":"}"}}"#;
		assert_eq!(find_json_end(nested, 0), Some(nested.len() - 1));

		assert_eq!(find_json_end(r#"{"a":"unterminated"#, 0), None);
	}

	#[test]
	fn parses_concatenated_content_payloads() {
		let events = feed_all(&[r#"{"content":"hello "}{"content":"world"}"#]);
		assert_eq!(
			events,
			vec![
				KiroEvent::Content("hello ".to_string()),
				KiroEvent::Content("world".to_string()),
			]
		);
	}

	#[test]
	fn retains_incomplete_tail_across_chunks() {
		let events = feed_all(&[r#"{"content":"hel"#, r#"lo"}"#]);
		assert_eq!(events, vec![KiroEvent::Content("hello".to_string())]);
	}

	#[test]
	fn skips_framing_garbage_between_payloads() {
		let events = feed_all(&[
			"\u{0}\u{4}binary-frame-header{\"content\":\"a\"}junk{\"content\":\"b\"}",
		]);
		assert_eq!(
			events,
			vec![
				KiroEvent::Content("a".to_string()),
				KiroEvent::Content("b".to_string()),
			]
		);
	}

	#[test]
	fn deduplicates_immediately_repeated_content() {
		let events = feed_all(&[r#"{"content":"dup"}{"content":"dup"}{"content":"new"}"#]);
		assert_eq!(
			events,
			vec![
				KiroEvent::Content("dup".to_string()),
				KiroEvent::Content("new".to_string()),
			]
		);
	}

	#[test]
	fn assembles_tool_use_lifecycle() {
		let events = feed_all(&[
			r#"{"name":"get_time","toolUseId":"t1"}"#,
			r#"{"input":"{\"tz\":"}"#,
			r#"{"input":"\"UTC\"}"}"#,
			r#"{"stop":true}"#,
		]);
		assert_eq!(
			events[0],
			KiroEvent::ToolUseBegin {
				tool_use_id: "t1".to_string(),
				name: "get_time".to_string(),
			}
		);
		assert!(matches!(events[1], KiroEvent::ToolUseInput { .. }));
		assert!(matches!(events[2], KiroEvent::ToolUseInput { .. }));
		assert_eq!(
			events[3],
			KiroEvent::ToolUseStop {
				tool_use_id: "t1".to_string(),
				name: "get_time".to_string(),
				input: serde_json::json!({"tz": "UTC"}),
			}
		);
	}

	#[test]
	fn inline_tool_input_and_stop_close_immediately() {
		let events = feed_all(&[r#"{"name":"ping","toolUseId":"t2","input":"{}","stop":true}"#]);
		assert_eq!(events.len(), 3);
		assert!(matches!(&events[2], KiroEvent::ToolUseStop { input, .. } if input == &serde_json::json!({})));
	}

	#[test]
	fn unterminated_tool_use_closes_at_finish() {
		let events = feed_all(&[r#"{"name":"ping","toolUseId":"t3"}{"input":"{}"}"#]);
		assert!(matches!(
			events.last(),
			Some(KiroEvent::ToolUseStop { tool_use_id, .. }) if tool_use_id == "t3"
		));
	}

	#[test]
	fn context_usage_payload_is_emitted() {
		let events = feed_all(&[r#"{"contextUsagePercentage":42.5}"#]);
		assert_eq!(events, vec![KiroEvent::ContextUsage(42.5)]);
	}

	#[test]
	fn followup_prompts_are_ignored() {
		let events = feed_all(&[r#"{"followupPrompt":{"content":"next?"}}{"content":"hi"}"#]);
		assert_eq!(events, vec![KiroEvent::Content("hi".to_string())]);
	}

	#[test]
	fn content_split_across_many_small_chunks() {
		let payload = r#"{"content":"abcdefgh"}"#;
		let chunks: Vec<String> = payload.chars().map(|c| c.to_string()).collect();
		let mut parser = EventStreamParser::new();
		let mut events = Vec::new();
		for chunk in &chunks {
			events.extend(parser.feed(chunk));
		}
		assert_eq!(events, vec![KiroEvent::Content("abcdefgh".to_string())]);
	}

	mod proptest_chunking {
		use super::*;
		use proptest::prelude::*;

		proptest! {
			/// Parsing must be invariant under transport chunking: however
			/// the byte stream is split, the same events come out.
			#[test]
			fn chunk_boundaries_do_not_change_events(
				contents in proptest::collection::vec("[a-zA-Z0-9 .!?]{1,20}", 1..5),
				split_points in proptest::collection::vec(1usize..200, 0..6),
			) {
				let payload: String = contents
					.iter()
					.map(|c| format!("{{\"content\":\"{c}\"}}"))
					.collect();

				let mut whole = EventStreamParser::new();
				let mut expected = whole.feed(&payload);
				expected.extend(whole.finish());

				let mut splits: Vec<usize> =
					split_points.iter().map(|p| p % payload.len()).collect();
				splits.sort_unstable();
				splits.dedup();

				let mut chunked = EventStreamParser::new();
				let mut actual = Vec::new();
				let mut last = 0;
				for &split in &splits {
					actual.extend(chunked.feed(&payload[last..split]));
					last = split;
				}
				actual.extend(chunked.feed(&payload[last..]));
				actual.extend(chunked.finish());

				prop_assert_eq!(expected, actual);
			}
		}
	}
}
