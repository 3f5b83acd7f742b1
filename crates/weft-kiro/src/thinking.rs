// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thinking-block extraction.
//!
//! In thinking mode the model wraps its reasoning in literal
//! `<thinking>…</thinking>` tags inside ordinary content. The streaming
//! splitter lifts those spans into structured events, holding back any
//! text that could still turn out to be a partial tag at a chunk boundary.

use weft_core::ContentBlock;

use crate::events::KiroEvent;

const OPEN_TAG: &str = "<thinking>";
const CLOSE_TAG: &str = "</thinking>";

/// Streaming splitter over content events.
#[derive(Debug, Default)]
pub struct ThinkingSplitter {
	in_thinking: bool,
	carry: String,
}

impl ThinkingSplitter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Split one content delta into content/thinking events.
	pub fn split(&mut self, content: &str) -> Vec<KiroEvent> {
		let mut text = std::mem::take(&mut self.carry);
		text.push_str(content);

		let mut events = Vec::new();

		loop {
			let tag = if self.in_thinking { CLOSE_TAG } else { OPEN_TAG };

			match text.find(tag) {
				Some(pos) => {
					let before = &text[..pos];
					if !before.is_empty() {
						events.push(self.wrap(before));
					}
					if self.in_thinking {
						events.push(KiroEvent::ThinkingEnd);
						self.in_thinking = false;
					} else {
						events.push(KiroEvent::ThinkingStart);
						self.in_thinking = true;
					}
					text = text[pos + tag.len()..].to_string();
				}
				None => {
					// Hold back a suffix that may be the start of a tag cut
					// by the chunk boundary.
					let hold = partial_tag_suffix(&text, tag);
					let emit = &text[..text.len() - hold];
					if !emit.is_empty() {
						events.push(self.wrap(emit));
					}
					self.carry = text[text.len() - hold..].to_string();
					break;
				}
			}
		}

		events
	}

	/// Emit whatever is still held back (end of stream).
	pub fn finish(&mut self) -> Vec<KiroEvent> {
		let mut events = Vec::new();
		let carry = std::mem::take(&mut self.carry);
		if !carry.is_empty() {
			events.push(self.wrap(&carry));
		}
		if self.in_thinking {
			events.push(KiroEvent::ThinkingEnd);
			self.in_thinking = false;
		}
		events
	}

	fn wrap(&self, text: &str) -> KiroEvent {
		if self.in_thinking {
			KiroEvent::Thinking(text.to_string())
		} else {
			KiroEvent::Content(text.to_string())
		}
	}
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_suffix(text: &str, tag: &str) -> usize {
	let max = tag.len().saturating_sub(1).min(text.len());
	for len in (1..=max).rev() {
		if tag.starts_with(&text[text.len() - len..]) {
			return len;
		}
	}
	0
}

/// Batch extraction: ordered typed blocks from a full response body.
pub fn extract_thinking_from_content(content: &str) -> Vec<ContentBlock> {
	let mut blocks = Vec::new();
	let mut rest = content;
	let mut in_thinking = false;

	loop {
		let tag = if in_thinking { CLOSE_TAG } else { OPEN_TAG };
		match rest.find(tag) {
			Some(pos) => {
				let before = &rest[..pos];
				if !before.is_empty() {
					blocks.push(if in_thinking {
						ContentBlock::Thinking {
							text: before.to_string(),
						}
					} else {
						ContentBlock::Text {
							text: before.to_string(),
						}
					});
				}
				in_thinking = !in_thinking;
				rest = &rest[pos + tag.len()..];
			}
			None => {
				if !rest.is_empty() {
					blocks.push(if in_thinking {
						ContentBlock::Thinking {
							text: rest.to_string(),
						}
					} else {
						ContentBlock::Text {
							text: rest.to_string(),
						}
					});
				}
				break;
			}
		}
	}

	blocks
}

#[cfg(test)]
mod tests {
	use super::*;

	fn split_all(chunks: &[&str]) -> Vec<KiroEvent> {
		let mut splitter = ThinkingSplitter::new();
		let mut events = Vec::new();
		for chunk in chunks {
			events.extend(splitter.split(chunk));
		}
		events.extend(splitter.finish());
		events
	}

	#[test]
	fn splits_single_chunk_with_thinking_span() {
		let events = split_all(&["hello <thinking>why</thinking> world"]);
		assert_eq!(
			events,
			vec![
				KiroEvent::Content("hello ".to_string()),
				KiroEvent::ThinkingStart,
				KiroEvent::Thinking("why".to_string()),
				KiroEvent::ThinkingEnd,
				KiroEvent::Content(" world".to_string()),
			]
		);
	}

	#[test]
	fn handles_tags_split_across_chunks() {
		let events = split_all(&["hello <thin", "king>why</thi", "nking> world"]);
		assert_eq!(
			events,
			vec![
				KiroEvent::Content("hello ".to_string()),
				KiroEvent::ThinkingStart,
				KiroEvent::Thinking("why".to_string()),
				KiroEvent::ThinkingEnd,
				KiroEvent::Content(" world".to_string()),
			]
		);
	}

	#[test]
	fn plain_content_passes_through() {
		let events = split_all(&["just text, ", "no tags"]);
		assert_eq!(
			events,
			vec![
				KiroEvent::Content("just text, ".to_string()),
				KiroEvent::Content("no tags".to_string()),
			]
		);
	}

	#[test]
	fn unclosed_thinking_ends_at_stream_end() {
		let events = split_all(&["<thinking>still going"]);
		assert_eq!(
			events,
			vec![
				KiroEvent::ThinkingStart,
				KiroEvent::Thinking("still going".to_string()),
				KiroEvent::ThinkingEnd,
			]
		);
	}

	#[test]
	fn angle_bracket_text_is_not_swallowed() {
		let events = split_all(&["a < b and a <b> c"]);
		let text: String = events
			.iter()
			.filter_map(|e| match e {
				KiroEvent::Content(c) => Some(c.as_str()),
				_ => None,
			})
			.collect();
		assert_eq!(text, "a < b and a <b> c");
	}

	#[test]
	fn batch_extraction_orders_blocks() {
		let blocks = extract_thinking_from_content("a<thinking>b</thinking>c<thinking>d</thinking>");
		assert_eq!(
			blocks,
			vec![
				ContentBlock::Text { text: "a".into() },
				ContentBlock::Thinking { text: "b".into() },
				ContentBlock::Text { text: "c".into() },
				ContentBlock::Thinking { text: "d".into() },
			]
		);
	}

	#[test]
	fn batch_extraction_without_tags_is_single_text_block() {
		let blocks = extract_thinking_from_content("plain");
		assert_eq!(blocks, vec![ContentBlock::Text { text: "plain".into() }]);
	}
}
