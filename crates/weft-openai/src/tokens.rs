// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Token estimation.
//!
//! The contract is the original approximation: `ceil(len / 4)` over text
//! and a flat 1600 tokens per image, regardless of how the image bytes are
//! delivered. Good enough for metering and the count endpoints.

use weft_core::{ChatMessage, ContentBlock};

/// Flat cost assigned to one image block.
pub const IMAGE_TOKEN_COST: u32 = 1_600;

/// Approximate tokens in a piece of text.
pub fn estimate_text_tokens(text: &str) -> u32 {
	(text.chars().count() as u32).div_ceil(4)
}

/// Approximate tokens in one message.
pub fn estimate_message_tokens(message: &ChatMessage) -> u32 {
	message
		.content
		.iter()
		.map(|block| match block {
			ContentBlock::Text { text } | ContentBlock::Thinking { text } => {
				estimate_text_tokens(text)
			}
			ContentBlock::Image { .. } => IMAGE_TOKEN_COST,
			ContentBlock::ToolUse { input, .. } => estimate_text_tokens(&input.to_string()),
			ContentBlock::ToolResult { content, .. } => estimate_text_tokens(content),
		})
		.sum()
}

/// Approximate prompt tokens for a message list.
pub fn estimate_prompt_tokens(messages: &[ChatMessage], system: Option<&str>) -> u32 {
	let system_tokens = system.map(estimate_text_tokens).unwrap_or(0);
	system_tokens + messages.iter().map(estimate_message_tokens).sum::<u32>()
}
