// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OpenAI chat-completions protocol adapter.
//!
//! Normalizes inbound OpenAI-shaped requests, frames vendor events as
//! OpenAI SSE chunks, and estimates token usage with the documented
//! approximation.

pub mod tokens;
pub mod translate;
pub mod types;

pub use tokens::{estimate_prompt_tokens, estimate_text_tokens, IMAGE_TOKEN_COST};
pub use translate::{
	thinking_budget_for_effort, to_chat_completion, to_chat_request, SseEncoder,
};
pub use types::{ChatCompletion, ChatCompletionRequest, ModelInfo};
