// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Anthropic-compatible surface: Messages API and token counting.
//!
//! Errors on this surface always use the Claude error schema, including
//! authentication failures.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use weft_claude::{
	claude_error_kind, is_supported_version, to_chat_request, to_messages_response,
	ClaudeErrorBody, ClaudeSseEncoder, CountTokensResponse, MessagesRequest,
};
use weft_core::{new_request_id, ApiError};
use weft_db::RequestLogEntry;
use weft_kiro::KiroEvent;
use weft_openai::estimate_prompt_tokens;

use crate::error::ServerError;
use crate::orchestrator::{drive_stream, ChatContext, EventEncoder};
use crate::routes::sse_response;
use crate::state::AppState;

/// Messages-path retries are bounded to a single account switch.
const CLAUDE_RETRY_BUDGET: u32 = 1;

/// Render any failure in the Claude error schema.
fn claude_error(err: ServerError) -> Response {
	match err {
		ServerError::Auth(failure) => (
			StatusCode::UNAUTHORIZED,
			Json(ClaudeErrorBody::new(
				"authentication_error",
				failure.message(),
			)),
		)
			.into_response(),
		ServerError::Api(api) => {
			let status =
				StatusCode::from_u16(api.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
			(
				status,
				Json(ClaudeErrorBody::new(
					claude_error_kind(api.code),
					api.message,
				)),
			)
				.into_response()
		}
	}
}

fn validate_version(headers: &HeaderMap) -> Result<(), ServerError> {
	let version = headers
		.get("anthropic-version")
		.and_then(|v| v.to_str().ok())
		.ok_or_else(|| {
			ServerError::Api(ApiError::validation("missing anthropic-version header"))
		})?;
	if !is_supported_version(version) {
		return Err(ServerError::Api(ApiError::validation(format!(
			"unsupported anthropic-version: {version}"
		))));
	}
	Ok(())
}

/// [`EventEncoder`] over the Anthropic SSE schema.
struct ClaudeEventEncoder {
	inner: ClaudeSseEncoder,
}

impl EventEncoder for ClaudeEventEncoder {
	fn encode(&mut self, event: &KiroEvent) -> Vec<String> {
		self.inner.encode(event)
	}

	fn finish(&mut self) -> Vec<String> {
		self.inner.finish()
	}

	fn encode_error(&mut self, error: &ApiError) -> Vec<String> {
		vec![self
			.inner
			.error_frame(claude_error_kind(error.code), &error.message)]
	}
}

/// `POST /v1/messages`
pub async fn messages(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<MessagesRequest>,
) -> Response {
	if let Err(err) = validate_version(&headers) {
		return claude_error(err);
	}
	let scope = match state.auth.authenticate(&headers).await {
		Ok(scope) => scope,
		Err(err) => return claude_error(err),
	};

	let chat = match to_chat_request(&body) {
		Ok(chat) => chat,
		Err(err) => return claude_error(ServerError::Api(err)),
	};

	let ctx = ChatContext {
		request_id: new_request_id(),
		group_id: scope.group_id().map(str::to_string),
		account_id: body.account_id.clone(),
		retry_budget: CLAUDE_RETRY_BUDGET,
		endpoint: "/v1/messages",
	};
	let prompt_tokens = estimate_prompt_tokens(&chat.messages, chat.system.as_deref());

	if body.stream {
		match state.orchestrator.open_stream(&ctx, &chat).await {
			Ok((account, receiver)) => {
				let encoder = Box::new(ClaudeEventEncoder {
					inner: ClaudeSseEncoder::new(chat.model.clone(), prompt_tokens),
				});
				let frames = drive_stream(
					state.orchestrator.clone(),
					ctx,
					chat,
					account,
					receiver,
					encoder,
					state.request_logger.clone(),
					prompt_tokens,
				);
				sse_response(frames)
			}
			Err(err) => claude_error(ServerError::Api(err)),
		}
	} else {
		let started = std::time::Instant::now();
		match state.orchestrator.call(&ctx, &chat).await {
			Ok((account, outcome)) => {
				let response = to_messages_response(&chat, &outcome);
				state.pool.increment_api_call(
					&account.id,
					i64::from(response.usage.input_tokens + response.usage.output_tokens),
				);
				state.request_logger.log(RequestLogEntry {
					request_id: ctx.request_id,
					group_id: ctx.group_id,
					account_id: Some(account.id),
					model: chat.model.clone(),
					endpoint: ctx.endpoint.to_string(),
					status: 200,
					latency_ms: started.elapsed().as_millis() as i64,
					prompt_tokens: i64::from(response.usage.input_tokens),
					completion_tokens: i64::from(response.usage.output_tokens),
					error: None,
				});
				Json(response).into_response()
			}
			Err(err) => {
				state.request_logger.log(RequestLogEntry {
					request_id: ctx.request_id,
					group_id: ctx.group_id,
					account_id: None,
					model: chat.model.clone(),
					endpoint: ctx.endpoint.to_string(),
					status: err.http_status(),
					latency_ms: started.elapsed().as_millis() as i64,
					prompt_tokens: i64::from(prompt_tokens),
					completion_tokens: 0,
					error: Some(err.message.clone()),
				});
				claude_error(ServerError::Api(err))
			}
		}
	}
}

/// `POST /v1/messages/count_tokens`
pub async fn count_tokens(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<MessagesRequest>,
) -> Response {
	if let Err(err) = validate_version(&headers) {
		return claude_error(err);
	}
	if let Err(err) = state.auth.authenticate(&headers).await {
		return claude_error(err);
	}

	match to_chat_request(&body) {
		Ok(chat) => {
			let input_tokens = estimate_prompt_tokens(&chat.messages, chat.system.as_deref());
			Json(CountTokensResponse { input_tokens }).into_response()
		}
		Err(err) => claude_error(ServerError::Api(err)),
	}
}
