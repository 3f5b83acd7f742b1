// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! OpenAI-compatible surface: chat completions and the model catalog.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;

use weft_core::{new_request_id, ApiError};
use weft_db::RequestLogEntry;
use weft_kiro::{KiroEvent, SUPPORTED_MODELS};
use weft_openai::types::ModelInfo;
use weft_openai::{
	estimate_prompt_tokens, to_chat_completion, to_chat_request, ChatCompletionRequest, SseEncoder,
};

use crate::error::{error_body, ServerError};
use crate::orchestrator::{drive_stream, ChatContext, EventEncoder};
use crate::routes::sse_response;
use crate::state::AppState;

/// [`EventEncoder`] over the OpenAI chunk framing.
struct OpenAiEventEncoder {
	inner: SseEncoder,
}

impl EventEncoder for OpenAiEventEncoder {
	fn encode(&mut self, event: &KiroEvent) -> Vec<String> {
		self.inner.encode(event)
	}

	fn finish(&mut self) -> Vec<String> {
		self.inner.finish()
	}

	fn encode_error(&mut self, error: &ApiError) -> Vec<String> {
		vec![
			format!("data: {}\n\n", error_body(error)),
			"data: [DONE]\n\n".to_string(),
		]
	}
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<ChatCompletionRequest>,
) -> Response {
	let scope = match state.auth.authenticate(&headers).await {
		Ok(scope) => scope,
		Err(err) => return err.into_response(),
	};

	let chat = match to_chat_request(&body) {
		Ok(chat) => chat,
		Err(err) => return ServerError::Api(err).into_response(),
	};

	let ctx = ChatContext {
		request_id: new_request_id(),
		group_id: scope.group_id().map(str::to_string),
		account_id: body.account_id.clone(),
		retry_budget: state.config.max_account_retries,
		endpoint: "/v1/chat/completions",
	};
	let prompt_tokens = estimate_prompt_tokens(&chat.messages, chat.system.as_deref());

	if body.stream {
		match state.orchestrator.open_stream(&ctx, &chat).await {
			Ok((account, receiver)) => {
				let encoder = Box::new(OpenAiEventEncoder {
					inner: SseEncoder::new(chat.model.clone()),
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
			Err(err) => ServerError::Api(err).into_response(),
		}
	} else {
		let started = std::time::Instant::now();
		match state.orchestrator.call(&ctx, &chat).await {
			Ok((account, outcome)) => {
				let completion = to_chat_completion(&chat, &outcome);
				state.pool.increment_api_call(
					&account.id,
					i64::from(completion.usage.total_tokens),
				);
				state.request_logger.log(RequestLogEntry {
					request_id: ctx.request_id,
					group_id: ctx.group_id,
					account_id: Some(account.id),
					model: chat.model.clone(),
					endpoint: ctx.endpoint.to_string(),
					status: 200,
					latency_ms: started.elapsed().as_millis() as i64,
					prompt_tokens: i64::from(completion.usage.prompt_tokens),
					completion_tokens: i64::from(completion.usage.completion_tokens),
					error: None,
				});
				Json(completion).into_response()
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
				ServerError::Api(err).into_response()
			}
		}
	}
}

fn model_info(id: &str) -> ModelInfo {
	ModelInfo {
		id: id.to_string(),
		object: "model",
		created: 1_727_568_000, // catalog epoch, not a real creation time
		owned_by: "weft",
	}
}

/// `GET /v1/models`
pub async fn list_models(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
	state.auth.authenticate(&headers).await?;
	let data: Vec<ModelInfo> = SUPPORTED_MODELS.iter().map(|m| model_info(m)).collect();
	Ok(Json(serde_json::json!({"object": "list", "data": data})))
}

/// `GET /v1/models/:model`
pub async fn get_model(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(model): Path<String>,
) -> Result<Json<ModelInfo>, ServerError> {
	state.auth.authenticate(&headers).await?;
	if !weft_kiro::is_supported(&model) {
		return Err(ServerError::Api(ApiError::not_found(format!(
			"model {model}"
		))));
	}
	Ok(Json(model_info(&model)))
}
