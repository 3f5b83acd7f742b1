// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Route table and shared response helpers.

use std::convert::Infallible;

use axum::body::Body;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod claude;
pub mod health;
pub mod openai;
pub mod pool;
pub mod session;
pub mod sync;
pub mod v2;

/// Wrap a frame channel into a streaming SSE response.
pub fn sse_response(frames: tokio::sync::mpsc::Receiver<String>) -> Response {
	let stream = ReceiverStream::new(frames).map(|frame| Ok::<_, Infallible>(frame));
	Response::builder()
		.header(axum::http::header::CONTENT_TYPE, "text/event-stream")
		.header(axum::http::header::CACHE_CONTROL, "no-cache")
		.header(axum::http::header::CONNECTION, "keep-alive")
		.body(Body::from_stream(stream))
		.unwrap_or_default()
}

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
	Router::new()
		// OpenAI-compatible surface
		.route("/v1/chat/completions", post(openai::chat_completions))
		.route("/v1/models", get(openai::list_models))
		.route("/v1/models/{model}", get(openai::get_model))
		// Anthropic-compatible surface
		.route("/v1/messages", post(claude::messages))
		.route("/v1/messages/count_tokens", post(claude::count_tokens))
		// Pool introspection
		.route("/v1/pool/status", get(pool::pool_status))
		.route("/v1/pool/refresh", post(pool::pool_refresh))
		// Session auth
		.route("/api/auth/login", post(session::login))
		.route("/api/auth/logout", post(session::logout))
		.route("/api/auth/check", get(session::check))
		// Health
		.route("/api/health", get(health::health))
		.route("/api/health/detailed", get(health::health_detailed))
		// v2 CRUD
		.route("/api/v2/accounts", get(v2::list_accounts).post(v2::create_account))
		.route("/api/v2/accounts/batch", post(v2::batch_accounts))
		.route(
			"/api/v2/accounts/{id}",
			get(v2::get_account)
				.put(v2::update_account)
				.delete(v2::delete_account),
		)
		.route(
			"/api/v2/accounts/{id}/machine-id",
			get(v2::get_machine_id).put(v2::bind_machine_id),
		)
		.route(
			"/api/v2/accounts/{id}/machine-id/history",
			get(v2::machine_id_history),
		)
		.route("/api/v2/groups", get(v2::list_groups).post(v2::create_group))
		.route(
			"/api/v2/groups/{id}",
			put(v2::update_group).delete(v2::delete_group),
		)
		.route("/api/v2/tags", get(v2::list_tags).post(v2::create_tag))
		.route(
			"/api/v2/tags/{id}",
			put(v2::update_tag).delete(v2::delete_tag),
		)
		.route("/api/v2/settings", get(v2::list_settings))
		.route(
			"/api/v2/settings/{key}",
			put(v2::put_setting).delete(v2::delete_setting),
		)
		// Sync
		.route("/api/v2/sync/changes", get(sync::sync_changes))
		.route("/api/data", post(sync::legacy_sync))
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}
