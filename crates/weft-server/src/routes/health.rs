// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Health endpoints for operators and orchestration probes.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::ServerError;
use crate::state::AppState;

/// `GET /api/health`
pub async fn health(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
	state.auth.require_admin(&headers)?;

	let pool_health = state.pool.pool_health().await;
	let refresher = state.refresher.next_check_info().await;

	let status = if pool_health.healthy {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	};
	let body = serde_json::json!({
		"status": if pool_health.healthy { "ok" } else { "degraded" },
		"version": state.config.app_version,
		"serverId": state.config.server_id,
		"pool": pool_health,
		"tokenRefresher": refresher,
	});
	Ok((status, Json(body)))
}

/// `GET /api/health/detailed`
pub async fn health_detailed(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
	state.auth.require_admin(&headers)?;

	let pool_health = state.pool.pool_health().await;
	let pool_status = state.pool.pool_status(None).await?;
	let refresher = state.refresher.next_check_info().await;
	let db = state.accounts.healthcheck().await;

	let status = if pool_health.healthy && db.healthy {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	};
	let body = serde_json::json!({
		"status": if pool_health.healthy && db.healthy { "ok" } else { "degraded" },
		"version": state.config.app_version,
		"serverId": state.config.server_id,
		"workerIndex": state.config.worker_index,
		"database": db,
		"pool": pool_health,
		"poolStatus": pool_status,
		"tokenRefresher": refresher,
	});
	Ok((status, Json(body)))
}
