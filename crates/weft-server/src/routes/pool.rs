// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Pool introspection, scoped by the caller's API key.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::error::ServerError;
use crate::state::AppState;

/// `GET /v1/pool/status`
pub async fn pool_status(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<weft_pool::PoolStatus>, ServerError> {
	let scope = state.auth.authenticate(&headers).await?;
	let status = state.pool.pool_status(scope.group_id()).await?;
	Ok(Json(status))
}

/// `POST /v1/pool/refresh` — drop cached snapshots and rebuild.
pub async fn pool_refresh(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<weft_pool::PoolStatus>, ServerError> {
	let scope = state.auth.authenticate(&headers).await?;
	state.pool.invalidate_cache().await;
	let status = state.pool.pool_status(scope.group_id()).await?;
	tracing::info!(group_id = ?scope.group_id(), "pool cache refreshed by operator");
	Ok(Json(status))
}
