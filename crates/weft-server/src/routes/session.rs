// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Password login for the web client (JWT cookie session).

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
	pub password: String,
}

/// `POST /api/auth/login`
pub async fn login(
	State(state): State<AppState>,
	Json(body): Json<LoginRequest>,
) -> Response {
	match state.auth.login(&body.password) {
		Ok(token) => {
			let cookie = state.auth.session_cookie(&token);
			tracing::info!("web login succeeded");
			(
				StatusCode::OK,
				[(header::SET_COOKIE, cookie)],
				Json(serde_json::json!({"success": true})),
			)
				.into_response()
		}
		Err(_) => {
			tracing::warn!("web login rejected");
			(
				StatusCode::UNAUTHORIZED,
				Json(serde_json::json!({
					"error": {
						"message": "Invalid password",
						"type": "authentication_error",
						"code": "invalid_api_key",
					}
				})),
			)
				.into_response()
		}
	}
}

/// `POST /api/auth/logout`
pub async fn logout(State(state): State<AppState>) -> Response {
	(
		StatusCode::OK,
		[(header::SET_COOKIE, state.auth.clear_cookie())],
		Json(serde_json::json!({"success": true})),
	)
		.into_response()
}

/// `GET /api/auth/check`
pub async fn check(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
	let authenticated = state.auth.require_admin(&headers).is_ok();
	Json(serde_json::json!({"authenticated": authenticated}))
}
