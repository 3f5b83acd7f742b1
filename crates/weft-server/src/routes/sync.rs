// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Sync surfaces: incremental pull and the legacy bulk upload.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use weft_core::{now_ms, Account, ApiError};

use crate::error::ServerError;
use crate::state::AppState;
use crate::sync_guard::{validate_sync_delete, SyncDeleteCheck};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesParams {
	#[serde(default)]
	pub modified_since: Option<i64>,
}

/// `GET /api/v2/sync/changes?modifiedSince=…`
///
/// Groups rows touched after the watermark into created/updated/deleted by
/// comparing their lifecycle timestamps against it.
pub async fn sync_changes(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(params): Query<ChangesParams>,
) -> Result<Json<serde_json::Value>, ServerError> {
	state.auth.require_admin(&headers)?;

	let since = params.modified_since.unwrap_or(0);
	let modified = state.accounts.list_modified_since(since).await?;

	let mut created: Vec<Account> = Vec::new();
	let mut updated: Vec<Account> = Vec::new();
	let mut deleted: Vec<String> = Vec::new();

	for account in modified {
		if account.is_del {
			if account.deleted_at.unwrap_or(account.updated_at) > since {
				deleted.push(account.id);
			}
		} else if account.created_at > since {
			created.push(account);
		} else {
			updated.push(account);
		}
	}

	Ok(Json(serde_json::json!({
		"accounts": {
			"created": created,
			"updated": updated,
			"deleted": deleted,
		},
		"timestamp": now_ms(),
	})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySyncRequest {
	#[serde(default)]
	pub accounts: Vec<serde_json::Value>,
	#[serde(default)]
	pub sync_delete: bool,
	#[serde(default)]
	pub confirm_sync_delete: bool,
	#[serde(default)]
	pub force_sync: bool,
}

fn client_ip(headers: &HeaderMap) -> String {
	headers
		.get("x-forwarded-for")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.split(',').next())
		.map(|v| v.trim().to_string())
		.unwrap_or_else(|| "local".to_string())
}

/// `POST /api/data` — legacy bulk sync with guarded hard deletion.
pub async fn legacy_sync(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<LegacySyncRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
	state.auth.require_admin(&headers)?;

	// Upsert every payload account first; deletion only ever applies to
	// rows the payload did not name.
	let mut synced = 0usize;
	let mut failed = 0usize;
	let mut payload_ids: Vec<String> = Vec::with_capacity(body.accounts.len());

	for value in &body.accounts {
		match crate::routes::v2::prepare_account_payload(value.clone()) {
			Ok((account, explicit)) => {
				let idp_default = state.config.header_version_for(account.idp);
				match state
					.accounts
					.insert_account(account, explicit, idp_default)
					.await
				{
					Ok(stored) => {
						payload_ids.push(stored.id);
						synced += 1;
					}
					Err(e) => {
						tracing::warn!(error = %e, "bulk sync upsert failed");
						failed += 1;
					}
				}
			}
			Err(e) => {
				tracing::warn!(error = %e, "bulk sync payload rejected");
				failed += 1;
			}
		}
	}

	let mut deleted = 0u64;
	if body.sync_delete {
		let header_confirmed = headers
			.get("x-confirm-sync-delete")
			.and_then(|v| v.to_str().ok())
			.map(|v| v.eq_ignore_ascii_case("true"))
			.unwrap_or(false);

		let server_count = state.accounts.count_non_deleted().await?;
		let delete_count = server_count - payload_ids.len() as i64;

		let check = SyncDeleteCheck {
			payload_count: body.accounts.len(),
			header_confirmed,
			body_confirmed: body.confirm_sync_delete,
			force_sync: body.force_sync,
			server_count,
			delete_count: delete_count.max(0),
			rate_allowed: state.sync_limiter.allow(&client_ip(&headers)),
		};
		validate_sync_delete(&check).map_err(ServerError::Api)?;

		if payload_ids.is_empty() {
			return Err(ServerError::Api(ApiError::validation(
				"no accounts survived the sync upload; refusing to delete",
			)));
		}
		deleted = state.accounts.hard_delete_not_in(&payload_ids).await?;
		state.pool.invalidate_cache().await;
		tracing::warn!(deleted, synced, "sync-delete pruned accounts");
	}

	state.pool.invalidate_cache().await;
	Ok(Json(serde_json::json!({
		"synced": synced,
		"failed": failed,
		"deleted": deleted,
		"timestamp": now_ms(),
	})))
}
