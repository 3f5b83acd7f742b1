// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Version-controlled CRUD (v2 surface).
//!
//! Every mutable resource carries `version`; updates are optimistic with
//! 409 + `serverData` on conflict. PUTs auto-retry up to three times with
//! jittered backoff, re-applying the client's patch onto the winning row.
//! Account batches run through the store's savepoint machinery.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use weft_core::account::HeaderVersion;
use weft_core::{Account, ApiError, Group, SettingValue, Tag};
use weft_db::{AccountBatchOp, BatchAction, BatchOutcome, DbError, RollbackStrategy};

use crate::error::ServerError;
use crate::state::AppState;

/// Conflict retries for PUT, with 100/200/400 ms backoff ±50 ms jitter.
const PUT_RETRY_ATTEMPTS: u32 = 3;

async fn conflict_backoff(attempt: u32) {
	let base = 100u64 << attempt;
	let jitter = fastrand::i64(-50..=50);
	let delay = (base as i64 + jitter).max(0) as u64;
	tokio::time::sleep(Duration::from_millis(delay)).await;
}

/// Shallow-merge a JSON patch onto the current representation.
///
/// Nested objects (credentials, header, usage) merge key-by-key; scalars
/// and arrays replace. `id`, `version` and `updatedAt` are never patched.
fn merge_patch(current: serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
	let mut base = current;
	if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
		for (key, value) in patch_obj {
			if matches!(key.as_str(), "id" | "version" | "updatedAt") {
				continue;
			}
			match (base_obj.get_mut(key), value.as_object()) {
				(Some(serde_json::Value::Object(existing)), Some(incoming)) => {
					for (inner_key, inner_value) in incoming {
						existing.insert(inner_key.clone(), inner_value.clone());
					}
				}
				_ => {
					base_obj.insert(key.clone(), value.clone());
				}
			}
		}
	}
	base
}

fn require_version(patch: &serde_json::Value) -> Result<i64, ApiError> {
	patch
		.get("version")
		.and_then(|v| v.as_i64())
		.ok_or_else(|| ApiError::validation("version is required"))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
	#[serde(default)]
	pub version: Option<i64>,
}

// ---- accounts ----

/// Fill generated fields on a create payload and extract the explicitly
/// pinned header version (absence selects the per-IDP default).
pub(crate) fn prepare_account_payload(
	mut body: serde_json::Value,
) -> Result<(Account, Option<HeaderVersion>), ApiError> {
	let obj = body
		.as_object_mut()
		.ok_or_else(|| ApiError::validation("account payload must be an object"))?;
	if !obj.contains_key("id") {
		obj.insert(
			"id".to_string(),
			serde_json::json!(Uuid::new_v4().to_string()),
		);
	}
	let explicit = obj
		.get("header")
		.and_then(|h| h.get("headerVersion"))
		.and_then(|v| v.as_u64())
		.and_then(|v| u8::try_from(v).ok())
		.and_then(HeaderVersion::from_u8);

	let account: Account = serde_json::from_value(body)
		.map_err(|e| ApiError::validation(format!("invalid account payload: {e}")))?;
	if account.email.is_empty() {
		return Err(ApiError::validation("email is required"));
	}
	Ok((account, explicit))
}

/// `GET /api/v2/accounts`
pub async fn list_accounts(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<Account>>, ServerError> {
	state.auth.require_admin(&headers)?;
	Ok(Json(state.accounts.list_accounts(None).await?))
}

/// `GET /api/v2/accounts/:id`
pub async fn get_account(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
) -> Result<Json<Account>, ServerError> {
	state.auth.require_admin(&headers)?;
	let account = state
		.accounts
		.get_account(&id)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("account {id}")))?;
	Ok(Json(account))
}

/// `POST /api/v2/accounts`
pub async fn create_account(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<serde_json::Value>,
) -> Result<Json<Account>, ServerError> {
	state.auth.require_admin(&headers)?;
	let (account, explicit) = prepare_account_payload(body)?;
	let idp_default = state.config.header_version_for(account.idp);
	let stored = state
		.accounts
		.insert_account(account, explicit, idp_default)
		.await?;
	state.pool.invalidate_cache().await;
	Ok(Json(stored))
}

/// `PUT /api/v2/accounts/:id` — optimistic update with auto-retry.
pub async fn update_account(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Json(patch): Json<serde_json::Value>,
) -> Result<Json<Account>, ServerError> {
	state.auth.require_admin(&headers)?;

	let mut client_version = require_version(&patch)?;
	let mut current = state
		.accounts
		.get_account(&id)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("account {id}")))?;

	let mut attempt = 0u32;
	loop {
		let merged = merge_patch(
			serde_json::to_value(&current).map_err(|e| ApiError::internal(e.to_string()))?,
			&patch,
		);
		let mut candidate: Account = serde_json::from_value(merged)
			.map_err(|e| ApiError::validation(format!("invalid account patch: {e}")))?;
		candidate.id = id.clone();

		match state.accounts.update_account(candidate, client_version).await {
			Ok(updated) => {
				state.pool.invalidate_cache().await;
				return Ok(Json(updated));
			}
			Err(DbError::VersionConflict {
				current_version,
				server_data,
				..
			}) if attempt < PUT_RETRY_ATTEMPTS => {
				tracing::debug!(
					account_id = %id,
					attempt,
					current_version,
					"version conflict, re-applying patch"
				);
				conflict_backoff(attempt).await;
				attempt += 1;
				current = serde_json::from_value(server_data)
					.map_err(|e| ApiError::internal(e.to_string()))?;
				client_version = current_version;
			}
			Err(err) => return Err(err.into()),
		}
	}
}

/// `DELETE /api/v2/accounts/:id`
pub async fn delete_account(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Query(params): Query<DeleteParams>,
) -> Result<Json<serde_json::Value>, ServerError> {
	state.auth.require_admin(&headers)?;
	state.accounts.soft_delete(&id, params.version).await?;
	state.pool.invalidate_cache().await;
	Ok(Json(serde_json::json!({"success": true, "id": id})))
}

// ---- batch ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
	pub operations: Vec<BatchOperation>,
	#[serde(default)]
	pub rollback_strategy: Option<RollbackStrategy>,
	#[serde(default)]
	pub stop_on_error: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchOperation {
	pub action: BatchAction,
	pub data: serde_json::Value,
}

/// `POST /api/v2/accounts/batch`
pub async fn batch_accounts(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<BatchRequest>,
) -> Result<Json<BatchOutcome>, ServerError> {
	state.auth.require_admin(&headers)?;

	let strategy = if body.stop_on_error {
		RollbackStrategy::All
	} else {
		body.rollback_strategy.unwrap_or(RollbackStrategy::None)
	};

	let mut ops = Vec::with_capacity(body.operations.len());
	for operation in body.operations {
		let op = match operation.action {
			BatchAction::Create => {
				let (account, explicit) = prepare_account_payload(operation.data)?;
				let idp_default = state.config.header_version_for(account.idp);
				AccountBatchOp {
					action: BatchAction::Create,
					account: Some(account),
					id: None,
					client_version: None,
					explicit_header_version: explicit,
					idp_default,
				}
			}
			BatchAction::Update => {
				let version = require_version(&operation.data)?;
				let account: Account = serde_json::from_value(operation.data)
					.map_err(|e| ApiError::validation(format!("invalid update payload: {e}")))?;
				let idp_default = state.config.header_version_for(account.idp);
				AccountBatchOp {
					action: BatchAction::Update,
					account: Some(account),
					id: None,
					client_version: Some(version),
					explicit_header_version: None,
					idp_default,
				}
			}
			BatchAction::Delete => {
				let id = operation
					.data
					.get("id")
					.and_then(|v| v.as_str())
					.ok_or_else(|| ApiError::validation("delete operation requires an id"))?
					.to_string();
				let version = operation.data.get("version").and_then(|v| v.as_i64());
				AccountBatchOp {
					action: BatchAction::Delete,
					account: None,
					id: Some(id),
					client_version: version,
					explicit_header_version: None,
					idp_default: state.config.default_header_version,
				}
			}
		};
		ops.push(op);
	}

	let outcome = state.accounts.batch_accounts(ops, strategy).await?;
	state.pool.invalidate_cache().await;
	Ok(Json(outcome))
}

// ---- groups ----

/// `GET /api/v2/groups`
pub async fn list_groups(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<Group>>, ServerError> {
	state.auth.require_admin(&headers)?;
	Ok(Json(state.groups.list_groups().await?))
}

/// `POST /api/v2/groups`
pub async fn create_group(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(mut body): Json<serde_json::Value>,
) -> Result<Json<Group>, ServerError> {
	state.auth.require_admin(&headers)?;
	if let Some(obj) = body.as_object_mut() {
		if !obj.contains_key("id") {
			obj.insert(
				"id".to_string(),
				serde_json::json!(Uuid::new_v4().to_string()),
			);
		}
		obj.entry("version").or_insert(serde_json::json!(1));
		obj.entry("updatedAt").or_insert(serde_json::json!(0));
	}
	let group: Group = serde_json::from_value(body)
		.map_err(|e| ApiError::validation(format!("invalid group payload: {e}")))?;
	Ok(Json(state.groups.create_group(group).await?))
}

/// `PUT /api/v2/groups/:id`
pub async fn update_group(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Json(patch): Json<serde_json::Value>,
) -> Result<Json<Group>, ServerError> {
	state.auth.require_admin(&headers)?;

	let mut client_version = require_version(&patch)?;
	let mut current = state
		.groups
		.get_group(&id)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("group {id}")))?;

	let mut attempt = 0u32;
	loop {
		let merged = merge_patch(
			serde_json::to_value(&current).map_err(|e| ApiError::internal(e.to_string()))?,
			&patch,
		);
		let mut candidate: Group = serde_json::from_value(merged)
			.map_err(|e| ApiError::validation(format!("invalid group patch: {e}")))?;
		candidate.id = id.clone();

		match state.groups.update_group(candidate, client_version).await {
			Ok(updated) => return Ok(Json(updated)),
			Err(DbError::VersionConflict {
				current_version,
				server_data,
				..
			}) if attempt < PUT_RETRY_ATTEMPTS => {
				conflict_backoff(attempt).await;
				attempt += 1;
				current = serde_json::from_value(server_data)
					.map_err(|e| ApiError::internal(e.to_string()))?;
				client_version = current_version;
			}
			Err(err) => return Err(err.into()),
		}
	}
}

/// `DELETE /api/v2/groups/:id`
pub async fn delete_group(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Query(params): Query<DeleteParams>,
) -> Result<Json<serde_json::Value>, ServerError> {
	state.auth.require_admin(&headers)?;
	state.groups.delete_group(&id, params.version).await?;
	state.pool.invalidate_cache().await;
	Ok(Json(serde_json::json!({"success": true, "id": id})))
}

// ---- tags ----

/// `GET /api/v2/tags`
pub async fn list_tags(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<Tag>>, ServerError> {
	state.auth.require_admin(&headers)?;
	Ok(Json(state.tags.list_tags().await?))
}

/// `POST /api/v2/tags`
pub async fn create_tag(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(mut body): Json<serde_json::Value>,
) -> Result<Json<Tag>, ServerError> {
	state.auth.require_admin(&headers)?;
	if let Some(obj) = body.as_object_mut() {
		if !obj.contains_key("id") {
			obj.insert(
				"id".to_string(),
				serde_json::json!(Uuid::new_v4().to_string()),
			);
		}
		obj.entry("version").or_insert(serde_json::json!(1));
		obj.entry("updatedAt").or_insert(serde_json::json!(0));
	}
	let tag: Tag = serde_json::from_value(body)
		.map_err(|e| ApiError::validation(format!("invalid tag payload: {e}")))?;
	Ok(Json(state.tags.create_tag(tag).await?))
}

/// `PUT /api/v2/tags/:id`
pub async fn update_tag(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Json(patch): Json<serde_json::Value>,
) -> Result<Json<Tag>, ServerError> {
	state.auth.require_admin(&headers)?;

	let mut client_version = require_version(&patch)?;
	let mut current = state
		.tags
		.get_tag(&id)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("tag {id}")))?;

	let mut attempt = 0u32;
	loop {
		let merged = merge_patch(
			serde_json::to_value(&current).map_err(|e| ApiError::internal(e.to_string()))?,
			&patch,
		);
		let mut candidate: Tag = serde_json::from_value(merged)
			.map_err(|e| ApiError::validation(format!("invalid tag patch: {e}")))?;
		candidate.id = id.clone();

		match state.tags.update_tag(candidate, client_version).await {
			Ok(updated) => return Ok(Json(updated)),
			Err(DbError::VersionConflict {
				current_version,
				server_data,
				..
			}) if attempt < PUT_RETRY_ATTEMPTS => {
				conflict_backoff(attempt).await;
				attempt += 1;
				current = serde_json::from_value(server_data)
					.map_err(|e| ApiError::internal(e.to_string()))?;
				client_version = current_version;
			}
			Err(err) => return Err(err.into()),
		}
	}
}

/// `DELETE /api/v2/tags/:id`
pub async fn delete_tag(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Query(params): Query<DeleteParams>,
) -> Result<Json<serde_json::Value>, ServerError> {
	state.auth.require_admin(&headers)?;
	state.tags.delete_tag(&id, params.version).await?;
	Ok(Json(serde_json::json!({"success": true, "id": id})))
}

// ---- machine ids ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineIdPayload {
	pub machine_id: String,
}

/// `GET /api/v2/accounts/:id/machine-id`
pub async fn get_machine_id(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
) -> Result<Json<weft_core::MachineIdBinding>, ServerError> {
	state.auth.require_admin(&headers)?;
	let binding = state
		.machine_ids
		.get_binding(&id)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("machine id binding for account {id}")))?;
	Ok(Json(binding))
}

/// `PUT /api/v2/accounts/:id/machine-id`
pub async fn bind_machine_id(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
	Json(body): Json<MachineIdPayload>,
) -> Result<Json<weft_core::MachineIdBinding>, ServerError> {
	state.auth.require_admin(&headers)?;
	if body.machine_id.is_empty() {
		return Err(ServerError::Api(ApiError::validation("machineId is required")));
	}
	state
		.accounts
		.get_account(&id)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("account {id}")))?;
	let binding = state.machine_ids.bind(&id, &body.machine_id).await?;
	Ok(Json(binding))
}

/// `GET /api/v2/accounts/:id/machine-id/history`
pub async fn machine_id_history(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
) -> Result<Json<Vec<weft_core::MachineIdHistoryEntry>>, ServerError> {
	state.auth.require_admin(&headers)?;
	Ok(Json(state.machine_ids.history(&id).await?))
}

// ---- settings ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingPayload {
	pub value: SettingValue,
	#[serde(default)]
	pub version: Option<i64>,
}

/// `GET /api/v2/settings`
pub async fn list_settings(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<weft_core::Setting>>, ServerError> {
	state.auth.require_admin(&headers)?;
	Ok(Json(state.settings.list_settings().await?))
}

/// `PUT /api/v2/settings/:key`
pub async fn put_setting(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(key): Path<String>,
	Json(body): Json<SettingPayload>,
) -> Result<Json<weft_core::Setting>, ServerError> {
	state.auth.require_admin(&headers)?;
	let stored = state
		.settings
		.put_setting(&key, body.value, body.version)
		.await?;
	Ok(Json(stored))
}

/// `DELETE /api/v2/settings/:key`
pub async fn delete_setting(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(key): Path<String>,
	Query(params): Query<DeleteParams>,
) -> Result<Json<serde_json::Value>, ServerError> {
	state.auth.require_admin(&headers)?;
	state.settings.delete_setting(&key, params.version).await?;
	Ok(Json(serde_json::json!({"success": true, "key": key})))
}
