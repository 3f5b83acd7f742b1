// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Account row ⇄ domain conversion and merge policies.
//!
//! The persisted shape predates this service and carries legacy quirks:
//! timestamp columns may hold epoch milliseconds or ISO-8601 strings, and
//! header-generation fields may be absent on rows imported from older
//! exports. Everything row-shaped and every merge rule lives here as pure
//! functions so the policies are testable without a database.

use weft_core::account::{
	generate_device_hash, generate_invocation_id, Account, AccountStatus, AuthMethod, Credentials,
	HeaderParams, HeaderVersion, Idp, Usage,
};

/// Flat `accounts` row as selected from MySQL.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
	pub id: String,
	pub email: String,
	pub user_id: Option<String>,
	pub nickname: Option<String>,
	pub idp: String,
	pub status: String,
	pub group_id: Option<String>,
	pub tags: Option<String>,
	pub cred_access_token: Option<String>,
	pub cred_refresh_token: Option<String>,
	pub cred_client_id: Option<String>,
	pub cred_client_id_hash: Option<String>,
	pub cred_client_secret: Option<String>,
	pub cred_region: Option<String>,
	pub cred_expires_at: Option<String>,
	pub cred_auth_method: Option<String>,
	pub cred_provider: Option<String>,
	pub header_version: Option<i64>,
	pub amz_invocation_id: Option<String>,
	pub kiro_device_hash: Option<String>,
	pub sdk_js_version: Option<String>,
	pub ide_version: Option<String>,
	pub usage_current: Option<f64>,
	pub usage_limit: Option<f64>,
	pub usage_percent_used: Option<f64>,
	pub subscription: Option<String>,
	pub resource_detail: Option<String>,
	pub api_call_count: Option<i64>,
	pub api_total_tokens: Option<i64>,
	pub api_last_call_at: Option<i64>,
	pub last_error: Option<String>,
	pub created_at: Option<i64>,
	pub version: i64,
	pub updated_at: i64,
	pub is_del: bool,
	pub deleted_at: Option<i64>,
}

/// Column list matching [`AccountRow`], for SELECTs.
pub const ACCOUNT_COLUMNS: &str = "id, email, user_id, nickname, idp, status, group_id, tags, \
	cred_access_token, cred_refresh_token, cred_client_id, cred_client_id_hash, \
	cred_client_secret, cred_region, cred_expires_at, cred_auth_method, cred_provider, \
	header_version, amz_invocation_id, kiro_device_hash, sdk_js_version, ide_version, \
	usage_current, usage_limit, usage_percent_used, subscription, resource_detail, \
	api_call_count, api_total_tokens, api_last_call_at, last_error, created_at, \
	version, updated_at, is_del, deleted_at";

/// Parse a persisted timestamp that may be epoch milliseconds (possibly
/// fractional) or an ISO-8601 string, normalizing to milliseconds.
pub fn parse_epoch_ms(raw: &str) -> Option<i64> {
	let trimmed = raw.trim();
	if trimmed.is_empty() {
		return None;
	}
	if let Ok(ms) = trimmed.parse::<i64>() {
		return Some(ms);
	}
	if let Ok(ms) = trimmed.parse::<f64>() {
		if ms.is_finite() {
			return Some(ms as i64);
		}
	}
	chrono::DateTime::parse_from_rfc3339(trimmed)
		.ok()
		.map(|dt| dt.timestamp_millis())
}

/// Convert a row into the domain account.
///
/// Lenient by design: missing credential material becomes empty strings and
/// out-of-range numbers pass through untouched — the pool's validation
/// layer decides what to drop or repair and keeps the counters. Only a row
/// whose `idp` is unknown is unrepresentable and yields `None`.
pub fn account_from_row(row: AccountRow) -> Option<Account> {
	let Some(idp) = Idp::parse(&row.idp) else {
		tracing::warn!(account_id = %row.id, idp = %row.idp, "unknown idp on account row, skipping");
		return None;
	};
	// Unknown statuses read as `error`: the row stays visible to operators
	// but is never selected for traffic.
	let status = AccountStatus::parse(&row.status).unwrap_or(AccountStatus::Error);

	let tags: Vec<String> = row
		.tags
		.as_deref()
		.and_then(|raw| serde_json::from_str(raw).ok())
		.unwrap_or_default();

	let expires_at = row
		.cred_expires_at
		.as_deref()
		.and_then(parse_epoch_ms)
		.unwrap_or(0);

	let auth_method = row
		.cred_auth_method
		.as_deref()
		.and_then(AuthMethod::parse)
		.unwrap_or(AuthMethod::Social);

	let header_version = row
		.header_version
		.and_then(|v| u8::try_from(v).ok())
		.and_then(HeaderVersion::from_u8)
		.unwrap_or(HeaderVersion::V1);
	let (default_sdk, default_ide) = HeaderParams::default_versions(header_version);

	let usage_current = row.usage_current.unwrap_or(0.0);
	let usage_limit = row.usage_limit.unwrap_or(0.0);

	Some(Account {
		id: row.id,
		email: row.email,
		user_id: row.user_id,
		nickname: row.nickname,
		idp,
		status,
		group_id: row.group_id,
		tags,
		credentials: Credentials {
			access_token: row.cred_access_token.unwrap_or_default(),
			refresh_token: row.cred_refresh_token.unwrap_or_default(),
			client_id: row.cred_client_id,
			client_id_hash: row.cred_client_id_hash,
			client_secret: row.cred_client_secret,
			region: row.cred_region.unwrap_or_default(),
			expires_at,
			auth_method,
			provider: row.cred_provider,
		},
		header: HeaderParams {
			header_version,
			amz_invocation_id: row.amz_invocation_id.unwrap_or_default(),
			kiro_device_hash: row.kiro_device_hash.unwrap_or_default(),
			sdk_js_version: row.sdk_js_version.unwrap_or_else(|| default_sdk.to_string()),
			ide_version: row.ide_version.unwrap_or_else(|| default_ide.to_string()),
		},
		usage: Usage {
			current: usage_current,
			limit: usage_limit,
			percent_used: row.usage_percent_used.unwrap_or(0.0),
		},
		subscription: row
			.subscription
			.as_deref()
			.and_then(|raw| serde_json::from_str(raw).ok()),
		resource_detail: row
			.resource_detail
			.as_deref()
			.and_then(|raw| serde_json::from_str(raw).ok()),
		api_call_count: row.api_call_count.unwrap_or(0),
		api_total_tokens: row.api_total_tokens.unwrap_or(0),
		api_last_call_at: row.api_last_call_at,
		last_error: row.last_error,
		created_at: row.created_at.unwrap_or(0),
		version: row.version,
		updated_at: row.updated_at,
		is_del: row.is_del,
		deleted_at: row.deleted_at,
	})
}

/// Fill the generated fields on an account about to be created.
///
/// The header version falls back to the per-IDP default when the caller did
/// not set one explicitly (signalled via `explicit_header_version`), and
/// missing invocation id / device hash / pinned versions are generated.
pub fn prepare_new_account(
	mut account: Account,
	explicit_header_version: Option<HeaderVersion>,
	idp_default: HeaderVersion,
	now_ms: i64,
) -> Account {
	let version = explicit_header_version.unwrap_or(idp_default);
	account.header.header_version = version;

	if account.header.amz_invocation_id.is_empty() {
		account.header.amz_invocation_id = generate_invocation_id();
	}
	if account.header.kiro_device_hash.is_empty() {
		account.header.kiro_device_hash = generate_device_hash();
	}
	let (sdk, ide) = HeaderParams::default_versions(version);
	if account.header.sdk_js_version.is_empty() {
		account.header.sdk_js_version = sdk.to_string();
	}
	if account.header.ide_version.is_empty() {
		account.header.ide_version = ide.to_string();
	}
	if account.credentials.region.is_empty() {
		account.credentials.region = "us-east-1".to_string();
	}

	account.version = 1;
	account.created_at = now_ms;
	account.updated_at = now_ms;
	account.is_del = false;
	account.deleted_at = None;
	account
}

/// Merge an incoming account into an existing row on `(email, idp)` conflict.
///
/// Policies:
/// - `expires_at` never regresses: the later expiry wins.
/// - Header-generation fields keep the existing value when present; a row's
///   hardware fingerprint is never replaced by an absent one.
/// - Grouping, counters, and creation time stay with the existing row.
/// - Everything else (profile, credential material) takes the incoming value.
pub fn merge_on_conflict(existing: &Account, incoming: Account, now_ms: i64) -> Account {
	let mut merged = incoming;

	merged.id = existing.id.clone();
	merged.group_id = existing.group_id.clone();
	merged.tags = existing.tags.clone();
	merged.api_call_count = existing.api_call_count;
	merged.api_total_tokens = existing.api_total_tokens;
	merged.api_last_call_at = existing.api_last_call_at;
	merged.created_at = existing.created_at;

	merged.credentials.expires_at = merged
		.credentials
		.expires_at
		.max(existing.credentials.expires_at);

	merged.header.header_version = existing.header.header_version;
	coalesce(&mut merged.header.amz_invocation_id, &existing.header.amz_invocation_id);
	coalesce(&mut merged.header.kiro_device_hash, &existing.header.kiro_device_hash);
	coalesce(&mut merged.header.sdk_js_version, &existing.header.sdk_js_version);
	coalesce(&mut merged.header.ide_version, &existing.header.ide_version);

	merged.credentials.client_id = merged
		.credentials
		.client_id
		.take()
		.or_else(|| existing.credentials.client_id.clone());
	merged.credentials.client_id_hash = merged
		.credentials
		.client_id_hash
		.take()
		.or_else(|| existing.credentials.client_id_hash.clone());
	merged.credentials.client_secret = merged
		.credentials
		.client_secret
		.take()
		.or_else(|| existing.credentials.client_secret.clone());

	merged.version = existing.version + 1;
	merged.updated_at = now_ms;
	merged.is_del = false;
	merged.deleted_at = None;
	merged
}

/// Existing non-empty value wins.
fn coalesce(target: &mut String, existing: &str) {
	if !existing.is_empty() {
		*target = existing.to_string();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base_row() -> AccountRow {
		AccountRow {
			id: "acc-1".into(),
			email: "a@example.com".into(),
			user_id: None,
			nickname: None,
			idp: "IdC".into(),
			status: "active".into(),
			group_id: None,
			tags: Some("[\"t1\",\"t2\"]".into()),
			cred_access_token: Some("at".into()),
			cred_refresh_token: Some("rt".into()),
			cred_client_id: None,
			cred_client_id_hash: None,
			cred_client_secret: None,
			cred_region: Some("us-east-1".into()),
			cred_expires_at: Some("1700000000000".into()),
			cred_auth_method: Some("social".into()),
			cred_provider: None,
			header_version: Some(2),
			amz_invocation_id: Some("inv".into()),
			kiro_device_hash: Some("hash".into()),
			sdk_js_version: Some("1.0.27".into()),
			ide_version: Some("0.8.0".into()),
			usage_current: Some(10.0),
			usage_limit: Some(100.0),
			usage_percent_used: Some(10.0),
			subscription: None,
			resource_detail: None,
			api_call_count: Some(3),
			api_total_tokens: Some(900),
			api_last_call_at: None,
			last_error: None,
			created_at: Some(1),
			version: 4,
			updated_at: 2,
			is_del: false,
			deleted_at: None,
		}
	}

	#[test]
	fn parse_epoch_ms_accepts_both_shapes() {
		assert_eq!(parse_epoch_ms("1700000000000"), Some(1_700_000_000_000));
		assert_eq!(parse_epoch_ms("1700000000000.5"), Some(1_700_000_000_000));
		assert_eq!(
			parse_epoch_ms("2023-11-14T22:13:20Z"),
			Some(1_700_000_000_000)
		);
		assert_eq!(
			parse_epoch_ms("2023-11-14T22:13:20+00:00"),
			Some(1_700_000_000_000)
		);
		assert_eq!(parse_epoch_ms(""), None);
		assert_eq!(parse_epoch_ms("soon"), None);
	}

	#[test]
	fn row_converts_to_domain() {
		let account = account_from_row(base_row()).unwrap();
		assert_eq!(account.idp, Idp::AwsIdC);
		assert_eq!(account.status, AccountStatus::Active);
		assert_eq!(account.tags, vec!["t1".to_string(), "t2".to_string()]);
		assert_eq!(account.credentials.expires_at, 1_700_000_000_000);
		assert_eq!(account.header.header_version, HeaderVersion::V2);
	}

	#[test]
	fn unknown_idp_is_skipped() {
		let mut row = base_row();
		row.idp = "MySpace".into();
		assert!(account_from_row(row).is_none());
	}

	#[test]
	fn unknown_status_reads_as_error() {
		let mut row = base_row();
		row.status = "wedged".into();
		let account = account_from_row(row).unwrap();
		assert_eq!(account.status, AccountStatus::Error);
	}

	#[test]
	fn iso_expiry_is_normalized() {
		let mut row = base_row();
		row.cred_expires_at = Some("2023-11-14T22:13:20Z".into());
		let account = account_from_row(row).unwrap();
		assert_eq!(account.credentials.expires_at, 1_700_000_000_000);
	}

	#[test]
	fn prepare_new_account_generates_missing_fields() {
		let mut account = account_from_row(base_row()).unwrap();
		account.header.amz_invocation_id.clear();
		account.header.kiro_device_hash.clear();
		account.header.sdk_js_version.clear();
		account.header.ide_version.clear();

		let prepared = prepare_new_account(account, None, HeaderVersion::V1, 123);
		assert_eq!(prepared.header.header_version, HeaderVersion::V1);
		assert_eq!(prepared.header.sdk_js_version, "1.0.0");
		assert_eq!(prepared.header.ide_version, "0.6.18");
		assert_eq!(prepared.header.kiro_device_hash.len(), 64);
		assert_eq!(prepared.header.amz_invocation_id.len(), 36);
		assert_eq!(prepared.version, 1);
		assert_eq!(prepared.created_at, 123);
	}

	#[test]
	fn prepare_new_account_honors_explicit_version() {
		let account = account_from_row(base_row()).unwrap();
		let prepared =
			prepare_new_account(account, Some(HeaderVersion::V2), HeaderVersion::V1, 123);
		assert_eq!(prepared.header.header_version, HeaderVersion::V2);
	}

	#[test]
	fn merge_never_regresses_expiry() {
		let existing = account_from_row(base_row()).unwrap();
		let mut incoming = existing.clone();
		incoming.credentials.expires_at = existing.credentials.expires_at - 1000;
		incoming.credentials.access_token = "newer".into();

		let merged = merge_on_conflict(&existing, incoming, 999);
		assert_eq!(merged.credentials.expires_at, existing.credentials.expires_at);
		assert_eq!(merged.credentials.access_token, "newer");
		assert_eq!(merged.version, existing.version + 1);
		assert_eq!(merged.updated_at, 999);
	}

	#[test]
	fn merge_keeps_existing_fingerprint() {
		let existing = account_from_row(base_row()).unwrap();
		let mut incoming = existing.clone();
		incoming.header.kiro_device_hash = String::new();
		incoming.header.amz_invocation_id = String::new();

		let merged = merge_on_conflict(&existing, incoming, 999);
		assert_eq!(merged.header.kiro_device_hash, "hash");
		assert_eq!(merged.header.amz_invocation_id, "inv");
	}

	mod proptest_timestamps {
		use super::*;
		use proptest::prelude::*;

		proptest! {
			/// Millisecond values survive the string round trip unchanged.
			#[test]
			fn numeric_strings_parse_exactly(ms in 0i64..4_102_444_800_000) {
				prop_assert_eq!(parse_epoch_ms(&ms.to_string()), Some(ms));
			}

			/// RFC3339 renderings of a timestamp normalize back to the same
			/// millisecond value.
			#[test]
			fn iso_strings_normalize(ms in 0i64..4_102_444_800_000) {
				let iso = chrono::DateTime::from_timestamp_millis(ms)
					.unwrap()
					.to_rfc3339();
				prop_assert_eq!(parse_epoch_ms(&iso), Some(ms));
			}
		}
	}

	#[test]
	fn merge_keeps_grouping_and_counters() {
		let mut existing = account_from_row(base_row()).unwrap();
		existing.group_id = Some("g1".into());
		let mut incoming = existing.clone();
		incoming.group_id = None;
		incoming.api_call_count = 0;

		let merged = merge_on_conflict(&existing, incoming, 999);
		assert_eq!(merged.group_id.as_deref(), Some("g1"));
		assert_eq!(merged.api_call_count, 3);
	}
}
