// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Upstream account domain model.
//!
//! An [`Account`] is one Kiro subscription the gateway can route traffic
//! through. Accounts carry their own OAuth credential material, the
//! header-generation parameters that identify them to the vendor, usage
//! numbers that drive selection, and the optimistic-concurrency bookkeeping
//! (`version`, `updated_at`, soft-delete flags) shared by every mutable row.

use serde::{Deserialize, Serialize};

use crate::time::now_ms;

/// A token is considered valid only while it has at least this much
/// lifetime left, so a request never starts on a token about to expire.
pub const TOKEN_VALIDITY_MARGIN_MS: i64 = 15 * 60 * 1000;

/// Identity provider the account authenticated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Idp {
	/// AWS IAM Identity Center.
	#[serde(rename = "IdC", alias = "IAM", alias = "AWSIdC")]
	AwsIdC,
	#[serde(rename = "BuilderId", alias = "BUILDER_ID")]
	BuilderId,
	#[serde(rename = "Github", alias = "GITHUB")]
	Github,
	#[serde(rename = "Google", alias = "GOOGLE")]
	Google,
}

impl Idp {
	/// Canonical wire name, also used as the persisted column value.
	pub fn as_str(&self) -> &'static str {
		match self {
			Idp::AwsIdC => "IdC",
			Idp::BuilderId => "BuilderId",
			Idp::Github => "Github",
			Idp::Google => "Google",
		}
	}

	/// Parse a persisted or client-supplied IDP name, accepting the legacy
	/// aliases that older rows carry.
	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"IdC" | "IAM" | "AWSIdC" => Some(Idp::AwsIdC),
			"BuilderId" | "BUILDER_ID" => Some(Idp::BuilderId),
			"Github" | "GITHUB" => Some(Idp::Github),
			"Google" | "GOOGLE" => Some(Idp::Google),
			_ => None,
		}
	}
}

/// Lifecycle state of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
	#[default]
	Active,
	Error,
	Expired,
	Refreshing,
	Banned,
}

impl AccountStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			AccountStatus::Active => "active",
			AccountStatus::Error => "error",
			AccountStatus::Expired => "expired",
			AccountStatus::Refreshing => "refreshing",
			AccountStatus::Banned => "banned",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"active" => Some(AccountStatus::Active),
			"error" => Some(AccountStatus::Error),
			"expired" => Some(AccountStatus::Expired),
			"refreshing" => Some(AccountStatus::Refreshing),
			"banned" => Some(AccountStatus::Banned),
			_ => None,
		}
	}
}

/// How the refresh token is exchanged at the vendor.
///
/// `Social` uses the Kiro desktop auth endpoint; `Oidc` and `IdC` both go
/// through the regional OIDC token endpoint with client credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
	#[default]
	#[serde(rename = "social")]
	Social,
	#[serde(rename = "oidc")]
	Oidc,
	#[serde(rename = "IdC")]
	IdC,
}

impl AuthMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuthMethod::Social => "social",
			AuthMethod::Oidc => "oidc",
			AuthMethod::IdC => "IdC",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"social" => Some(AuthMethod::Social),
			"oidc" => Some(AuthMethod::Oidc),
			"IdC" | "idc" => Some(AuthMethod::IdC),
			_ => None,
		}
	}
}

/// Vendor API generation an account speaks.
///
/// V1 accounts call the legacy codewhisperer host; V2 accounts call the new
/// host and send the additional agent-mode headers. Serialized as the bare
/// integer the original data model used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVersion {
	V1,
	V2,
}

impl HeaderVersion {
	pub fn as_u8(&self) -> u8 {
		match self {
			HeaderVersion::V1 => 1,
			HeaderVersion::V2 => 2,
		}
	}

	pub fn from_u8(v: u8) -> Option<Self> {
		match v {
			1 => Some(HeaderVersion::V1),
			2 => Some(HeaderVersion::V2),
			_ => None,
		}
	}
}

impl Serialize for HeaderVersion {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u8(self.as_u8())
	}
}

impl<'de> Deserialize<'de> for HeaderVersion {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let v = u8::deserialize(deserializer)?;
		HeaderVersion::from_u8(v)
			.ok_or_else(|| serde::de::Error::custom(format!("invalid header version: {v}")))
	}
}

/// OAuth credential material owned by an account.
///
/// Mutated only by the token refresher and the login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
	pub access_token: String,
	pub refresh_token: String,
	#[serde(default)]
	pub client_id: Option<String>,
	#[serde(default)]
	pub client_id_hash: Option<String>,
	#[serde(default)]
	pub client_secret: Option<String>,
	pub region: String,
	/// Epoch milliseconds at which the access token expires.
	pub expires_at: i64,
	pub auth_method: AuthMethod,
	#[serde(default)]
	pub provider: Option<String>,
}

impl Default for Credentials {
	fn default() -> Self {
		Self {
			access_token: String::new(),
			refresh_token: String::new(),
			client_id: None,
			client_id_hash: None,
			client_secret: None,
			region: String::new(),
			expires_at: 0,
			auth_method: AuthMethod::Social,
			provider: None,
		}
	}
}

/// Per-account header-generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeaderParams {
	pub header_version: HeaderVersion,
	/// UUIDv4 pinned per account, sent as `amz-sdk-invocation-id`.
	pub amz_invocation_id: String,
	/// 64 hex chars identifying the "device" this account runs on.
	pub kiro_device_hash: String,
	pub sdk_js_version: String,
	pub ide_version: String,
}

/// Pinned version strings for header V1 accounts.
pub const V1_SDK_VERSION: &str = "1.0.0";
pub const V1_IDE_VERSION: &str = "0.6.18";
/// Pinned version strings for header V2 accounts.
pub const V2_SDK_VERSION: &str = "1.0.27";
pub const V2_IDE_VERSION: &str = "0.8.0";

impl Default for HeaderParams {
	fn default() -> Self {
		Self {
			header_version: HeaderVersion::V2,
			amz_invocation_id: String::new(),
			kiro_device_hash: String::new(),
			sdk_js_version: String::new(),
			ide_version: String::new(),
		}
	}
}

impl HeaderParams {
	/// Default versions for a header generation.
	pub fn default_versions(version: HeaderVersion) -> (&'static str, &'static str) {
		match version {
			HeaderVersion::V1 => (V1_SDK_VERSION, V1_IDE_VERSION),
			HeaderVersion::V2 => (V2_SDK_VERSION, V2_IDE_VERSION),
		}
	}
}

/// Usage numbers reported by the vendor; `percent_used` drives selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
	#[serde(default)]
	pub current: f64,
	#[serde(default)]
	pub limit: f64,
	/// 0–100; recomputed from current/limit when the row is missing it.
	#[serde(default)]
	pub percent_used: f64,
}

impl Usage {
	/// Remaining quota before the account is excluded from selection.
	pub fn remaining(&self) -> f64 {
		self.limit - self.current
	}
}

fn default_version() -> i64 {
	1
}

/// Fresh `amz-sdk-invocation-id` value for a new account.
pub fn generate_invocation_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

/// Fresh device fingerprint: 32 random bytes as 64 lowercase hex chars.
pub fn generate_device_hash() -> String {
	let mut bytes = [0u8; 32];
	rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One upstream Kiro subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
	pub id: String,
	pub email: String,
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub nickname: Option<String>,
	pub idp: Idp,
	#[serde(default)]
	pub status: AccountStatus,
	#[serde(default)]
	pub group_id: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub credentials: Credentials,
	#[serde(default)]
	pub header: HeaderParams,
	#[serde(default)]
	pub usage: Usage,
	#[serde(default)]
	pub subscription: Option<serde_json::Value>,
	#[serde(default)]
	pub resource_detail: Option<serde_json::Value>,
	#[serde(default)]
	pub api_call_count: i64,
	#[serde(default)]
	pub api_total_tokens: i64,
	#[serde(default)]
	pub api_last_call_at: Option<i64>,
	#[serde(default)]
	pub last_error: Option<String>,
	#[serde(default)]
	pub created_at: i64,
	#[serde(default = "default_version")]
	pub version: i64,
	#[serde(default)]
	pub updated_at: i64,
	#[serde(default)]
	pub is_del: bool,
	#[serde(default)]
	pub deleted_at: Option<i64>,
}

impl Account {
	/// Whether the access token still has the required margin of validity.
	pub fn token_valid_at(&self, now_ms: i64) -> bool {
		self.credentials.expires_at > now_ms + TOKEN_VALIDITY_MARGIN_MS
	}

	/// Convenience wrapper over [`Account::token_valid_at`] with the wall clock.
	pub fn token_valid(&self) -> bool {
		self.token_valid_at(now_ms())
	}

	/// Whether this account passes the hard selection filter: not deleted,
	/// active, carrying a token, and with more than 5 units of quota left.
	pub fn selectable(&self) -> bool {
		!self.is_del
			&& self.status == AccountStatus::Active
			&& !self.credentials.access_token.is_empty()
			&& self.usage.remaining() > 5.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn account(expires_at: i64) -> Account {
		Account {
			id: "acc-1".into(),
			email: "a@example.com".into(),
			user_id: None,
			nickname: None,
			idp: Idp::AwsIdC,
			status: AccountStatus::Active,
			group_id: None,
			tags: vec![],
			credentials: Credentials {
				access_token: "at".into(),
				refresh_token: "rt".into(),
				client_id: None,
				client_id_hash: None,
				client_secret: None,
				region: "us-east-1".into(),
				expires_at,
				auth_method: AuthMethod::Social,
				provider: None,
			},
			header: HeaderParams {
				header_version: HeaderVersion::V2,
				amz_invocation_id: "00000000-0000-4000-8000-000000000000".into(),
				kiro_device_hash: "ab".repeat(32),
				sdk_js_version: V2_SDK_VERSION.into(),
				ide_version: V2_IDE_VERSION.into(),
			},
			usage: Usage {
				current: 0.0,
				limit: 100.0,
				percent_used: 0.0,
			},
			subscription: None,
			resource_detail: None,
			api_call_count: 0,
			api_total_tokens: 0,
			api_last_call_at: None,
			last_error: None,
			created_at: 0,
			version: 1,
			updated_at: 0,
			is_del: false,
			deleted_at: None,
		}
	}

	#[test]
	fn token_valid_requires_margin() {
		let now = 1_000_000;
		let acc = account(now + TOKEN_VALIDITY_MARGIN_MS + 1);
		assert!(acc.token_valid_at(now));

		let acc = account(now + TOKEN_VALIDITY_MARGIN_MS);
		assert!(!acc.token_valid_at(now));

		let acc = account(now - 1);
		assert!(!acc.token_valid_at(now));
	}

	#[test]
	fn selectable_requires_quota_headroom() {
		let mut acc = account(i64::MAX);
		assert!(acc.selectable());

		acc.usage.current = 95.0;
		assert!(!acc.selectable(), "remaining quota of exactly 5 is excluded");

		acc.usage.current = 94.9;
		assert!(acc.selectable());
	}

	#[test]
	fn selectable_rejects_non_active_and_deleted() {
		let mut acc = account(i64::MAX);
		acc.status = AccountStatus::Error;
		assert!(!acc.selectable());

		let mut acc = account(i64::MAX);
		acc.is_del = true;
		assert!(!acc.selectable());

		let mut acc = account(i64::MAX);
		acc.credentials.access_token.clear();
		assert!(!acc.selectable());
	}

	#[test]
	fn generated_device_hash_is_64_hex_chars() {
		let hash = generate_device_hash();
		assert_eq!(hash.len(), 64);
		assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn idp_aliases_parse() {
		assert_eq!(Idp::parse("IAM"), Some(Idp::AwsIdC));
		assert_eq!(Idp::parse("AWSIdC"), Some(Idp::AwsIdC));
		assert_eq!(Idp::parse("BUILDER_ID"), Some(Idp::BuilderId));
		assert_eq!(Idp::parse("nope"), None);
	}

	#[test]
	fn header_version_serializes_as_integer() {
		let json = serde_json::to_string(&HeaderVersion::V2).unwrap();
		assert_eq!(json, "2");
		let parsed: HeaderVersion = serde_json::from_str("1").unwrap();
		assert_eq!(parsed, HeaderVersion::V1);
		assert!(serde_json::from_str::<HeaderVersion>("3").is_err());
	}

	#[test]
	fn account_round_trips_through_json() {
		let acc = account(42);
		let json = serde_json::to_string(&acc).unwrap();
		assert!(json.contains("\"accessToken\":\"at\""));
		assert!(json.contains("\"headerVersion\":2"));
		let back: Account = serde_json::from_str(&json).unwrap();
		assert_eq!(back.id, acc.id);
		assert_eq!(back.credentials.expires_at, 42);
	}
}
