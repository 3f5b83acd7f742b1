// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Grouping and configuration entities.
//!
//! Groups scope API keys to a subset of accounts; tags are free-form labels;
//! settings are typed key/value rows. All three carry the same
//! optimistic-concurrency fields as accounts.

use serde::{Deserialize, Serialize};

/// A named set of accounts, optionally reachable through its own API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub api_key: Option<String>,
	#[serde(default)]
	pub color: Option<String>,
	#[serde(default)]
	pub order: i64,
	#[serde(default)]
	pub description: Option<String>,
	pub version: i64,
	pub updated_at: i64,
}

/// Free-form label attachable to accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub color: Option<String>,
	pub version: i64,
	pub updated_at: i64,
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
	Boolean(bool),
	Number(f64),
	String(String),
	Json(serde_json::Value),
}

impl SettingValue {
	/// Persisted type discriminator.
	pub fn kind(&self) -> &'static str {
		match self {
			SettingValue::String(_) => "string",
			SettingValue::Number(_) => "number",
			SettingValue::Boolean(_) => "boolean",
			SettingValue::Json(_) => "json",
		}
	}

	/// Encode for storage as `(kind, raw_text)`.
	pub fn encode(&self) -> (&'static str, String) {
		let raw = match self {
			SettingValue::String(s) => s.clone(),
			SettingValue::Number(n) => n.to_string(),
			SettingValue::Boolean(b) => b.to_string(),
			SettingValue::Json(v) => v.to_string(),
		};
		(self.kind(), raw)
	}

	/// Decode from storage; unknown kinds fall back to a string value.
	pub fn decode(kind: &str, raw: &str) -> Self {
		match kind {
			"number" => raw
				.parse::<f64>()
				.map(SettingValue::Number)
				.unwrap_or_else(|_| SettingValue::String(raw.to_string())),
			"boolean" => SettingValue::Boolean(raw == "true"),
			"json" => serde_json::from_str(raw)
				.map(SettingValue::Json)
				.unwrap_or_else(|_| SettingValue::String(raw.to_string())),
			_ => SettingValue::String(raw.to_string()),
		}
	}
}

/// A typed configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
	pub key: String,
	pub value: SettingValue,
	pub version: i64,
	pub updated_at: i64,
}

/// Current machine-id binding for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineIdBinding {
	pub account_id: String,
	pub machine_id: String,
	pub updated_at: i64,
}

/// Append-only record of a machine-id change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineIdHistoryEntry {
	pub account_id: String,
	pub machine_id: String,
	pub changed_at: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn setting_value_encode_decode() {
		let cases = [
			SettingValue::String("hello".into()),
			SettingValue::Number(42.5),
			SettingValue::Boolean(true),
			SettingValue::Json(serde_json::json!({"a": [1, 2]})),
		];
		for value in cases {
			let (kind, raw) = value.encode();
			assert_eq!(SettingValue::decode(kind, &raw), value);
		}
	}

	#[test]
	fn setting_value_bad_number_falls_back_to_string() {
		let decoded = SettingValue::decode("number", "not-a-number");
		assert_eq!(decoded, SettingValue::String("not-a-number".into()));
	}

	#[test]
	fn setting_value_untagged_json() {
		let v: SettingValue = serde_json::from_str("true").unwrap();
		assert_eq!(v, SettingValue::Boolean(true));
		let v: SettingValue = serde_json::from_str("3.5").unwrap();
		assert_eq!(v, SettingValue::Number(3.5));
		let v: SettingValue = serde_json::from_str("\"x\"").unwrap();
		assert_eq!(v, SettingValue::String("x".into()));
	}
}
