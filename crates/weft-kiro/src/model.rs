// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Model name mapping between the public API surface and the vendor.

/// Model served when the client does not name one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Public model names this gateway accepts, in catalog order.
pub const SUPPORTED_MODELS: &[&str] = &["claude-sonnet-4-5", "claude-opus-4-5", "claude-haiku-4-5"];

/// Map a public model name to the vendor's model id.
///
/// Unknown names fall back to the default model's vendor id; the catalog
/// endpoint is the place clients learn what is supported.
pub fn vendor_model_id(model: &str) -> &'static str {
	match model {
		"claude-opus-4-5" => "claude-opus-4.5",
		"claude-haiku-4-5" => "claude-haiku-4.5",
		"claude-sonnet-4-5" => "CLAUDE_SONNET_4_5_20250929_V1_0",
		_ => "CLAUDE_SONNET_4_5_20250929_V1_0",
	}
}

/// Whether the catalog lists this model.
pub fn is_supported(model: &str) -> bool {
	SUPPORTED_MODELS.contains(&model)
}
