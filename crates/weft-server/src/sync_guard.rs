// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Sync-delete guard rails.
//!
//! Hard deletion of accounts absent from a bulk payload is the most
//! dangerous operation this server exposes, so every signal must agree:
//! a non-empty payload, the confirmation header AND body flag, a size cap,
//! a per-IP rate limit, and a coverage check unless the caller forces it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use weft_core::ApiError;

/// Upper bound on accounts in one sync payload.
pub const MAX_SYNC_DELETE_ACCOUNTS: usize = 10_000;

/// Minimum spacing between sync-deletes from one address.
pub const SYNC_DELETE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Per-IP rate limiter for the sync-delete flow.
#[derive(Default)]
pub struct SyncDeleteLimiter {
	last_attempt: Mutex<HashMap<String, Instant>>,
}

impl SyncDeleteLimiter {
	/// Record an attempt; false when the address is still cooling down.
	pub fn allow(&self, ip: &str) -> bool {
		let mut last = self.last_attempt.lock().unwrap();
		let now = Instant::now();
		match last.get(ip) {
			Some(at) if now.duration_since(*at) < SYNC_DELETE_COOLDOWN => false,
			_ => {
				last.insert(ip.to_string(), now);
				true
			}
		}
	}
}

/// Inputs the guard evaluates; assembled by the route handler.
#[derive(Debug, Clone)]
pub struct SyncDeleteCheck {
	pub payload_count: usize,
	pub header_confirmed: bool,
	pub body_confirmed: bool,
	pub force_sync: bool,
	pub server_count: i64,
	pub delete_count: i64,
	pub rate_allowed: bool,
}

/// Validate every guard; the first violated rule wins.
pub fn validate_sync_delete(check: &SyncDeleteCheck) -> Result<(), ApiError> {
	if check.payload_count == 0 {
		return Err(ApiError::validation(
			"sync-delete requires a non-empty account list",
		));
	}
	if !check.header_confirmed {
		return Err(ApiError::validation(
			"sync-delete requires the X-Confirm-Sync-Delete: true header",
		));
	}
	if !check.body_confirmed {
		return Err(ApiError::validation(
			"sync-delete requires confirmSyncDelete: true in the request body",
		));
	}
	if check.payload_count > MAX_SYNC_DELETE_ACCOUNTS {
		return Err(ApiError::validation(format!(
			"sync payload exceeds {MAX_SYNC_DELETE_ACCOUNTS} accounts"
		)));
	}
	if !check.rate_allowed {
		return Err(ApiError::new(
			weft_core::ErrorCode::RateLimited,
			"sync-delete allowed at most once per 5 minutes per address",
		));
	}
	// Refuse to wipe half the fleet unless explicitly forced.
	if !check.force_sync && check.server_count > 0 && check.delete_count * 2 >= check.server_count
	{
		return Err(ApiError::validation(format!(
			"sync-delete would remove {} of {} accounts; pass forceSync to proceed",
			check.delete_count, check.server_count
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ok_check() -> SyncDeleteCheck {
		SyncDeleteCheck {
			payload_count: 10,
			header_confirmed: true,
			body_confirmed: true,
			force_sync: false,
			server_count: 100,
			delete_count: 5,
			rate_allowed: true,
		}
	}

	#[test]
	fn all_signals_present_passes() {
		assert!(validate_sync_delete(&ok_check()).is_ok());
	}

	#[test]
	fn missing_header_is_rejected() {
		let check = SyncDeleteCheck {
			header_confirmed: false,
			..ok_check()
		};
		let err = validate_sync_delete(&check).unwrap_err();
		assert_eq!(err.http_status(), 400);
		assert!(err.message.contains("X-Confirm-Sync-Delete"));
	}

	#[test]
	fn missing_body_confirmation_is_rejected() {
		let check = SyncDeleteCheck {
			body_confirmed: false,
			..ok_check()
		};
		assert_eq!(validate_sync_delete(&check).unwrap_err().http_status(), 400);
	}

	#[test]
	fn oversized_payload_is_rejected() {
		let check = SyncDeleteCheck {
			payload_count: MAX_SYNC_DELETE_ACCOUNTS + 1,
			..ok_check()
		};
		assert_eq!(validate_sync_delete(&check).unwrap_err().http_status(), 400);
	}

	#[test]
	fn rate_limited_is_429() {
		let check = SyncDeleteCheck {
			rate_allowed: false,
			..ok_check()
		};
		assert_eq!(validate_sync_delete(&check).unwrap_err().http_status(), 429);
	}

	#[test]
	fn mass_deletion_requires_force() {
		let check = SyncDeleteCheck {
			delete_count: 60,
			..ok_check()
		};
		assert_eq!(validate_sync_delete(&check).unwrap_err().http_status(), 400);

		let forced = SyncDeleteCheck {
			delete_count: 60,
			force_sync: true,
			..ok_check()
		};
		assert!(validate_sync_delete(&forced).is_ok());
	}

	#[test]
	fn limiter_enforces_cooldown() {
		let limiter = SyncDeleteLimiter::default();
		assert!(limiter.allow("10.0.0.1"));
		assert!(!limiter.allow("10.0.0.1"));
		assert!(limiter.allow("10.0.0.2"), "other addresses unaffected");
	}
}
