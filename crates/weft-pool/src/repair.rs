// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Candidate validation and in-memory repair.
//!
//! Rows missing required material are dropped; rows with fixable gaps are
//! patched in memory without writing back. Both outcomes are counted and
//! surface in the pool health report.

use weft_core::Account;

/// One day / one year in milliseconds, bounds for a plausible expiry.
const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;
const ONE_YEAR_MS: i64 = 365 * ONE_DAY_MS;

/// Counters from one validation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RepairStats {
	pub dropped: u64,
	pub repaired: u64,
}

/// Validate every candidate, repairing what can be repaired.
///
/// Drop rules: missing id/email/access token, or an expiry outside
/// `[now − 1 day, now + 1 year]` (unparseable legacy values normalize to 0
/// and land outside the window).
///
/// Repair rules: empty region defaults to `us-east-1`, negative usage
/// numbers clamp to 0, `percent_used` clamps into `[0, 100]` and is
/// recomputed from current/limit when absent.
pub fn validate_and_repair(accounts: Vec<Account>, now_ms: i64) -> (Vec<Account>, RepairStats) {
	let mut stats = RepairStats::default();
	let mut valid = Vec::with_capacity(accounts.len());

	for mut account in accounts {
		if account.id.is_empty()
			|| account.email.is_empty()
			|| account.credentials.access_token.is_empty()
		{
			tracing::debug!(account_id = %account.id, "dropping account row missing required fields");
			stats.dropped += 1;
			continue;
		}

		let expires = account.credentials.expires_at;
		if expires < now_ms - ONE_DAY_MS || expires > now_ms + ONE_YEAR_MS {
			tracing::debug!(
				account_id = %account.id,
				expires_at = expires,
				"dropping account row with implausible expiry"
			);
			stats.dropped += 1;
			continue;
		}

		let mut repaired = false;

		if account.credentials.region.is_empty() {
			account.credentials.region = "us-east-1".to_string();
			repaired = true;
		}
		if account.usage.current < 0.0 {
			account.usage.current = 0.0;
			repaired = true;
		}
		if account.usage.limit < 0.0 {
			account.usage.limit = 0.0;
			repaired = true;
		}
		if account.usage.percent_used == 0.0
			&& account.usage.current > 0.0
			&& account.usage.limit > 0.0
		{
			account.usage.percent_used = account.usage.current / account.usage.limit * 100.0;
			repaired = true;
		}
		if !(0.0..=100.0).contains(&account.usage.percent_used) {
			account.usage.percent_used = account.usage.percent_used.clamp(0.0, 100.0);
			repaired = true;
		}

		if repaired {
			stats.repaired += 1;
		}
		valid.push(account);
	}

	(valid, stats)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil::test_account;

	const NOW: i64 = 1_700_000_000_000;

	#[test]
	fn drops_rows_missing_access_token() {
		let mut acc = test_account("a1", NOW + ONE_DAY_MS);
		acc.credentials.access_token.clear();
		let (valid, stats) = validate_and_repair(vec![acc], NOW);
		assert!(valid.is_empty());
		assert_eq!(stats.dropped, 1);
	}

	#[test]
	fn drops_rows_with_implausible_expiry() {
		let stale = test_account("a1", NOW - 2 * ONE_DAY_MS);
		let far = test_account("a2", NOW + 2 * ONE_YEAR_MS);
		let zero = test_account("a3", 0);
		let (valid, stats) = validate_and_repair(vec![stale, far, zero], NOW);
		assert!(valid.is_empty());
		assert_eq!(stats.dropped, 3);
	}

	#[test]
	fn keeps_recently_expired_rows() {
		// Expired an hour ago: still within the plausible window, the
		// refresher may still rescue it.
		let acc = test_account("a1", NOW - 60 * 60 * 1000);
		let (valid, stats) = validate_and_repair(vec![acc], NOW);
		assert_eq!(valid.len(), 1);
		assert_eq!(stats.dropped, 0);
	}

	#[test]
	fn repairs_missing_region_and_percent() {
		let mut acc = test_account("a1", NOW + ONE_DAY_MS);
		acc.credentials.region.clear();
		acc.usage.current = 30.0;
		acc.usage.limit = 60.0;
		acc.usage.percent_used = 0.0;

		let (valid, stats) = validate_and_repair(vec![acc], NOW);
		assert_eq!(stats.repaired, 1);
		assert_eq!(valid[0].credentials.region, "us-east-1");
		assert!((valid[0].usage.percent_used - 50.0).abs() < f64::EPSILON);
	}

	#[test]
	fn clamps_out_of_range_percent() {
		let mut acc = test_account("a1", NOW + ONE_DAY_MS);
		acc.usage.percent_used = 140.0;
		let (valid, stats) = validate_and_repair(vec![acc], NOW);
		assert_eq!(stats.repaired, 1);
		assert_eq!(valid[0].usage.percent_used, 100.0);
	}

	#[test]
	fn healthy_rows_pass_untouched() {
		let acc = test_account("a1", NOW + ONE_DAY_MS);
		let (valid, stats) = validate_and_repair(vec![acc.clone()], NOW);
		assert_eq!(stats, RepairStats::default());
		assert_eq!(valid[0].usage.percent_used, acc.usage.percent_used);
	}
}
