// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Active / cooling two-tier layer.
//!
//! A small hot list of accounts serves traffic; an account that keeps
//! erroring is quarantined in the cooling pool for a fixed period before
//! re-evaluation. All state is in-memory and serialized through one mutex;
//! the maintenance tick and the mark callbacks are the only writers.

use std::collections::HashMap;

use tokio::sync::Mutex;

use weft_core::config::ActivePoolConfig;

/// Hot-list entry bookkeeping.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEntry {
	pub account_id: String,
	pub error_count: u32,
	pub last_error_at: Option<i64>,
	pub added_at: i64,
}

/// Quarantine entry.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoolingEntry {
	pub account_id: String,
	/// Start of the current cooling period; extended when re-evaluation
	/// finds the account still unhealthy.
	pub cooled_at: i64,
	pub error_count: u32,
}

#[derive(Debug, Default)]
struct TierState {
	active: Vec<ActiveEntry>,
	cooling: HashMap<String, CoolingEntry>,
	next_index: usize,
}

/// Serializable view for status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSnapshot {
	pub enabled: bool,
	pub limit: usize,
	pub active: Vec<ActiveEntry>,
	pub cooling: Vec<CoolingEntry>,
}

/// Outcome of an error mark against the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMark {
	/// The account is not tracked by the tier; the caller owns the
	/// store-level consequence.
	NotTracked,
	/// Error counted, account stays active.
	Counted(u32),
	/// Threshold reached: the account moved to the cooling pool.
	Demoted,
}

/// The in-memory two-tier structure.
pub struct ActiveTier {
	config: ActivePoolConfig,
	state: Mutex<TierState>,
}

impl ActiveTier {
	pub fn new(config: ActivePoolConfig) -> Self {
		Self {
			config,
			state: Mutex::new(TierState::default()),
		}
	}

	pub fn enabled(&self) -> bool {
		self.config.enabled
	}

	pub fn cooling_period_ms(&self) -> i64 {
		self.config.cooling_period_ms
	}

	/// Round-robin over active entries, restricted to ids the caller still
	/// considers servable. Returns the chosen account id.
	pub async fn select(&self, servable: &(dyn Fn(&str) -> bool + Send + Sync)) -> Option<String> {
		let mut state = self.state.lock().await;
		let n = state.active.len();
		if n == 0 {
			return None;
		}
		let start = state.next_index % n;
		for i in 0..n {
			let idx = (start + i) % n;
			if servable(&state.active[idx].account_id) {
				state.next_index = (idx + 1) % n;
				return Some(state.active[idx].account_id.clone());
			}
		}
		None
	}

	/// Count an error against an active entry.
	pub async fn on_error(&self, account_id: &str, now_ms: i64) -> ErrorMark {
		let mut state = self.state.lock().await;
		let Some(pos) = state.active.iter().position(|e| e.account_id == account_id) else {
			return ErrorMark::NotTracked;
		};

		state.active[pos].error_count += 1;
		state.active[pos].last_error_at = Some(now_ms);

		if state.active[pos].error_count >= self.config.error_threshold {
			let entry = state.active.remove(pos);
			tracing::info!(
				account_id,
				error_count = entry.error_count,
				"account demoted to cooling pool"
			);
			state.cooling.insert(
				account_id.to_string(),
				CoolingEntry {
					account_id: account_id.to_string(),
					cooled_at: now_ms,
					error_count: entry.error_count,
				},
			);
			if state.next_index >= state.active.len() && !state.active.is_empty() {
				state.next_index = 0;
			}
			ErrorMark::Demoted
		} else {
			ErrorMark::Counted(state.active[pos].error_count)
		}
	}

	/// Reset the error count after a successful call.
	pub async fn on_success(&self, account_id: &str) {
		let mut state = self.state.lock().await;
		if let Some(entry) = state.active.iter_mut().find(|e| e.account_id == account_id) {
			entry.error_count = 0;
		}
	}

	/// Force an account out of both tiers (banned or deleted).
	pub async fn evict(&self, account_id: &str) {
		let mut state = self.state.lock().await;
		state.active.retain(|e| e.account_id != account_id);
		state.cooling.remove(account_id);
		if state.next_index >= state.active.len() && !state.active.is_empty() {
			state.next_index = 0;
		}
	}

	/// Move an active entry to cooling regardless of its error count.
	pub async fn demote(&self, account_id: &str, now_ms: i64) {
		let mut state = self.state.lock().await;
		let Some(pos) = state.active.iter().position(|e| e.account_id == account_id) else {
			return;
		};
		let entry = state.active.remove(pos);
		state.cooling.insert(
			account_id.to_string(),
			CoolingEntry {
				account_id: account_id.to_string(),
				cooled_at: now_ms,
				error_count: entry.error_count,
			},
		);
		if state.next_index >= state.active.len() && !state.active.is_empty() {
			state.next_index = 0;
		}
	}

	/// Cooling entries whose period elapsed and are due re-evaluation.
	pub async fn due_for_reevaluation(&self, now_ms: i64) -> Vec<CoolingEntry> {
		let state = self.state.lock().await;
		state
			.cooling
			.values()
			.filter(|e| now_ms - e.cooled_at >= self.config.cooling_period_ms)
			.cloned()
			.collect()
	}

	/// Promote a cooled account back into the hot list if there is room.
	/// Returns false when the list is full (the entry's cooling restarts).
	pub async fn promote(&self, account_id: &str, now_ms: i64) -> bool {
		let mut state = self.state.lock().await;
		if state.active.len() >= self.config.limit {
			if let Some(entry) = state.cooling.get_mut(account_id) {
				entry.cooled_at = now_ms;
			}
			return false;
		}
		if state.cooling.remove(account_id).is_none() {
			return false;
		}
		state.active.push(ActiveEntry {
			account_id: account_id.to_string(),
			error_count: 0,
			last_error_at: None,
			added_at: now_ms,
		});
		tracing::info!(account_id, "account promoted from cooling pool");
		true
	}

	/// Restart an unhealthy entry's cooling period.
	pub async fn extend_cooling(&self, account_id: &str, now_ms: i64) {
		let mut state = self.state.lock().await;
		if let Some(entry) = state.cooling.get_mut(account_id) {
			entry.cooled_at = now_ms;
		}
	}

	/// Ids currently tracked by either tier.
	pub async fn tracked_ids(&self) -> Vec<String> {
		let state = self.state.lock().await;
		state
			.active
			.iter()
			.map(|e| e.account_id.clone())
			.chain(state.cooling.keys().cloned())
			.collect()
	}

	pub async fn active_ids(&self) -> Vec<String> {
		let state = self.state.lock().await;
		state.active.iter().map(|e| e.account_id.clone()).collect()
	}

	/// Number of free hot-list slots.
	pub async fn free_slots(&self) -> usize {
		let state = self.state.lock().await;
		self.config.limit.saturating_sub(state.active.len())
	}

	/// Add refill candidates to the hot list, up to the limit.
	pub async fn refill(&self, account_ids: Vec<String>, now_ms: i64) -> usize {
		let mut state = self.state.lock().await;
		let mut added = 0;
		for account_id in account_ids {
			if state.active.len() >= self.config.limit {
				break;
			}
			if state.active.iter().any(|e| e.account_id == account_id)
				|| state.cooling.contains_key(&account_id)
			{
				continue;
			}
			state.active.push(ActiveEntry {
				account_id,
				error_count: 0,
				last_error_at: None,
				added_at: now_ms,
			});
			added += 1;
		}
		added
	}

	pub async fn snapshot(&self) -> TierSnapshot {
		let state = self.state.lock().await;
		TierSnapshot {
			enabled: self.config.enabled,
			limit: self.config.limit,
			active: state.active.clone(),
			cooling: state.cooling.values().cloned().collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tier(limit: usize, threshold: u32) -> ActiveTier {
		ActiveTier::new(ActivePoolConfig {
			enabled: true,
			limit,
			error_threshold: threshold,
			cooling_period_ms: 10 * 60 * 1000,
		})
	}

	#[tokio::test]
	async fn refill_respects_limit_and_exclusions() {
		let tier = tier(2, 5);
		let added = tier
			.refill(vec!["a".into(), "b".into(), "c".into()], 0)
			.await;
		assert_eq!(added, 2);
		assert_eq!(tier.active_ids().await, vec!["a", "b"]);

		// "a" is already tracked, nothing to add.
		assert_eq!(tier.refill(vec!["a".into()], 0).await, 0);
	}

	#[tokio::test]
	async fn threshold_errors_demote_to_cooling() {
		let tier = tier(5, 3);
		tier.refill(vec!["a".into()], 0).await;

		assert_eq!(tier.on_error("a", 1).await, ErrorMark::Counted(1));
		assert_eq!(tier.on_error("a", 2).await, ErrorMark::Counted(2));
		assert_eq!(tier.on_error("a", 3).await, ErrorMark::Demoted);

		let snap = tier.snapshot().await;
		assert!(snap.active.is_empty());
		assert_eq!(snap.cooling.len(), 1);
		assert!(snap.cooling[0].error_count >= 3);
	}

	#[tokio::test]
	async fn success_resets_error_count() {
		let tier = tier(5, 3);
		tier.refill(vec!["a".into()], 0).await;
		tier.on_error("a", 1).await;
		tier.on_error("a", 2).await;
		tier.on_success("a").await;
		// Counter restarted: two more errors do not demote.
		assert_eq!(tier.on_error("a", 3).await, ErrorMark::Counted(1));
		assert_eq!(tier.on_error("a", 4).await, ErrorMark::Counted(2));
	}

	#[tokio::test]
	async fn untracked_accounts_report_not_tracked() {
		let tier = tier(5, 3);
		assert_eq!(tier.on_error("ghost", 0).await, ErrorMark::NotTracked);
	}

	#[tokio::test]
	async fn cooling_reevaluation_and_promotion() {
		let tier = tier(1, 1);
		tier.refill(vec!["a".into(), "b".into()], 0).await; // only "a" fits
		tier.on_error("a", 0).await; // demoted, slot free

		assert!(tier.due_for_reevaluation(0).await.is_empty());
		let due = tier.due_for_reevaluation(10 * 60 * 1000).await;
		assert_eq!(due.len(), 1);

		assert!(tier.promote("a", 10 * 60 * 1000).await);
		assert_eq!(tier.active_ids().await, vec!["a"]);
	}

	#[tokio::test]
	async fn promotion_blocked_when_full_restarts_cooling() {
		let tier = tier(1, 1);
		tier.refill(vec!["a".into()], 0).await;
		tier.on_error("a", 0).await;
		tier.refill(vec!["b".into()], 1).await; // slot taken by b

		let promoted = tier.promote("a", 10 * 60 * 1000).await;
		assert!(!promoted);
		// Cooling restarted at the promotion attempt time.
		assert!(tier.due_for_reevaluation(10 * 60 * 1000 + 1).await.is_empty());
	}

	#[tokio::test]
	async fn select_round_robins_over_servable_entries() {
		let tier = tier(3, 5);
		tier.refill(vec!["a".into(), "b".into(), "c".into()], 0).await;

		let all = |_: &str| true;
		let picks: Vec<String> = [
			tier.select(&all).await.unwrap(),
			tier.select(&all).await.unwrap(),
			tier.select(&all).await.unwrap(),
			tier.select(&all).await.unwrap(),
		]
		.into();
		assert_eq!(picks, vec!["a", "b", "c", "a"]);

		// Skip unservable entries.
		let not_b = |id: &str| id != "b";
		let pick = tier.select(&not_b).await.unwrap();
		assert_ne!(pick, "b");
	}

	#[tokio::test]
	async fn evict_removes_from_both_tiers() {
		let tier = tier(2, 1);
		tier.refill(vec!["a".into(), "b".into()], 0).await;
		tier.on_error("b", 0).await; // b cooling
		tier.evict("a").await;
		tier.evict("b").await;
		let snap = tier.snapshot().await;
		assert!(snap.active.is_empty());
		assert!(snap.cooling.is_empty());
	}
}
