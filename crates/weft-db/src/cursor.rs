// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted round-robin cursor.
//!
//! Fair selection across replicas hinges on one row per group key, always
//! read under `FOR UPDATE`. The stored account count detects topology
//! changes between reads: when it no longer matches the caller's view the
//! advance reports `count_changed` so the pool can refresh its cache and
//! retry once.

use async_trait::async_trait;
use sqlx::MySqlPool;

use weft_core::now_ms;

use crate::error::DbError;

/// Cursor key for the all-accounts pool.
pub const GLOBAL_GROUP_KEY: &str = "__global__";

/// Outcome of one cursor advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorAdvance {
	/// Index to serve now.
	pub index: usize,
	/// The stored account count differed from the caller's.
	pub count_changed: bool,
}

/// Compute the index to serve and the next index to store.
///
/// A stored index at or past the end (the set shrank) restarts at zero.
pub fn advance_indices(stored_index: i64, account_count: usize) -> (usize, usize) {
	let count = account_count.max(1);
	let current = if stored_index < 0 || stored_index as usize >= count {
		0
	} else {
		stored_index as usize
	};
	(current, (current + 1) % count)
}

/// Round-robin cursor persistence seam.
#[async_trait]
pub trait CursorStore: Send + Sync {
	/// Atomically claim the current index for `group_key` over a set of
	/// `account_count` accounts and advance the stored cursor.
	async fn advance(&self, group_key: &str, account_count: usize)
		-> Result<CursorAdvance, DbError>;
}

/// MySQL-backed cursor repository over the `pool_round_robin` table.
#[derive(Clone)]
pub struct CursorRepository {
	pool: MySqlPool,
}

impl CursorRepository {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl CursorStore for CursorRepository {
	#[tracing::instrument(skip(self))]
	async fn advance(
		&self,
		group_key: &str,
		account_count: usize,
	) -> Result<CursorAdvance, DbError> {
		if account_count == 0 {
			return Err(DbError::Internal(
				"cursor advance over empty account set".to_string(),
			));
		}

		let now = now_ms();
		let mut tx = self.pool.begin().await?;

		let stored: Option<(i64, i64)> = sqlx::query_as(
			"SELECT current_index, account_count FROM pool_round_robin WHERE group_id = ? FOR UPDATE",
		)
		.bind(group_key)
		.fetch_optional(&mut *tx)
		.await?;

		let advance = match stored {
			None => {
				let (current, next) = advance_indices(0, account_count);
				sqlx::query(
					"INSERT INTO pool_round_robin (group_id, current_index, account_count, updated_at) \
					 VALUES (?, ?, ?, ?)",
				)
				.bind(group_key)
				.bind(next as i64)
				.bind(account_count as i64)
				.bind(now)
				.execute(&mut *tx)
				.await?;
				CursorAdvance {
					index: current,
					count_changed: false,
				}
			}
			Some((stored_index, stored_count)) => {
				let count_changed = stored_count != account_count as i64;
				if count_changed {
					tracing::debug!(
						group_key,
						stored_count,
						account_count,
						"round-robin account count changed"
					);
				}
				let (current, next) = advance_indices(stored_index, account_count);
				sqlx::query(
					"UPDATE pool_round_robin SET current_index = ?, account_count = ?, updated_at = ? \
					 WHERE group_id = ?",
				)
				.bind(next as i64)
				.bind(account_count as i64)
				.bind(now)
				.bind(group_key)
				.execute(&mut *tx)
				.await?;
				CursorAdvance {
					index: current,
					count_changed,
				}
			}
		};

		tx.commit().await?;
		Ok(advance)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn advance_wraps_at_count() {
		assert_eq!(advance_indices(0, 3), (0, 1));
		assert_eq!(advance_indices(1, 3), (1, 2));
		assert_eq!(advance_indices(2, 3), (2, 0));
	}

	#[test]
	fn advance_resets_when_index_out_of_range() {
		// Set shrank from 5 to 3: stored index 4 restarts at 0.
		assert_eq!(advance_indices(4, 3), (0, 1));
		assert_eq!(advance_indices(3, 3), (0, 1));
		assert_eq!(advance_indices(-1, 3), (0, 1));
	}

	#[test]
	fn advance_single_account_stays_at_zero() {
		assert_eq!(advance_indices(0, 1), (0, 0));
	}

	/// Fairness: walking a fixed-size set N*M times serves each index
	/// exactly N times.
	#[test]
	fn advance_is_fair_over_full_cycles() {
		let m = 4;
		let cycles = 3;
		let mut counts = vec![0u32; m];
		let mut stored = 0i64;
		for _ in 0..(m * cycles) {
			let (current, next) = advance_indices(stored, m);
			counts[current] += 1;
			stored = next as i64;
		}
		assert!(counts.iter().all(|&c| c == cycles as u32), "{counts:?}");
	}
}
