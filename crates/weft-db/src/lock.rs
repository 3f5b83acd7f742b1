// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Named advisory locks over MySQL `GET_LOCK`.
//!
//! A lock is held by the pooled connection that acquired it, so the lease
//! pins that connection until release. Dropping an unreleased lease detaches
//! the connection from the pool and closes it, which makes the server free
//! the lock even when the holder panicked.

use async_trait::async_trait;
use sqlx::mysql::MySql;
use sqlx::pool::PoolConnection;
use sqlx::MySqlPool;

use crate::error::DbError;

/// Lock-name classes, rendered as `kiro:<class>:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockClass {
	Refresh,
	Pool,
	Account,
	Batch,
}

impl LockClass {
	pub fn as_str(&self) -> &'static str {
		match self {
			LockClass::Refresh => "refresh",
			LockClass::Pool => "pool",
			LockClass::Account => "account",
			LockClass::Batch => "batch",
		}
	}
}

/// Build the canonical lock name for a class and id.
pub fn lock_name(class: LockClass, id: &str) -> String {
	format!("kiro:{}:{}", class.as_str(), id)
}

/// A held lock. Release through [`NamedLocks::release`]; dropping without
/// release closes the underlying connection instead of returning it.
pub struct LockLease {
	name: String,
	conn: Option<PoolConnection<MySql>>,
}

impl LockLease {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// A lease with no backing connection, for fake lock managers in tests.
	pub fn detached(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			conn: None,
		}
	}
}

impl Drop for LockLease {
	fn drop(&mut self) {
		if let Some(conn) = self.conn.take() {
			// Closing the connection (instead of pooling it back) is what
			// guarantees the server releases the advisory lock.
			tracing::warn!(lock = %self.name, "lock lease dropped without release, closing connection");
			drop(conn.detach());
		}
	}
}

impl std::fmt::Debug for LockLease {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LockLease")
			.field("name", &self.name)
			.field("held", &self.conn.is_some())
			.finish()
	}
}

/// Cross-process advisory locks.
#[async_trait]
pub trait NamedLocks: Send + Sync {
	/// Try to acquire `name`, waiting up to `timeout_secs` (0 = non-blocking).
	/// Returns `None` when another holder kept the lock through the timeout.
	async fn try_acquire(&self, name: &str, timeout_secs: u32) -> Result<Option<LockLease>, DbError>;

	/// Release a lease. Idempotent: releasing a detached lease is a no-op.
	async fn release(&self, lease: LockLease) -> Result<(), DbError>;

	/// Whether nobody currently holds `name`.
	async fn is_free(&self, name: &str) -> Result<bool, DbError>;

	/// Whether any session currently holds `name`.
	async fn is_held(&self, name: &str) -> Result<bool, DbError>;
}

/// MySQL-backed implementation of [`NamedLocks`].
#[derive(Clone)]
pub struct DistributedLock {
	pool: MySqlPool,
}

impl DistributedLock {
	pub fn new(pool: MySqlPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl NamedLocks for DistributedLock {
	#[tracing::instrument(skip(self))]
	async fn try_acquire(&self, name: &str, timeout_secs: u32) -> Result<Option<LockLease>, DbError> {
		let mut conn = self.pool.acquire().await?;
		let granted: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?)")
			.bind(name)
			.bind(timeout_secs)
			.fetch_one(&mut *conn)
			.await?;

		match granted {
			Some(1) => {
				tracing::debug!(lock = name, "advisory lock acquired");
				Ok(Some(LockLease {
					name: name.to_string(),
					conn: Some(conn),
				}))
			}
			// 0 = timed out waiting; NULL = server-side error (e.g. killed)
			_ => {
				tracing::debug!(lock = name, "advisory lock not acquired");
				Ok(None)
			}
		}
	}

	async fn release(&self, mut lease: LockLease) -> Result<(), DbError> {
		let Some(mut conn) = lease.conn.take() else {
			return Ok(());
		};
		let _: Option<i64> = sqlx::query_scalar("SELECT RELEASE_LOCK(?)")
			.bind(&lease.name)
			.fetch_one(&mut *conn)
			.await?;
		tracing::debug!(lock = %lease.name, "advisory lock released");
		// conn drops here and returns to the pool
		Ok(())
	}

	async fn is_free(&self, name: &str) -> Result<bool, DbError> {
		let free: Option<i64> = sqlx::query_scalar("SELECT IS_FREE_LOCK(?)")
			.bind(name)
			.fetch_one(&self.pool)
			.await?;
		Ok(free == Some(1))
	}

	async fn is_held(&self, name: &str) -> Result<bool, DbError> {
		let holder: Option<i64> = sqlx::query_scalar("SELECT IS_USED_LOCK(?)")
			.bind(name)
			.fetch_one(&self.pool)
			.await?;
		Ok(holder.is_some())
	}
}

/// Run `op` under `name`, releasing on every exit path.
///
/// Returns `Ok(None)` when the lock could not be acquired within the
/// timeout. If `op` errors the lock is still released before the error
/// propagates; if the task panics the lease's drop guard closes the
/// connection and the server frees the lock.
pub async fn with_lock<L, T, F, Fut>(
	locks: &L,
	name: &str,
	timeout_secs: u32,
	op: F,
) -> Result<Option<T>, DbError>
where
	L: NamedLocks + ?Sized,
	F: FnOnce() -> Fut,
	Fut: std::future::Future<Output = Result<T, DbError>>,
{
	let Some(lease) = locks.try_acquire(name, timeout_secs).await? else {
		return Ok(None);
	};

	let result = op().await;
	locks.release(lease).await?;
	result.map(Some)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;
	use std::sync::Mutex;

	/// In-memory lock manager mirroring GET_LOCK semantics for one process.
	struct FakeLocks {
		held: Mutex<HashSet<String>>,
	}

	impl FakeLocks {
		fn new() -> Self {
			Self {
				held: Mutex::new(HashSet::new()),
			}
		}
	}

	#[async_trait]
	impl NamedLocks for FakeLocks {
		async fn try_acquire(
			&self,
			name: &str,
			_timeout_secs: u32,
		) -> Result<Option<LockLease>, DbError> {
			let mut held = self.held.lock().unwrap();
			if held.insert(name.to_string()) {
				Ok(Some(LockLease::detached(name)))
			} else {
				Ok(None)
			}
		}

		async fn release(&self, lease: LockLease) -> Result<(), DbError> {
			self.held.lock().unwrap().remove(lease.name());
			Ok(())
		}

		async fn is_free(&self, name: &str) -> Result<bool, DbError> {
			Ok(!self.held.lock().unwrap().contains(name))
		}

		async fn is_held(&self, name: &str) -> Result<bool, DbError> {
			Ok(self.held.lock().unwrap().contains(name))
		}
	}

	#[test]
	fn lock_names_follow_convention() {
		assert_eq!(lock_name(LockClass::Refresh, "acc-1"), "kiro:refresh:acc-1");
		assert_eq!(lock_name(LockClass::Pool, "__global__"), "kiro:pool:__global__");
		assert_eq!(lock_name(LockClass::Batch, "b"), "kiro:batch:b");
	}

	#[tokio::test]
	async fn with_lock_runs_and_releases() {
		let locks = FakeLocks::new();
		let name = lock_name(LockClass::Account, "a1");

		let out = with_lock(&locks, &name, 1, || async { Ok(7) }).await.unwrap();
		assert_eq!(out, Some(7));
		assert!(locks.is_free(&name).await.unwrap());
	}

	#[tokio::test]
	async fn with_lock_skips_when_contended() {
		let locks = FakeLocks::new();
		let name = lock_name(LockClass::Refresh, "a1");
		let lease = locks.try_acquire(&name, 0).await.unwrap().unwrap();

		let out = with_lock(&locks, &name, 0, || async { Ok(7) }).await.unwrap();
		assert_eq!(out, None);

		locks.release(lease).await.unwrap();
		assert!(locks.is_free(&name).await.unwrap());
	}

	#[tokio::test]
	async fn with_lock_releases_on_error() {
		let locks = FakeLocks::new();
		let name = lock_name(LockClass::Account, "a1");

		let out: Result<Option<()>, _> = with_lock(&locks, &name, 1, || async {
			Err(DbError::Internal("boom".into()))
		})
		.await;
		assert!(out.is_err());
		assert!(locks.is_free(&name).await.unwrap(), "lock released after error");
	}

	#[tokio::test]
	async fn release_is_idempotent_for_detached_leases() {
		let locks = FakeLocks::new();
		locks.release(LockLease::detached("kiro:account:x")).await.unwrap();
	}
}
