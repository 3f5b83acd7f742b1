// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! MySQL storage layer for the Weft gateway.
//!
//! Everything stateful lives behind this crate: the connection pool with
//! transient-error retry, named advisory locks, and one repository per
//! entity. Repositories expose `async_trait` store traits so the pool,
//! refresher and server logic can be tested against in-memory fakes.

pub mod account;
pub mod batch;
pub mod cursor;
pub mod error;
pub mod group;
pub mod lock;
pub mod logs;
pub mod machine_id;
pub mod pool;
pub mod row;
pub mod setting;
pub mod tag;
pub mod testing;

pub use account::{AccountRepository, AccountStore};
pub use batch::{AccountBatchOp, BatchAction, BatchOpOutcome, BatchOutcome, RollbackStrategy};
pub use cursor::{CursorAdvance, CursorRepository, CursorStore, GLOBAL_GROUP_KEY};
pub use error::DbError;
pub use group::{GroupRepository, GroupStore};
pub use lock::{lock_name, with_lock, DistributedLock, LockClass, LockLease, NamedLocks};
pub use logs::{LogRepository, LogStore, RequestLogEntry, SystemLogEntry};
pub use machine_id::{MachineIdRepository, MachineIdStore};
pub use pool::{create_pool, healthcheck, with_retry, HealthProbe};
pub use setting::{SettingRepository, SettingStore};
pub use tag::{TagRepository, TagStore};
