// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Weft gateway server.
//!
//! Wires the storage, pool, refresher and protocol adapters into an axum
//! application: authentication, the request orchestrator with cross-account
//! retry, version-controlled CRUD, sync surfaces and background jobs.

pub mod auth;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod request_log;
pub mod routes;
pub mod state;
pub mod sync_guard;

use std::sync::Arc;

use weft_core::Config;
use weft_db::{
	AccountRepository, AccountStore, CursorRepository, CursorStore, DistributedLock,
	GroupRepository, LogRepository, MachineIdRepository, SettingRepository, TagRepository,
};
use weft_pool::AccountPool;
use weft_refresh::{RefresherConfig, TokenRefresher, VendorExchanger};

use crate::auth::Authenticator;
use crate::orchestrator::{KiroBackend, Orchestrator};
use crate::request_log::spawn_request_log_writer;
use crate::state::AppState;
use crate::sync_guard::SyncDeleteLimiter;

pub use routes::create_router;

/// Build the application state from configuration and a connected pool.
pub fn create_app_state(config: Config, db: sqlx::MySqlPool) -> AppState {
	let config = Arc::new(config);

	let accounts: Arc<dyn AccountStore> = Arc::new(AccountRepository::new(db.clone()));
	let cursor: Arc<dyn CursorStore> = Arc::new(CursorRepository::new(db.clone()));
	let groups = Arc::new(GroupRepository::new(db.clone()));
	let tags = Arc::new(TagRepository::new(db.clone()));
	let settings = Arc::new(SettingRepository::new(db.clone()));
	let machine_ids = Arc::new(MachineIdRepository::new(db.clone()));
	let logs = Arc::new(LogRepository::new(db.clone()));
	let locks = Arc::new(DistributedLock::new(db));

	let pool = Arc::new(AccountPool::new(
		Arc::clone(&accounts),
		cursor,
		config.active_pool.clone(),
		config.alerts.clone(),
	));

	let refresher = Arc::new(TokenRefresher::new(
		Arc::clone(&accounts),
		locks,
		Arc::new(VendorExchanger::new()),
		RefresherConfig {
			interval: std::time::Duration::from_secs(config.token_refresh_interval_secs),
			..RefresherConfig::default()
		},
	));

	let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&pool), Arc::new(KiroBackend)));
	let authenticator = Arc::new(Authenticator::new(&config, groups.clone()));
	let (request_logger, _log_writer) =
		spawn_request_log_writer(Arc::clone(&logs) as Arc<dyn weft_db::LogStore>);

	AppState {
		config,
		auth: authenticator,
		pool,
		orchestrator,
		refresher,
		accounts,
		groups,
		tags,
		settings,
		machine_ids,
		logs,
		request_logger,
		sync_limiter: Arc::new(SyncDeleteLimiter::default()),
	}
}
