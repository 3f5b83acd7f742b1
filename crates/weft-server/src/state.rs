// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared application state.

use std::sync::Arc;

use weft_core::Config;
use weft_db::{
	AccountStore, GroupStore, LogStore, MachineIdStore, SettingStore, TagStore,
};
use weft_pool::AccountPool;
use weft_refresh::TokenRefresher;

use crate::auth::Authenticator;
use crate::orchestrator::Orchestrator;
use crate::request_log::RequestLogger;
use crate::sync_guard::SyncDeleteLimiter;

/// Everything handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
	pub config: Arc<Config>,
	pub auth: Arc<Authenticator>,
	pub pool: Arc<AccountPool>,
	pub orchestrator: Arc<Orchestrator>,
	pub refresher: Arc<TokenRefresher>,
	pub accounts: Arc<dyn AccountStore>,
	pub groups: Arc<dyn GroupStore>,
	pub tags: Arc<dyn TagStore>,
	pub settings: Arc<dyn SettingStore>,
	pub machine_ids: Arc<dyn MachineIdStore>,
	pub logs: Arc<dyn LogStore>,
	pub request_logger: RequestLogger,
	pub sync_limiter: Arc<SyncDeleteLimiter>,
}
