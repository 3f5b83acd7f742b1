// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Weft gateway server binary.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weft_core::Config;
use weft_server::{create_app_state, create_router, jobs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let config = Config::from_env();
	tracing::info!(
		port = config.port,
		server_id = %config.server_id,
		worker_index = config.worker_index,
		db_host = %config.db.host,
		db_name = %config.db.database,
		"starting weft-server"
	);

	let db = weft_db::create_pool(&config.db).await?;
	let probe = weft_db::healthcheck(&db).await;
	if !probe.healthy {
		tracing::warn!(error = ?probe.error, "database probe failed at startup, continuing degraded");
	}

	let port = config.port;
	let refresh_disabled = config.disable_token_refresh;
	let state = create_app_state(config, db);

	// Independent control loops.
	jobs::spawn_pool_maintenance(Arc::clone(&state.pool));
	jobs::spawn_pool_monitor(Arc::clone(&state.pool));
	jobs::spawn_log_cleanup(Arc::clone(&state.logs));
	if refresh_disabled {
		tracing::info!("token refresh disabled on this replica");
	} else {
		Arc::clone(&state.refresher).spawn();
	}

	let router = create_router(state);
	let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
	tracing::info!(port, "listening");
	axum::serve(listener, router).await?;

	Ok(())
}
