// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Asynchronous request logging.
//!
//! Handlers push entries into a bounded channel; a background writer
//! batches them into the store. Logging never blocks or fails a response:
//! a full channel drops the entry with a debug note.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use weft_db::{LogStore, RequestLogEntry};

const CHANNEL_CAPACITY: usize = 1024;
const BATCH_SIZE: usize = 50;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cheap handle handed to request handlers.
#[derive(Clone)]
pub struct RequestLogger {
	tx: mpsc::Sender<RequestLogEntry>,
}

impl RequestLogger {
	/// Enqueue an entry, best-effort.
	pub fn log(&self, entry: RequestLogEntry) {
		if self.tx.try_send(entry).is_err() {
			tracing::debug!("request log channel full, dropping entry");
		}
	}
}

/// Spawn the writer task and return the logger handle.
pub fn spawn_request_log_writer(
	store: Arc<dyn LogStore>,
) -> (RequestLogger, tokio::task::JoinHandle<()>) {
	let (tx, mut rx) = mpsc::channel::<RequestLogEntry>(CHANNEL_CAPACITY);

	let handle = tokio::spawn(async move {
		let mut batch: Vec<RequestLogEntry> = Vec::with_capacity(BATCH_SIZE);
		loop {
			let received =
				tokio::time::timeout(FLUSH_INTERVAL, rx.recv()).await;
			match received {
				Ok(Some(entry)) => {
					batch.push(entry);
					// Drain whatever else is queued, up to the batch cap.
					while batch.len() < BATCH_SIZE {
						match rx.try_recv() {
							Ok(entry) => batch.push(entry),
							Err(_) => break,
						}
					}
				}
				Ok(None) => {
					flush(&store, &mut batch).await;
					return;
				}
				Err(_) => {} // flush tick
			}

			if !batch.is_empty() {
				flush(&store, &mut batch).await;
			}
		}
	});

	(RequestLogger { tx }, handle)
}

async fn flush(store: &Arc<dyn LogStore>, batch: &mut Vec<RequestLogEntry>) {
	if batch.is_empty() {
		return;
	}
	if let Err(e) = store.write_request_logs(batch).await {
		tracing::warn!(error = %e, count = batch.len(), "request log write failed");
	}
	batch.clear();
}

/// Logger over an in-memory sink, for tests.
#[cfg(test)]
pub fn test_logger() -> (RequestLogger, Arc<MemoryLogStore>) {
	let store = Arc::new(MemoryLogStore::default());
	let (logger, _handle) = spawn_request_log_writer(Arc::clone(&store) as Arc<dyn LogStore>);
	(logger, store)
}

/// In-memory [`LogStore`] used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryLogStore {
	pub request_entries: std::sync::Mutex<Vec<RequestLogEntry>>,
	pub system_entries: std::sync::Mutex<Vec<weft_db::SystemLogEntry>>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl LogStore for MemoryLogStore {
	async fn write_request_logs(
		&self,
		entries: &[RequestLogEntry],
	) -> Result<(), weft_db::DbError> {
		self.request_entries
			.lock()
			.unwrap()
			.extend(entries.iter().cloned());
		Ok(())
	}

	async fn write_system_log(
		&self,
		entry: &weft_db::SystemLogEntry,
	) -> Result<(), weft_db::DbError> {
		self.system_entries.lock().unwrap().push(entry.clone());
		Ok(())
	}

	async fn delete_logs_older_than(&self, _cutoff_ms: i64) -> Result<u64, weft_db::DbError> {
		Ok(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(request_id: &str) -> RequestLogEntry {
		RequestLogEntry {
			request_id: request_id.to_string(),
			group_id: None,
			account_id: Some("a1".to_string()),
			model: "claude-sonnet-4-5".to_string(),
			endpoint: "/v1/chat/completions".to_string(),
			status: 200,
			latency_ms: 12,
			prompt_tokens: 1,
			completion_tokens: 2,
			error: None,
		}
	}

	#[tokio::test]
	async fn entries_reach_the_store() {
		let (logger, store) = test_logger();
		logger.log(entry("req_1"));
		logger.log(entry("req_2"));

		// Give the writer a flush interval to drain.
		tokio::time::sleep(Duration::from_millis(1200)).await;

		let entries = store.request_entries.lock().unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].request_id, "req_1");
	}
}
