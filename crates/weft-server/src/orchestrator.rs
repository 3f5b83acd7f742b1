// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Request orchestration.
//!
//! The per-request state machine: pick an account, invoke the vendor,
//! classify failures, and retry across accounts within the budget. A
//! client-pinned `account_id` disables failover entirely. Streams replay
//! onto a replacement account once if the token dies mid-flight; the
//! already-emitted prefix is accepted as best-effort recovery.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use weft_core::chat::ChatRequest;
use weft_core::{Account, ApiError, ErrorCode};
use weft_kiro::{
	is_token_expiry_message, CallOutcome, EventReceiver, KiroClient, KiroError, KiroEvent,
};
use weft_pool::AccountPool;

use crate::error::pool_error_to_api;
use crate::request_log::RequestLogger;
use weft_db::RequestLogEntry;

/// Vendor invocation seam, fakeable in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
	async fn call(&self, account: &Account, request: &ChatRequest)
		-> Result<CallOutcome, KiroError>;
	async fn stream(
		&self,
		account: &Account,
		request: &ChatRequest,
	) -> Result<EventReceiver, KiroError>;
}

/// Production backend: one [`KiroClient`] per invocation.
pub struct KiroBackend;

#[async_trait]
impl ChatBackend for KiroBackend {
	async fn call(
		&self,
		account: &Account,
		request: &ChatRequest,
	) -> Result<CallOutcome, KiroError> {
		KiroClient::new(account.clone(), None).call_api(request).await
	}

	async fn stream(
		&self,
		account: &Account,
		request: &ChatRequest,
	) -> Result<EventReceiver, KiroError> {
		KiroClient::new(account.clone(), None).stream_api(request).await
	}
}

/// Per-request inputs resolved by the route layer.
#[derive(Debug, Clone)]
pub struct ChatContext {
	pub request_id: String,
	pub group_id: Option<String>,
	/// Client-pinned account; disables failover.
	pub account_id: Option<String>,
	pub retry_budget: u32,
	pub endpoint: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
	/// Credential problem: mark error, switch account, retry.
	TokenExpired,
	/// Usage cap: mark exhausted, switch account.
	Quota,
	/// Credential revoked: ban, never retry.
	Banned,
	/// Everything else propagates.
	Fatal,
}

fn classify(err: &KiroError) -> FailureClass {
	match err {
		KiroError::TokenExpired => FailureClass::TokenExpired,
		KiroError::QuotaExhausted(_) => FailureClass::Quota,
		KiroError::Banned(_) => FailureClass::Banned,
		KiroError::RefreshFailed { .. } => FailureClass::TokenExpired,
		KiroError::Api { status, message } => match status {
			401 | 403 => FailureClass::TokenExpired,
			402 => FailureClass::Quota,
			_ if is_token_expiry_message(message) => FailureClass::TokenExpired,
			_ => FailureClass::Fatal,
		},
		_ => FailureClass::Fatal,
	}
}

/// Map a vendor failure onto the client-facing taxonomy.
pub fn kiro_error_to_api(err: &KiroError) -> ApiError {
	match err {
		KiroError::TokenExpired | KiroError::RefreshFailed { .. } => ApiError::new(
			ErrorCode::UpstreamUnavailable,
			"upstream authentication failed (TOKEN_EXPIRED)",
		),
		KiroError::QuotaExhausted(message) => {
			ApiError::new(ErrorCode::QuotaExhausted, message.clone())
		}
		KiroError::Banned(message) => ApiError::new(ErrorCode::AccountBanned, message.clone()),
		KiroError::Timeout | KiroError::Http(_) => {
			ApiError::new(ErrorCode::UpstreamUnavailable, err.to_string())
		}
		KiroError::Api { status, message } => match status {
			400 => ApiError::validation(message.clone()),
			429 => ApiError::new(ErrorCode::RateLimited, message.clone()),
			s if *s >= 500 => ApiError::new(ErrorCode::UpstreamUnavailable, message.clone()),
			_ => ApiError::internal(message.clone()),
		},
		KiroError::InvalidResponse(message) => ApiError::internal(message.clone()),
	}
}

pub struct Orchestrator {
	pool: Arc<AccountPool>,
	backend: Arc<dyn ChatBackend>,
}

impl Orchestrator {
	pub fn new(pool: Arc<AccountPool>, backend: Arc<dyn ChatBackend>) -> Self {
		Self { pool, backend }
	}

	pub fn pool(&self) -> &Arc<AccountPool> {
		&self.pool
	}

	/// Resolve the account: an explicit `account_id` must exist and belong
	/// to the caller's group; otherwise the pool picks.
	async fn resolve_account(&self, ctx: &ChatContext) -> Result<Account, ApiError> {
		if let Some(account_id) = &ctx.account_id {
			let account = self
				.pool
				.get_account_by_id(account_id)
				.await
				.map_err(pool_error_to_api)?
				.ok_or_else(|| ApiError::not_found(format!("account {account_id}")))?;

			if let Some(group) = &ctx.group_id {
				if account.group_id.as_deref() != Some(group.as_str()) {
					return Err(ApiError::new(
						ErrorCode::Forbidden,
						"account does not belong to the authorized group",
					));
				}
			}
			return Ok(account);
		}

		self
			.pool
			.get_next_account(ctx.group_id.as_deref())
			.await
			.map_err(pool_error_to_api)
	}

	/// Record the failure against the pool; returns whether switching to a
	/// different account may help.
	async fn handle_failure(&self, account: &Account, err: &KiroError) -> bool {
		let message = err.to_string();
		match classify(err) {
			FailureClass::TokenExpired => {
				if let Err(e) = self.pool.mark_account_error(&account.id, &message).await {
					tracing::warn!(account_id = %account.id, error = %e, "failed to mark account error");
				}
				true
			}
			FailureClass::Quota => {
				if let Err(e) = self
					.pool
					.mark_account_quota_exhausted(&account.id, &message)
					.await
				{
					tracing::warn!(account_id = %account.id, error = %e, "failed to mark quota exhaustion");
				}
				true
			}
			FailureClass::Banned => {
				if let Err(e) = self.pool.ban_account(&account.id, &message).await {
					tracing::warn!(account_id = %account.id, error = %e, "failed to ban account");
				}
				false
			}
			FailureClass::Fatal => false,
		}
	}

	async fn persist_rotated_tokens(&self, account: &Account, outcome: &CallOutcome) {
		if let Some(tokens) = &outcome.new_tokens {
			if let Err(e) = self
				.pool
				.update_account_token(
					&account.id,
					&tokens.access_token,
					tokens.refresh_token.as_deref(),
					tokens.expires_at,
				)
				.await
			{
				tracing::warn!(account_id = %account.id, error = %e, "failed to persist rotated tokens");
			}
		}
	}

	/// Non-streaming call with account failover.
	#[tracing::instrument(skip(self, request), fields(request_id = %ctx.request_id, endpoint = ctx.endpoint))]
	pub async fn call(
		&self,
		ctx: &ChatContext,
		request: &ChatRequest,
	) -> Result<(Account, CallOutcome), ApiError> {
		let mut attempts = 0u32;
		loop {
			let account = self.resolve_account(ctx).await?;

			match self.backend.call(&account, request).await {
				Ok(outcome) => {
					self.persist_rotated_tokens(&account, &outcome).await;
					let _ = self.pool.mark_account_success(&account.id).await;
					return Ok((account, outcome));
				}
				Err(err) => {
					attempts += 1;
					let switchable = self.handle_failure(&account, &err).await;
					if switchable && ctx.account_id.is_none() && attempts <= ctx.retry_budget {
						tracing::info!(
							request_id = %ctx.request_id,
							failed_account = %account.id,
							attempt = attempts,
							error = %err,
							"switching account and retrying"
						);
						continue;
					}
					return Err(kiro_error_to_api(&err));
				}
			}
		}
	}

	/// Open a stream with account failover on connection-time failures.
	#[tracing::instrument(skip(self, request), fields(request_id = %ctx.request_id, endpoint = ctx.endpoint))]
	pub async fn open_stream(
		&self,
		ctx: &ChatContext,
		request: &ChatRequest,
	) -> Result<(Account, EventReceiver), ApiError> {
		let mut attempts = 0u32;
		loop {
			let account = self.resolve_account(ctx).await?;

			match self.backend.stream(&account, request).await {
				Ok(receiver) => return Ok((account, receiver)),
				Err(err) => {
					attempts += 1;
					let switchable = self.handle_failure(&account, &err).await;
					if switchable && ctx.account_id.is_none() && attempts <= ctx.retry_budget {
						tracing::info!(
							request_id = %ctx.request_id,
							failed_account = %account.id,
							attempt = attempts,
							error = %err,
							"switching account and retrying stream open"
						);
						continue;
					}
					return Err(kiro_error_to_api(&err));
				}
			}
		}
	}
}

/// Protocol-specific SSE framing over vendor events.
pub trait EventEncoder: Send {
	fn encode(&mut self, event: &KiroEvent) -> Vec<String>;
	fn finish(&mut self) -> Vec<String>;
	fn encode_error(&mut self, error: &ApiError) -> Vec<String>;
}

/// Drive a vendor stream through an encoder into an SSE frame channel.
///
/// Handles token-rotation persistence, the single mid-stream account
/// switch, success/error marking, usage metering, and the request log
/// entry. The caller turns the returned receiver into the HTTP response
/// body; dropping it cancels the whole pipeline.
#[allow(clippy::too_many_arguments)]
pub fn drive_stream(
	orchestrator: Arc<Orchestrator>,
	ctx: ChatContext,
	request: ChatRequest,
	mut account: Account,
	mut receiver: EventReceiver,
	mut encoder: Box<dyn EventEncoder>,
	logger: RequestLogger,
	prompt_tokens: u32,
) -> mpsc::Receiver<String> {
	let (tx, rx) = mpsc::channel::<String>(64);

	tokio::spawn(async move {
		let started = std::time::Instant::now();
		let pool = Arc::clone(orchestrator.pool());
		let mut switched = false;
		let mut output_chars: usize = 0;
		let mut failure: Option<ApiError> = None;

		'session: loop {
			while let Some(item) = receiver.recv().await {
				match item {
					Ok(KiroEvent::TokenRefreshed {
						access_token,
						refresh_token,
						expires_at,
					}) => {
						if let Err(e) = pool
							.update_account_token(
								&account.id,
								&access_token,
								refresh_token.as_deref(),
								expires_at,
							)
							.await
						{
							tracing::warn!(account_id = %account.id, error = %e, "mid-stream token persistence failed");
						}
					}
					Ok(event) => {
						if let KiroEvent::Content(text) | KiroEvent::Thinking(text) = &event {
							output_chars += text.chars().count();
						}
						for frame in encoder.encode(&event) {
							if tx.send(frame).await.is_err() {
								tracing::debug!(request_id = %ctx.request_id, "client disconnected mid-stream");
								return;
							}
						}
					}
					Err(err) => {
						let class = classify(&err);
						if class == FailureClass::TokenExpired
							&& !switched && ctx.account_id.is_none()
						{
							// One-shot mid-stream account switch: replay the
							// request on a fresh account (S6 semantics).
							switched = true;
							let _ = pool.mark_account_error(&account.id, &err.to_string()).await;
							let retry_ctx = ChatContext {
								retry_budget: 0,
								..ctx.clone()
							};
							match orchestrator.open_stream(&retry_ctx, &request).await {
								Ok((next_account, next_receiver)) => {
									tracing::info!(
										request_id = %ctx.request_id,
										from = %account.id,
										to = %next_account.id,
										"mid-stream account switch"
									);
									account = next_account;
									receiver = next_receiver;
									continue 'session;
								}
								Err(api_err) => {
									failure = Some(api_err);
									break 'session;
								}
							}
						}
						let _ = orchestrator.handle_failure(&account, &err).await;
						failure = Some(kiro_error_to_api(&err));
						break 'session;
					}
				}
			}
			break 'session;
		}

		let completion_tokens = (output_chars as u32).div_ceil(4);
		let status = match failure {
			Some(api_err) => {
				for frame in encoder.encode_error(&api_err) {
					if tx.send(frame).await.is_err() {
						return;
					}
				}
				api_err.http_status()
			}
			None => {
				for frame in encoder.finish() {
					if tx.send(frame).await.is_err() {
						return;
					}
				}
				let _ = pool.mark_account_success(&account.id).await;
				// Usage is metered exactly once per served request, on the
				// account that completed it.
				pool.increment_api_call(
					&account.id,
					i64::from(prompt_tokens + completion_tokens),
				);
				200
			}
		};

		logger.log(RequestLogEntry {
			request_id: ctx.request_id.clone(),
			group_id: ctx.group_id.clone(),
			account_id: Some(account.id.clone()),
			model: request.model.clone(),
			endpoint: ctx.endpoint.to_string(),
			status,
			latency_ms: started.elapsed().as_millis() as i64,
			prompt_tokens: i64::from(prompt_tokens),
			completion_tokens: i64::from(completion_tokens),
			error: None,
		});
	});

	rx
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Mutex as StdMutex;
	use std::time::Duration;

	use weft_core::config::{ActivePoolConfig, AlertConfig};
	use weft_db::testing::{test_account, FakeCursor, FakeStore};
	use weft_db::{AccountStore, CursorStore};

	fn far_future() -> i64 {
		weft_core::now_ms() + 30 * 24 * 60 * 60 * 1000
	}

	fn chat_request() -> ChatRequest {
		ChatRequest {
			model: "claude-sonnet-4-5".to_string(),
			messages: vec![weft_core::ChatMessage::user("hi")],
			system: None,
			tools: vec![],
			thinking_budget: None,
		}
	}

	fn context(budget: u32) -> ChatContext {
		ChatContext {
			request_id: "req_test".to_string(),
			group_id: None,
			account_id: None,
			retry_budget: budget,
			endpoint: "/v1/chat/completions",
		}
	}

	/// Backend that fails scripted accounts and succeeds on the rest.
	struct ScriptedBackend {
		failures: StdMutex<Vec<(String, KiroError)>>,
		calls: AtomicU32,
	}

	impl ScriptedBackend {
		fn new(failures: Vec<(&str, KiroError)>) -> Self {
			Self {
				failures: StdMutex::new(
					failures
						.into_iter()
						.map(|(id, e)| (id.to_string(), e))
						.collect(),
				),
				calls: AtomicU32::new(0),
			}
		}
	}

	#[async_trait]
	impl ChatBackend for ScriptedBackend {
		async fn call(
			&self,
			account: &Account,
			_request: &ChatRequest,
		) -> Result<CallOutcome, KiroError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			let mut failures = self.failures.lock().unwrap();
			if let Some(pos) = failures.iter().position(|(id, _)| id == &account.id) {
				let (_, err) = failures.remove(pos);
				return Err(err);
			}
			Ok(CallOutcome {
				content: format!("hello from {}", account.id),
				content_blocks: vec![weft_core::ContentBlock::text("hello")],
				tool_uses: vec![],
				context_usage: None,
				new_tokens: None,
			})
		}

		async fn stream(
			&self,
			account: &Account,
			request: &ChatRequest,
		) -> Result<EventReceiver, KiroError> {
			// Reuse call() to decide success, then emit one content event.
			let outcome = self.call(account, request).await?;
			let (tx, rx) = mpsc::channel(4);
			let content = outcome.content;
			tokio::spawn(async move {
				let _ = tx.send(Ok(KiroEvent::Content(content))).await;
			});
			Ok(rx)
		}
	}

	fn build(
		accounts: Vec<Account>,
		backend: Arc<ScriptedBackend>,
	) -> (Arc<Orchestrator>, Arc<FakeStore>) {
		let store = Arc::new(FakeStore::with_accounts(accounts));
		let cursor = Arc::new(FakeCursor::default());
		let pool = Arc::new(AccountPool::with_cache_ttl(
			Arc::clone(&store) as Arc<dyn AccountStore>,
			cursor as Arc<dyn CursorStore>,
			ActivePoolConfig {
				enabled: false,
				..ActivePoolConfig::default()
			},
			AlertConfig::default(),
			Duration::ZERO,
		));
		(
			Arc::new(Orchestrator::new(pool, backend)),
			store,
		)
	}

	#[tokio::test]
	async fn success_path_marks_nothing() {
		let backend = Arc::new(ScriptedBackend::new(vec![]));
		let (orch, store) = build(vec![test_account("a1", far_future())], Arc::clone(&backend));

		let (account, outcome) = orch.call(&context(5), &chat_request()).await.unwrap();
		assert_eq!(account.id, "a1");
		assert!(outcome.content.contains("a1"));
		assert!(store.status_calls.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn token_expired_switches_account_once() {
		let backend = Arc::new(ScriptedBackend::new(vec![(
			"a1",
			KiroError::TokenExpired,
		)]));
		let (orch, store) = build(
			vec![test_account("a1", far_future()), test_account("a2", far_future())],
			Arc::clone(&backend),
		);

		let (account, _) = orch.call(&context(5), &chat_request()).await.unwrap();
		assert_eq!(account.id, "a2");
		assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
		// The failed account was marked at the store level (tier disabled).
		let calls = store.status_calls.lock().unwrap();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].id, "a1");
	}

	#[tokio::test]
	async fn quota_exhaustion_switches_and_records() {
		let backend = Arc::new(ScriptedBackend::new(vec![(
			"a1",
			KiroError::QuotaExhausted("HTTP 402".to_string()),
		)]));
		let (orch, store) = build(
			vec![test_account("a1", far_future()), test_account("a2", far_future())],
			Arc::clone(&backend),
		);

		let (account, _) = orch.call(&context(5), &chat_request()).await.unwrap();
		assert_eq!(account.id, "a2");
		assert_eq!(store.quota_calls.lock().unwrap().as_slice(), ["a1"]);
	}

	#[tokio::test]
	async fn banned_account_fails_without_retry() {
		let backend = Arc::new(ScriptedBackend::new(vec![(
			"a1",
			KiroError::Banned("BANNED:TEMPORARILY_SUSPENDED".to_string()),
		)]));
		let (orch, store) = build(
			vec![test_account("a1", far_future()), test_account("a2", far_future())],
			Arc::clone(&backend),
		);

		let err = orch.call(&context(5), &chat_request()).await.unwrap_err();
		assert_eq!(err.http_status(), 403);
		assert_eq!(backend.calls.load(Ordering::SeqCst), 1, "no retry after ban");
		let calls = store.status_calls.lock().unwrap();
		assert_eq!(calls[0].status, weft_core::AccountStatus::Banned);
	}

	#[tokio::test]
	async fn pinned_account_disables_failover() {
		let backend = Arc::new(ScriptedBackend::new(vec![(
			"a1",
			KiroError::TokenExpired,
		)]));
		let (orch, _) = build(
			vec![test_account("a1", far_future()), test_account("a2", far_future())],
			Arc::clone(&backend),
		);

		let mut ctx = context(5);
		ctx.account_id = Some("a1".to_string());
		let err = orch.call(&ctx, &chat_request()).await.unwrap_err();
		assert_eq!(err.http_status(), 503);
		assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn pinned_account_must_belong_to_group() {
		let backend = Arc::new(ScriptedBackend::new(vec![]));
		let mut account = test_account("a1", far_future());
		account.group_id = Some("g-other".to_string());
		let (orch, _) = build(vec![account], backend);

		let mut ctx = context(5);
		ctx.account_id = Some("a1".to_string());
		ctx.group_id = Some("g-mine".to_string());
		let err = orch.call(&ctx, &chat_request()).await.unwrap_err();
		assert_eq!(err.http_status(), 403);
	}

	#[tokio::test]
	async fn retry_budget_bounds_switching() {
		// Three accounts, all expired tokens at the vendor, budget 1:
		// two calls total, then the error propagates.
		let backend = Arc::new(ScriptedBackend::new(vec![
			("a1", KiroError::TokenExpired),
			("a2", KiroError::TokenExpired),
			("a3", KiroError::TokenExpired),
		]));
		let (orch, _) = build(
			vec![
				test_account("a1", far_future()),
				test_account("a2", far_future()),
				test_account("a3", far_future()),
			],
			Arc::clone(&backend),
		);

		let err = orch.call(&context(1), &chat_request()).await.unwrap_err();
		assert_eq!(err.http_status(), 503);
		assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn no_accounts_is_503() {
		let backend = Arc::new(ScriptedBackend::new(vec![]));
		let (orch, _) = build(vec![], backend);
		let err = orch.call(&context(5), &chat_request()).await.unwrap_err();
		assert_eq!(err.http_status(), 503);
	}

	/// Minimal encoder for stream-driver tests.
	struct PlainEncoder;

	impl EventEncoder for PlainEncoder {
		fn encode(&mut self, event: &KiroEvent) -> Vec<String> {
			match event {
				KiroEvent::Content(text) => vec![format!("data: {text}\n\n")],
				_ => vec![],
			}
		}
		fn finish(&mut self) -> Vec<String> {
			vec!["data: [DONE]\n\n".to_string()]
		}
		fn encode_error(&mut self, error: &ApiError) -> Vec<String> {
			vec![format!("data: error {}\n\n", error.message)]
		}
	}

	#[tokio::test]
	async fn mid_stream_token_expiry_switches_and_continues() {
		let backend = Arc::new(ScriptedBackend::new(vec![]));
		let (orch, store) = build(
			vec![test_account("a1", far_future()), test_account("b2", far_future())],
			backend,
		);
		let (logger, _handle) = crate::request_log::test_logger();

		// Hand-build a first stream that emits "hello" then dies with a 403.
		let (tx, rx) = mpsc::channel(4);
		tokio::spawn(async move {
			let _ = tx.send(Ok(KiroEvent::Content("hello".to_string()))).await;
			let _ = tx.send(Err(KiroError::TokenExpired)).await;
		});

		let account = store.get_account("a1").await.unwrap().unwrap();
		let mut frames_rx = drive_stream(
			Arc::clone(&orch),
			context(5),
			chat_request(),
			account,
			rx,
			Box::new(PlainEncoder),
			logger,
			1,
		);

		let mut frames = Vec::new();
		while let Some(frame) = frames_rx.recv().await {
			frames.push(frame);
		}

		// Prefix from the first account, replacement content, clean finish.
		assert_eq!(frames[0], "data: hello\n\n");
		assert!(frames.iter().any(|f| f.contains("hello from")));
		assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");

		// a1 was marked errored at the store level.
		{
			let calls = store.status_calls.lock().unwrap();
			assert!(calls.iter().any(|c| c.id == "a1"));
		}

		// Usage is metered exactly once, on the account that finished the
		// stream (the increment is fire-and-forget, give it a beat).
		tokio::time::sleep(Duration::from_millis(50)).await;
		let survivor = store.get_account("b2").await.unwrap().unwrap();
		assert_eq!(survivor.api_call_count, 1);
		assert!(survivor.api_total_tokens > 0);
		let failed = store.get_account("a1").await.unwrap().unwrap();
		assert_eq!(failed.api_call_count, 0, "failed attempts are not metered");
	}

	#[tokio::test]
	async fn fatal_stream_error_emits_error_frame() {
		let backend = Arc::new(ScriptedBackend::new(vec![]));
		let (orch, store) = build(vec![test_account("a1", far_future())], backend);
		let (logger, _handle) = crate::request_log::test_logger();

		let (tx, rx) = mpsc::channel(4);
		tokio::spawn(async move {
			let _ = tx
				.send(Err(KiroError::Http("connection reset".to_string())))
				.await;
		});

		let account = store.get_account("a1").await.unwrap().unwrap();
		let mut frames_rx = drive_stream(
			orch,
			context(5),
			chat_request(),
			account,
			rx,
			Box::new(PlainEncoder),
			logger,
			1,
		);

		let mut frames = Vec::new();
		while let Some(frame) = frames_rx.recv().await {
			frames.push(frame);
		}
		assert_eq!(frames.len(), 1);
		assert!(frames[0].starts_with("data: error"));
	}
}
