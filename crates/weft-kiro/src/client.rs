// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The Kiro vendor client.
//!
//! One client per `(account, request)` use. Both entry points attempt a
//! single in-band token refresh on the first 403 and surface rotated
//! credentials so the orchestrator can persist them; a 403 that survives
//! the refresh is a hard `TokenExpired`. Streaming feeds a bounded channel
//! from a reader task, so dropping the consumer cancels the upstream read.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use weft_core::chat::ChatRequest;
use weft_core::{Account, ContentBlock};

use crate::auth::{refresh_credentials, RefreshedTokens};
use crate::error::KiroError;
use crate::events::{EventStreamParser, KiroEvent};
use crate::headers::{chat_endpoint, chat_headers};
use crate::http::vendor_client;
use crate::request::{build_vendor_request, RequestOptions, VendorRequest, VendorToolUse};
use crate::thinking::{extract_thinking_from_content, ThinkingSplitter};

/// Events delivered to the stream consumer.
pub type EventReceiver = mpsc::Receiver<Result<KiroEvent, KiroError>>;

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Result of a non-streaming call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
	/// Visible text with thinking spans removed.
	pub content: String,
	/// Ordered typed blocks, thinking included.
	pub content_blocks: Vec<ContentBlock>,
	pub tool_uses: Vec<VendorToolUse>,
	pub context_usage: Option<f64>,
	/// Set when an in-band refresh rotated the credentials.
	pub new_tokens: Option<RefreshedTokens>,
}

pub struct KiroClient {
	http: reqwest::Client,
	account: Account,
	profile_arn: Option<String>,
	max_attempts: u32,
}

impl KiroClient {
	pub fn new(account: Account, profile_arn: Option<String>) -> Self {
		Self {
			http: vendor_client(),
			account,
			profile_arn,
			max_attempts: 3,
		}
	}

	pub fn account_id(&self) -> &str {
		&self.account.id
	}

	fn vendor_request(&self, request: &ChatRequest) -> VendorRequest {
		build_vendor_request(
			request,
			&RequestOptions {
				conversation_id: Uuid::new_v4().to_string(),
				profile_arn: self.profile_arn.clone(),
			},
		)
	}

	async fn send(
		&self,
		vendor_request: &VendorRequest,
		access_token: &str,
	) -> Result<reqwest::Response, KiroError> {
		let url = chat_endpoint(
			self.account.header.header_version,
			&self.account.credentials.region,
		);
		let mut builder = self.http.post(&url).json(vendor_request);
		for (name, value) in chat_headers(&self.account.header, access_token, self.max_attempts) {
			builder = builder.header(name, value);
		}

		let response = builder.send().await?;
		let status = response.status();

		if status.is_success() {
			return Ok(response);
		}

		let code = status.as_u16();
		let message = response.text().await.unwrap_or_default();
		tracing::debug!(status = code, message = %message, "vendor call failed");
		match code {
			401 | 403 => Err(KiroError::TokenExpired),
			402 => Err(KiroError::QuotaExhausted(message)),
			_ if crate::error::is_credential_invalidation(&message) => {
				Err(KiroError::Banned(message))
			}
			_ => Err(KiroError::Api {
				status: code,
				message,
			}),
		}
	}

	/// Send with a single refresh-and-replay on the first 403.
	async fn send_with_refresh(
		&self,
		vendor_request: &VendorRequest,
	) -> Result<(reqwest::Response, Option<RefreshedTokens>), KiroError> {
		match self
			.send(vendor_request, &self.account.credentials.access_token)
			.await
		{
			Ok(response) => Ok((response, None)),
			Err(KiroError::TokenExpired) => {
				tracing::info!(account_id = %self.account.id, "403 from vendor, refreshing token once");
				let refreshed = refresh_credentials(&self.http, &self.account.credentials).await?;
				let response = self.send(vendor_request, &refreshed.access_token).await?;
				Ok((response, Some(refreshed)))
			}
			Err(err) => Err(err),
		}
	}

	/// Single-shot call: consume the whole response and parse it.
	#[tracing::instrument(skip(self, request), fields(account_id = %self.account.id, model = %request.model))]
	pub async fn call_api(&self, request: &ChatRequest) -> Result<CallOutcome, KiroError> {
		let vendor_request = self.vendor_request(request);
		let (response, new_tokens) = self.send_with_refresh(&vendor_request).await?;

		let body = response.text().await.map_err(KiroError::from)?;
		let mut outcome = parse_response(&body);
		outcome.new_tokens = new_tokens;
		Ok(outcome)
	}

	/// Streaming call: events arrive on a bounded channel.
	///
	/// The refresh-and-replay happens before any event is delivered; a
	/// mid-stream 403 is unrecoverable at this layer and surfaces as a
	/// stream error for the orchestrator to handle with an account switch.
	#[tracing::instrument(skip(self, request), fields(account_id = %self.account.id, model = %request.model))]
	pub async fn stream_api(&self, request: &ChatRequest) -> Result<EventReceiver, KiroError> {
		let vendor_request = self.vendor_request(request);
		let (response, new_tokens) = self.send_with_refresh(&vendor_request).await?;

		let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

		if let Some(tokens) = new_tokens {
			// Deliver the rotation before any content so the orchestrator
			// can persist it even if the stream dies early.
			let _ = tx
				.send(Ok(KiroEvent::TokenRefreshed {
					access_token: tokens.access_token.clone(),
					refresh_token: tokens.refresh_token.clone(),
					expires_at: tokens.expires_at,
				}))
				.await;
		}

		tokio::spawn(async move {
			let stream = Box::pin(response.bytes_stream());
			pump_stream(stream, tx).await;
		});

		Ok(rx)
	}
}

/// Drive the byte stream through the payload parser and thinking splitter,
/// forwarding events until the stream or the consumer goes away.
pub(crate) async fn pump_stream<S, E>(mut stream: S, tx: mpsc::Sender<Result<KiroEvent, KiroError>>)
where
	S: Stream<Item = Result<Bytes, E>> + Unpin,
	E: std::fmt::Display,
{
	let mut parser = EventStreamParser::new();
	let mut splitter = ThinkingSplitter::new();

	while let Some(chunk) = stream.next().await {
		match chunk {
			Ok(bytes) => {
				let text = String::from_utf8_lossy(&bytes);
				for event in parser.feed(&text) {
					for expanded in expand_event(event, &mut splitter) {
						if tx.send(Ok(expanded)).await.is_err() {
							// Consumer dropped: abandon the upstream read.
							tracing::debug!("stream consumer gone, aborting vendor read");
							return;
						}
					}
				}
			}
			Err(e) => {
				let _ = tx.send(Err(KiroError::Http(e.to_string()))).await;
				return;
			}
		}
	}

	for event in parser.finish() {
		for expanded in expand_event(event, &mut splitter) {
			if tx.send(Ok(expanded)).await.is_err() {
				return;
			}
		}
	}
	for event in splitter.finish() {
		if tx.send(Ok(event)).await.is_err() {
			return;
		}
	}
}

/// Route content through the thinking splitter; pass everything else.
fn expand_event(event: KiroEvent, splitter: &mut ThinkingSplitter) -> Vec<KiroEvent> {
	match event {
		KiroEvent::Content(content) => splitter.split(&content),
		other => vec![other],
	}
}

/// Batch-parse a full response body.
pub fn parse_response(raw: &str) -> CallOutcome {
	let mut parser = EventStreamParser::new();
	let mut events = parser.feed(raw);
	events.extend(parser.finish());

	let mut full_text = String::new();
	let mut tool_uses = Vec::new();
	let mut context_usage = None;

	for event in events {
		match event {
			KiroEvent::Content(content) => full_text.push_str(&content),
			KiroEvent::ToolUseStop {
				tool_use_id,
				name,
				input,
			} => tool_uses.push(VendorToolUse {
				tool_use_id,
				name,
				input,
			}),
			KiroEvent::ContextUsage(pct) => context_usage = Some(pct),
			_ => {}
		}
	}

	let mut content_blocks = extract_thinking_from_content(&full_text);
	for tool in &tool_uses {
		content_blocks.push(ContentBlock::ToolUse {
			id: tool.tool_use_id.clone(),
			name: tool.name.clone(),
			input: tool.input.clone(),
		});
	}

	let content: String = content_blocks
		.iter()
		.filter_map(|b| match b {
			ContentBlock::Text { text } => Some(text.as_str()),
			_ => None,
		})
		.collect();

	CallOutcome {
		content,
		content_blocks,
		tool_uses,
		context_usage,
		new_tokens: None,
	}
}
