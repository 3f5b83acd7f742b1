// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Kiro vendor client.
//!
//! Translates normalized chat requests into the vendor's conversation-state
//! wire format, parses the concatenated-JSON event stream it answers with,
//! lifts `<thinking>` spans into structured events, and refreshes OAuth
//! credentials in-band on the first 403.

pub mod auth;
pub mod client;
pub mod error;
pub mod events;
pub mod headers;
pub mod http;
pub mod model;
pub mod request;
pub mod thinking;

pub use auth::{refresh_credentials, RefreshedTokens};
pub use client::{parse_response, CallOutcome, EventReceiver, KiroClient};
pub use error::{is_credential_invalidation, is_token_expiry_message, KiroError};
pub use events::{EventStreamParser, KiroEvent};
pub use headers::{chat_endpoint, chat_headers};
pub use model::{is_supported, vendor_model_id, DEFAULT_MODEL, SUPPORTED_MODELS};
pub use request::{build_vendor_request, RequestOptions, VendorRequest, VendorToolUse};
pub use thinking::{extract_thinking_from_content, ThinkingSplitter};
