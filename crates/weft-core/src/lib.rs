// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared domain model for the Weft gateway.
//!
//! This crate holds the types every other crate speaks: upstream accounts
//! and their credential material, groups/tags/settings, normalized chat
//! messages, the error taxonomy, and environment configuration.

pub mod account;
pub mod chat;
pub mod config;
pub mod error;
pub mod group;
pub mod time;

pub use account::{
	Account, AccountStatus, AuthMethod, Credentials, HeaderParams, HeaderVersion, Idp, Usage,
};
pub use chat::{ChatMessage, ChatRequest, ContentBlock, ImageSource, Role, ToolSpec};
pub use config::Config;
pub use error::{new_request_id, ApiError, ErrorCode};
pub use group::{Group, MachineIdBinding, MachineIdHistoryEntry, Setting, SettingValue, Tag};
pub use time::now_ms;
