// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Request authentication.
//!
//! Two credential kinds: bearer API keys on the proxy surface (the
//! configured default key grants every account, a group's key scopes the
//! request to that group) and a JWT cookie for the management surface.
//! Key → group lookups are cached for 60 seconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use weft_core::Config;
use weft_db::GroupStore;

use crate::error::{AuthFailure, ServerError};

/// Session cookie name.
pub const AUTH_COOKIE: &str = "auth_token";

/// Session lifetime: 30 days.
pub const SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

const GROUP_KEY_CACHE_TTL: Duration = Duration::from_secs(60);

/// What a caller is allowed to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScope {
	/// Default key or admin session: every account.
	All,
	/// Group-scoped API key.
	Group(String),
}

impl AuthScope {
	pub fn group_id(&self) -> Option<&str> {
		match self {
			AuthScope::All => None,
			AuthScope::Group(id) => Some(id),
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
	sub: String,
	exp: i64,
	iat: i64,
}

struct CachedScope {
	group_id: Option<String>,
	cached_at: Instant,
}

pub struct Authenticator {
	default_api_key: Option<String>,
	web_login_password: Option<String>,
	electron_auth_secret: Option<String>,
	jwt_secret: String,
	groups: Arc<dyn GroupStore>,
	key_cache: Mutex<HashMap<String, CachedScope>>,
}

impl Authenticator {
	pub fn new(config: &Config, groups: Arc<dyn GroupStore>) -> Self {
		Self {
			default_api_key: config.default_api_key.clone(),
			web_login_password: config.web_login_password.clone(),
			electron_auth_secret: config.electron_auth_secret.clone(),
			jwt_secret: config.jwt_secret.clone(),
			groups,
			key_cache: Mutex::new(HashMap::new()),
		}
	}

	/// Authenticate a proxy-surface request: bearer key or session cookie.
	pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthScope, ServerError> {
		match bearer_token(headers) {
			Ok(Some(key)) => self.resolve_api_key(&key).await,
			Ok(None) => {
				// No Authorization header: a valid session cookie still works
				// for the web client.
				if self.has_valid_session(headers) {
					Ok(AuthScope::All)
				} else {
					Err(ServerError::Auth(AuthFailure::MissingAuthorization))
				}
			}
			Err(failure) => Err(ServerError::Auth(failure)),
		}
	}

	/// Authenticate a management-surface request: session cookie or the
	/// desktop client's shared secret.
	pub fn require_admin(&self, headers: &HeaderMap) -> Result<(), ServerError> {
		if self.has_valid_session(headers) {
			return Ok(());
		}
		if let Some(secret) = &self.electron_auth_secret {
			if let Some(value) = headers.get("x-electron-auth").and_then(|v| v.to_str().ok()) {
				if constant_time_eq(value, secret) {
					return Ok(());
				}
			}
		}
		// The default API key doubles as an admin credential for tooling.
		if let (Ok(Some(key)), Some(default)) = (bearer_token(headers), &self.default_api_key) {
			if constant_time_eq(&key, default) {
				return Ok(());
			}
		}
		Err(ServerError::Auth(AuthFailure::MissingAuthorization))
	}

	async fn resolve_api_key(&self, key: &str) -> Result<AuthScope, ServerError> {
		if let Some(default) = &self.default_api_key {
			if constant_time_eq(key, default) {
				return Ok(AuthScope::All);
			}
		}

		{
			let cache = self.key_cache.lock().await;
			if let Some(entry) = cache.get(key) {
				if entry.cached_at.elapsed() < GROUP_KEY_CACHE_TTL {
					return match &entry.group_id {
						Some(id) => Ok(AuthScope::Group(id.clone())),
						None => Err(ServerError::Auth(AuthFailure::InvalidApiKey)),
					};
				}
			}
		}

		let group = self
			.groups
			.find_by_api_key(key)
			.await
			.map_err(ServerError::from)?;
		let group_id = group.as_ref().map(|g| g.id.clone());

		self.key_cache.lock().await.insert(
			key.to_string(),
			CachedScope {
				group_id: group_id.clone(),
				cached_at: Instant::now(),
			},
		);

		match group_id {
			Some(id) => Ok(AuthScope::Group(id)),
			None => Err(ServerError::Auth(AuthFailure::InvalidApiKey)),
		}
	}

	fn has_valid_session(&self, headers: &HeaderMap) -> bool {
		session_cookie(headers)
			.map(|token| self.verify_session(&token))
			.unwrap_or(false)
	}

	/// Check the password and mint a session token.
	pub fn login(&self, password: &str) -> Result<String, ServerError> {
		let expected = self
			.web_login_password
			.as_deref()
			.ok_or(ServerError::Auth(AuthFailure::InvalidApiKey))?;
		if !constant_time_eq(password, expected) {
			return Err(ServerError::Auth(AuthFailure::InvalidApiKey));
		}
		Ok(self.issue_session())
	}

	pub fn issue_session(&self) -> String {
		let now = weft_core::now_ms() / 1000;
		let claims = Claims {
			sub: "admin".to_string(),
			iat: now,
			exp: now + SESSION_TTL_SECS,
		};
		encode(
			&Header::default(),
			&claims,
			&EncodingKey::from_secret(self.jwt_secret.as_bytes()),
		)
		.unwrap_or_default()
	}

	pub fn verify_session(&self, token: &str) -> bool {
		decode::<Claims>(
			token,
			&DecodingKey::from_secret(self.jwt_secret.as_bytes()),
			&Validation::default(),
		)
		.is_ok()
	}

	/// `Set-Cookie` value establishing the session.
	pub fn session_cookie(&self, token: &str) -> String {
		format!(
			"{AUTH_COOKIE}={token}; HttpOnly; Path=/; Max-Age={SESSION_TTL_SECS}; SameSite=Lax"
		)
	}

	/// `Set-Cookie` value clearing the session.
	pub fn clear_cookie(&self) -> String {
		format!("{AUTH_COOKIE}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax")
	}
}

/// Extract the bearer token, distinguishing absent from malformed.
fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, AuthFailure> {
	let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
		return Ok(None);
	};
	let value = value
		.to_str()
		.map_err(|_| AuthFailure::InvalidAuthorizationFormat)?;
	let token = value
		.strip_prefix("Bearer ")
		.or_else(|| value.strip_prefix("bearer "))
		.ok_or(AuthFailure::InvalidAuthorizationFormat)?;
	if token.is_empty() {
		return Err(AuthFailure::InvalidAuthorizationFormat);
	}
	Ok(Some(token.to_string()))
}

/// The session cookie value, if present.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
	let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
	cookies.split(';').find_map(|pair| {
		let (name, value) = pair.trim().split_once('=')?;
		(name == AUTH_COOKIE).then(|| value.to_string())
	})
}

/// Length-independent comparison via digest equality.
fn constant_time_eq(a: &str, b: &str) -> bool {
	Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}
