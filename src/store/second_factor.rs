// Copyright (C) 2025 Matías Salinas (support@fenden.com)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hyper::http::header::AUTHORIZATION;
use hyper::http::HeaderValue;
use hyper::HeaderMap;
use once_cell::sync::Lazy;
use tokio::task;
use tracing::{debug, info};

use crate::store::REAP_INTERVAL;
use crate::util::auth_prefix;

/// A skip-2FA token obtained from an out-of-band exchange, valid until
/// `expires_at`.
#[derive(Clone)]
pub struct SecondFactor {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Per-principal map of skip-2FA tokens, keyed by the normalized principal.
pub static TWO_FACTOR_STORE: Lazy<DashMap<String, SecondFactor>> = Lazy::new(DashMap::new);

/// Normalizes an `Authorization` header to the principal it identifies.
/// `Bearer <token>` yields the token; `Basic <b64>` whose decoded value is
/// `":<token>"` (empty user) yields the token; anything else is used
/// verbatim.
pub fn normalize_principal(auth: &str) -> String {
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return token.to_string();
    }

    if let Some(encoded) = auth.strip_prefix("Basic ") {
        if let Ok(decoded) = STANDARD.decode(encoded) {
            if let Ok(credentials) = String::from_utf8(decoded) {
                if let Some(token) = credentials.strip_prefix(':') {
                    return token.to_string();
                }
            }
        }
    }

    auth.to_string()
}

/// True when an `Authorization` value carries real credentials. Clients
/// without stored credentials send the base64 of `":"` as a placeholder,
/// which must not be exchanged.
pub fn is_meaningful(auth: &str) -> bool {
    if auth.is_empty() {
        return false;
    }

    let payload = auth.strip_prefix("Basic ").unwrap_or(auth);
    if let Ok(decoded) = STANDARD.decode(payload) {
        if decoded == b":" {
            return false;
        }
    }

    true
}

/// Records a freshly exchanged token for a principal.
pub fn put(principal: String, token: String, expires_in: i64) {
    debug!(
        "[2fa] storing token for {}... [expires_in={expires_in}]",
        auth_prefix(&principal)
    );

    TWO_FACTOR_STORE.insert(
        principal,
        SecondFactor {
            token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        },
    );
}

/// Rewrites `Authorization` to `Bearer <token>` when an unexpired token is
/// held for the request's principal. An expired entry observed here is
/// deleted on the spot.
pub fn try_stored(headers: &mut HeaderMap) -> bool {
    let Some(auth) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return false;
    };

    let principal = normalize_principal(&auth);
    if principal.is_empty() {
        return false;
    }

    let stored = match TWO_FACTOR_STORE.get(&principal) {
        Some(entry) => entry.value().clone(),
        None => return false,
    };

    if stored.expires_at <= Utc::now() {
        TWO_FACTOR_STORE.remove(&principal);
        debug!(
            "[2fa] discarded expired token for {}...",
            auth_prefix(&principal)
        );
        return false;
    }

    match HeaderValue::from_str(&format!("Bearer {}", stored.token)) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
            debug!(
                "[2fa] elevating request for {}... with stored token",
                auth_prefix(&principal)
            );
            true
        }
        Err(_) => false,
    }
}

/// Returns the stored skip-2FA token for a bare principal token, when one is
/// held and unexpired.
pub fn upgrade_token(token: &str) -> Option<String> {
    let principal = normalize_principal(token);

    let stored = match TWO_FACTOR_STORE.get(&principal) {
        Some(entry) => entry.value().clone(),
        None => return None,
    };

    if stored.expires_at <= Utc::now() {
        TWO_FACTOR_STORE.remove(&principal);
        return None;
    }

    Some(stored.token)
}

/// Removes every stored token.
pub fn clear() {
    let count = TWO_FACTOR_STORE.len();
    TWO_FACTOR_STORE.clear();
    info!("[2fa] cleared {count} entries");
}

pub fn len() -> usize {
    TWO_FACTOR_STORE.len()
}

/// Drops entries whose expiry has passed, with the same collect-then-delete
/// shape as the response cache reaper.
pub fn reap() {
    let now = Utc::now();
    let total = TWO_FACTOR_STORE.len();

    let expired: Vec<String> = TWO_FACTOR_STORE
        .iter()
        .filter(|entry| entry.expires_at < now)
        .map(|entry| entry.key().clone())
        .collect();

    for key in &expired {
        TWO_FACTOR_STORE.remove(key);
    }

    info!("[2fa] Reaped {} key(s) of {}", expired.len(), total);
}

/// Launches the periodic reap loop.
pub fn start_reaper() {
    task::spawn(async {
        loop {
            tokio::time::sleep(REAP_INTERVAL).await;
            reap();
        }
    });
}
