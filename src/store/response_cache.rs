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

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hyper::http::header::{AUTHORIZATION, VARY};
use hyper::Method;
use metrics::counter;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tokio::task;
use tracing::{debug, info};

use crate::pipeline::{BufferedResponse, ProxyRequest};
use crate::store::REAP_INTERVAL;
use crate::util::{auth_prefix, scrub_url};

/// Headers describing response content. Only these are retained with a
/// cached body; everything else is whatever the upstream sent alongside the
/// 304 at replay time.
pub const CONTENT_HEADERS: [&str; 4] = ["Content-Encoding", "Content-Length", "Content-Type", "Status"];

/// Header letting an administrator act on behalf of another account. Part of
/// the cache key so that sudo'd responses never leak across principals.
pub const SUDO_HEADER: &str = "X-Heroku-Sudo-User";

/// Cached entries live for one hour after insert.
const ENTRY_TTL_MINUTES: i64 = 60;

/// A response cached for conditional-GET replay. Immutable after insert.
#[derive(Clone)]
pub struct CachedResponse {
    pub body: Bytes,
    pub etag: String,
    pub expires_at: DateTime<Utc>,
    pub headers: Vec<(String, String)>,
}

/// Global keyed store of conditional-GET artifacts. DashMap shards its
/// locks, so reads never contend with unrelated writes.
pub static RESPONSE_CACHE: Lazy<DashMap<String, CachedResponse>> = Lazy::new(DashMap::new);

/// Builds the composed cache identity for a request, then hashes it. The
/// composition covers the raw authorization, the sudo override, method,
/// host, URL with query, and the request-side Vary resolution, so entries
/// are never shared across principals or header variants.
pub fn cache_key(req: &ProxyRequest) -> String {
    let auth = req.header_str(AUTHORIZATION.as_str()).unwrap_or("");
    let sudo = req.header_str(SUDO_HEADER).unwrap_or("");
    let source = format!(
        "{auth}:{sudo}:{}:{}:{}:{}",
        req.method,
        req.host,
        req.url,
        vary_component(req)
    );
    hash_key(&source)
}

/// SHA-256 hex digest of a composed key string.
pub fn hash_key(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolves the request's `Vary` header against the request's own headers,
/// pairing each listed name with the value this client sent for it. This is
/// an approximation of origin-server Vary semantics, not a full
/// implementation.
fn vary_component(req: &ProxyRequest) -> String {
    let Some(vary) = req.header_str(VARY.as_str()) else {
        return String::new();
    };

    vary.split(',')
        .map(|name| {
            let name = name.trim();
            format!("{}:{}", name, req.header_str(name).unwrap_or(""))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Looks up the cached response for a request. Only authorized GETs are ever
/// cached; a request varying on `*` never consults the store. Entries past
/// their expiry are still returned — expiry is a storage invariant enforced
/// by the reaper, not a read filter.
pub fn get(req: &ProxyRequest) -> Option<CachedResponse> {
    if req.method != Method::GET {
        return None;
    }

    let auth = req.header_str(AUTHORIZATION.as_str()).unwrap_or("");
    if auth.is_empty() {
        return None;
    }

    if req.header_str(VARY.as_str()) == Some("*") {
        return None;
    }

    let target = format!("{}{}", req.host, scrub_url(&req.url));
    match RESPONSE_CACHE.get(&cache_key(req)) {
        Some(entry) => {
            debug!(
                "[cache] hit: {}... {} [etag={}]",
                auth_prefix(auth),
                target,
                entry.etag
            );
            counter!("heroku_agent_cache_hits_total").increment(1);
            Some(entry.value().clone())
        }
        None => {
            debug!("[cache] miss: {}... {}", auth_prefix(auth), target);
            counter!("heroku_agent_cache_misses_total").increment(1);
            None
        }
    }
}

/// Stores a produced response when it is cacheable: a successful GET with a
/// non-empty authorization and a non-empty ETag, not varying on `*`.
pub fn set(req: &ProxyRequest, response: &BufferedResponse) {
    if req.method != Method::GET {
        return;
    }

    let auth = req.header_str(AUTHORIZATION.as_str()).unwrap_or("");
    if auth.is_empty() {
        return;
    }

    let etag = response.header_str("ETag").unwrap_or("");
    if etag.is_empty() {
        return;
    }

    if !response.status.is_success() {
        return;
    }

    if response.header_str(VARY.as_str()) == Some("*")
        || req.header_str(VARY.as_str()) == Some("*")
    {
        return;
    }

    let mut headers = Vec::new();
    for name in CONTENT_HEADERS {
        if let Some(value) = response.header_str(name) {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let cached = CachedResponse {
        body: Bytes::copy_from_slice(&response.body),
        etag: etag.to_string(),
        expires_at: Utc::now() + chrono::Duration::minutes(ENTRY_TTL_MINUTES),
        headers,
    };

    let target = format!("{}{}", req.host, scrub_url(&req.url));
    debug!(
        "[cache] store: {}... {} [etag={}]",
        auth_prefix(auth),
        target,
        cached.etag
    );
    counter!("heroku_agent_cache_stores_total").increment(1);

    RESPONSE_CACHE.insert(cache_key(req), cached);
}

/// Removes every cached entry.
pub fn clear() {
    let count = RESPONSE_CACHE.len();
    RESPONSE_CACHE.clear();
    info!("[cache] cleared {count} entries");
}

pub fn len() -> usize {
    RESPONSE_CACHE.len()
}

/// Drops entries whose expiry has passed. Keys are collected first and
/// removed afterwards to keep each shard lock short; an entry expiring
/// mid-cycle is picked up on the next one.
pub fn reap() {
    let now = Utc::now();
    let total = RESPONSE_CACHE.len();

    let expired: Vec<String> = RESPONSE_CACHE
        .iter()
        .filter(|entry| entry.expires_at < now)
        .map(|entry| entry.key().clone())
        .collect();

    for key in &expired {
        RESPONSE_CACHE.remove(key);
    }

    info!("[cache] Reaped {} key(s) of {}", expired.len(), total);
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
