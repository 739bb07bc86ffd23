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

use async_trait::async_trait;
use hyper::http::header::IF_NONE_MATCH;
use hyper::http::{HeaderName, HeaderValue};
use hyper::{HeaderMap, StatusCode};
use metrics::counter;
use tracing::warn;

use crate::pipeline::{BufferedResponse, Handler, Next, ProxyError, ProxyRequest};
use crate::store::response_cache::{self, CachedResponse, CONTENT_HEADERS};

/// Conditional-GET cache layer. On a local hit the request goes upstream
/// with `If-None-Match`; a 304 or a transport error is answered from the
/// stored artifact, so a warm cache doubles as a circuit breaker against an
/// unreachable upstream.
pub struct CacheHandler;

#[async_trait]
impl Handler for CacheHandler {
    async fn call(
        &self,
        req: &mut ProxyRequest,
        next: Next<'_>,
    ) -> Result<BufferedResponse, ProxyError> {
        // A client running its own conditional request gets a clean pass
        // through; the 304 is theirs to interpret.
        let cached = if req.headers.contains_key(IF_NONE_MATCH) {
            None
        } else {
            response_cache::get(req)
        };

        if let Some(entry) = &cached {
            if let Ok(value) = HeaderValue::from_str(&entry.etag) {
                req.headers.insert(IF_NONE_MATCH, value);
            }
        }

        match next.run(req).await {
            Ok(response) => {
                if let Some(entry) = &cached {
                    if response.status == StatusCode::NOT_MODIFIED {
                        counter!("heroku_agent_cache_replays_total").increment(1);
                        return Ok(materialize(entry, &response.headers));
                    }
                }

                response_cache::set(req, &response);
                Ok(response)
            }
            Err(e) => match &cached {
                Some(entry) => {
                    warn!("[cache] serving stored response, upstream failed: {e}");
                    counter!("heroku_agent_cache_fallbacks_total").increment(1);
                    Ok(materialize(entry, &HeaderMap::new()))
                }
                None => Err(e),
            },
        }
    }
}

/// Builds a fresh 200 from a stored artifact. Content-describing headers
/// produced upstream are dropped in favor of the ones saved at insert time;
/// they describe the stored body, not the empty 304.
fn materialize(entry: &CachedResponse, upstream_headers: &HeaderMap) -> BufferedResponse {
    let mut response = BufferedResponse::new();

    for (name, value) in upstream_headers {
        if CONTENT_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        response.headers.insert(name.clone(), value.clone());
    }

    for (name, value) in &entry.headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            response.headers.insert(name, value);
        }
    }

    response.status = StatusCode::OK;
    response.write(&entry.body);
    response
}
