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
use hyper::{Body, Request};
use metrics::counter;
use tracing::warn;

use crate::client;
use crate::pipeline::{BufferedResponse, Handler, Next, ProxyError, ProxyRequest};
use crate::util::copy_headers;

/// Additional attempts after a connection reset. No backoff; resets on
/// kept-alive connections resolve on a fresh one or not at all.
const RESET_RETRIES: usize = 2;

/// Innermost handler. Replays the inbound request against the remote API and
/// records the upstream status, headers, and body into the buffered
/// response. Non-2xx responses are not errors; they propagate faithfully.
pub struct ProxyHandler;

#[async_trait]
impl Handler for ProxyHandler {
    async fn call(
        &self,
        req: &mut ProxyRequest,
        next: Next<'_>,
    ) -> Result<BufferedResponse, ProxyError> {
        let url = build_upstream_url(&req.host, &req.url);

        let mut attempts = 0;
        let upstream = loop {
            let mut outbound = Request::builder()
                .method(req.method.clone())
                .uri(url.as_str())
                .body(Body::from(req.body.clone()))
                .map_err(ProxyError::Request)?;
            copy_headers(&req.headers, outbound.headers_mut());

            match client::request(outbound).await {
                Ok(response) => break response,
                Err(e) if e.is_connection_reset() && attempts < RESET_RETRIES => {
                    attempts += 1;
                    warn!("[client] connection reset by peer, retrying ({attempts}/{RESET_RETRIES})");
                    counter!("heroku_agent_upstream_retries_total").increment(1);
                }
                Err(e) => return Err(e),
            }
        };

        let mut response = next.run(req).await?;

        let (parts, body) = upstream.into_parts();
        copy_headers(&parts.headers, &mut response.headers);
        response.status = parts.status;

        let bytes = hyper::body::to_bytes(body)
            .await
            .map_err(ProxyError::Transport)?;
        response.write(&bytes);

        Ok(response)
    }
}

/// The outbound URL for an inbound request: plain HTTP only when the client
/// explicitly addressed port 80, HTTPS otherwise.
pub fn build_upstream_url(host: &str, url: &str) -> String {
    let scheme = if host.ends_with(":80") { "http" } else { "https" };
    format!("{scheme}://{host}{url}")
}
