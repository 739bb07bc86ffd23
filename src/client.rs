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

use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response};
use hyper_rustls::HttpsConnector;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config;
use crate::pipeline::ProxyError;
use crate::util::scrub_url;

type HttpsClient = Client<HttpsConnector<HttpConnector>>;

/// Total deadline for a single upstream round trip. Aggressive, to minimize
/// waits on a bad connection.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
const MAX_IDLE_PER_HOST: usize = 5;

/// Shared client for all outbound requests, verifying certificates against
/// the native root store.
static HTTPS_CLIENT: Lazy<HttpsClient> = Lazy::new(|| build_client(false));

/// Client selected for requests to development hosts. Certificate
/// verification is disabled on this client only; the verifying client is
/// never touched, so there is no shared-transport toggle to race on.
static INSECURE_CLIENT: Lazy<HttpsClient> = Lazy::new(|| build_client(true));

fn build_client(insecure: bool) -> HttpsClient {
    let mut http = HttpConnector::new();
    http.set_keepalive(Some(TCP_KEEPALIVE));
    http.enforce_http(false);

    let https = if insecure {
        let tls = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(NoVerification))
            .with_no_client_auth();
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http)
    };

    Client::builder()
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .build(https)
}

/// Certificate verifier that accepts any certificate. Used only for hosts
/// matching the configured development domain suffix.
struct NoVerification;

impl rustls::client::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// True when the authority (host with optional port) belongs to the
/// configured development domain. Both the bare and `:443` forms match.
pub fn is_dev_domain(authority: &str) -> bool {
    match config::dev_domain_suffix() {
        Some(suffix) => {
            authority.ends_with(&suffix) || authority.ends_with(&format!("{suffix}:443"))
        }
        None => false,
    }
}

/// Performs an instrumented upstream round trip: start and finish lines with
/// elapsed time and status, the 10-second total deadline, and per-request
/// client selection for development hosts.
pub async fn request(req: Request<Body>) -> Result<Response<Body>, ProxyError> {
    let method = req.method().clone();
    let url = scrub_url(&req.uri().to_string());
    let authority = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default();

    debug!("[client] Request: {method} {url} [start]");
    let start = Instant::now();

    let client: &HttpsClient = if is_dev_domain(&authority) {
        debug!("[client] skipping TLS verification for development host {authority}");
        &INSECURE_CLIENT
    } else {
        &HTTPS_CLIENT
    };

    match timeout(REQUEST_TIMEOUT, client.request(req)).await {
        Ok(Ok(resp)) => {
            debug!(
                "[client] Response: {method} {url} [finish] [elapsed={:?}] [status={}]",
                start.elapsed(),
                resp.status().as_u16()
            );
            Ok(resp)
        }
        Ok(Err(e)) => {
            debug!(
                "[client] Response: {method} {url} [finish] [elapsed={:?}]",
                start.elapsed()
            );
            Err(ProxyError::Transport(e))
        }
        Err(_) => {
            warn!("[client] Request: {method} {url} timed out after {REQUEST_TIMEOUT:?}");
            Err(ProxyError::Timeout)
        }
    }
}
