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
use hyper::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Request, StatusCode};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client;
use crate::pipeline::{BufferedResponse, Handler, Next, ProxyError, ProxyRequest};
use crate::store::second_factor;
use crate::util::auth_prefix;

/// Header carrying the one-time second-factor code.
pub const TWO_FACTOR_HEADER: &str = "Heroku-Two-Factor-Code";

const EXCHANGE_ACCEPT: &str = "application/vnd.heroku+json; version=3";

/// Requested lifetime for an exchanged skip-2FA token, in seconds.
const EXCHANGE_EXPIRES_IN: i64 = 1800;

/// Elevates two-factor-protected requests. A stored skip-2FA token for the
/// request's principal replaces the authorization outright; otherwise a
/// one-time code present on the request is exchanged for a fresh token so
/// that this and subsequent requests pass without reprompting.
pub struct TwoFactorHandler;

#[async_trait]
impl Handler for TwoFactorHandler {
    async fn call(
        &self,
        req: &mut ProxyRequest,
        next: Next<'_>,
    ) -> Result<BufferedResponse, ProxyError> {
        if second_factor::try_stored(&mut req.headers) {
            req.headers.remove(TWO_FACTOR_HEADER);
            return next.run(req).await;
        }

        let code = req.header_str(TWO_FACTOR_HEADER).unwrap_or("").to_string();
        let auth = req
            .header_str(AUTHORIZATION.as_str())
            .unwrap_or("")
            .to_string();

        if !code.is_empty() && second_factor::is_meaningful(&auth) {
            let (token, expires_in) = exchange(&req.host, &auth, &code).await?;
            second_factor::put(second_factor::normalize_principal(&auth), token, expires_in);

            // Elevate this very request; the code was consumed by the
            // exchange and must not travel upstream.
            if second_factor::try_stored(&mut req.headers) {
                req.headers.remove(TWO_FACTOR_HEADER);
            }
        }

        next.run(req).await
    }
}

#[derive(Serialize)]
struct AuthorizationRequest {
    description: &'static str,
    expires_in: i64,
    skip_two_factor: bool,
}

#[derive(Deserialize)]
struct AuthorizationResponse {
    access_token: AccessToken,
}

#[derive(Deserialize)]
struct AccessToken {
    token: String,
    expires_in: i64,
}

/// Trades a one-time second-factor code for a short-lived skip-2FA token by
/// creating an authorization against the API host. Anything other than a 201
/// is an exchange failure; the failure is surfaced, never retried.
async fn exchange(host: &str, auth: &str, code: &str) -> Result<(String, i64), ProxyError> {
    let body = serde_json::to_vec(&AuthorizationRequest {
        description: "heroku-agent",
        expires_in: EXCHANGE_EXPIRES_IN,
        skip_two_factor: true,
    })
    .map_err(ProxyError::Json)?;

    let request = Request::post(format!("https://{host}/oauth/authorizations"))
        .header(ACCEPT, EXCHANGE_ACCEPT)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, auth)
        .header(TWO_FACTOR_HEADER, code)
        .body(Body::from(body))
        .map_err(ProxyError::Request)?;

    let response = client::request(request).await?;
    if response.status() != StatusCode::CREATED {
        warn!(
            "[2fa] exchange failed for {}... [status={}]",
            auth_prefix(auth),
            response.status().as_u16()
        );
        return Err(ProxyError::Exchange(response.status()));
    }

    let bytes = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(ProxyError::Transport)?;
    let decoded: AuthorizationResponse =
        serde_json::from_slice(&bytes).map_err(ProxyError::Json)?;

    info!(
        "[2fa] obtained skip-2fa token for {}... [expires_in={}]",
        auth_prefix(auth),
        decoded.access_token.expires_in
    );
    counter!("heroku_agent_two_factor_exchanges_total").increment(1);

    Ok((decoded.access_token.token, decoded.access_token.expires_in))
}
