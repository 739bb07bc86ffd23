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

pub mod cache;
pub mod error;
pub mod log;
pub mod proxy;
pub mod two_factor;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::http::header::HOST;
use hyper::{Body, HeaderMap, Method, Response, StatusCode, Uri};
use std::fmt;
use std::sync::Arc;

/// A request travelling through the pipeline. The inbound body is buffered
/// whole before the first handler runs; handlers mutate headers in place.
pub struct ProxyRequest {
    pub method: Method,
    pub host: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let url = uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| uri.path().to_string());
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self {
            method,
            host,
            url,
            headers,
            body,
        }
    }

    /// The named header as a string slice, when present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An in-memory response recorder. Handlers write into it on the way out of
/// the chain; a downstream handler may discard one and substitute another,
/// which is what makes the cache fallback possible.
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl BufferedResponse {
    /// An empty recorder. Like a fresh recorder, the status defaults to 200.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// The named header as a string slice, when present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Converts the recorder into a real response for the connection.
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors produced inside the pipeline. The Error handler is the single
/// point converting these into a client-visible response.
#[derive(Debug)]
pub enum ProxyError {
    /// The upstream transport failed.
    Transport(hyper::Error),
    /// The upstream did not answer within the client deadline.
    Timeout,
    /// The skip-2FA exchange answered with an unexpected status.
    Exchange(StatusCode),
    /// A JSON payload could not be encoded or decoded.
    Json(serde_json::Error),
    /// An outbound request could not be constructed.
    Request(hyper::http::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Transport(e) => write!(f, "upstream transport error: {e}"),
            ProxyError::Timeout => write!(f, "upstream request timed out"),
            ProxyError::Exchange(status) => {
                write!(f, "second factor exchange failed with status {status}")
            }
            ProxyError::Json(e) => write!(f, "malformed JSON payload: {e}"),
            ProxyError::Request(e) => write!(f, "could not build upstream request: {e}"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Transport(e) => Some(e),
            ProxyError::Json(e) => Some(e),
            ProxyError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl ProxyError {
    /// True when the underlying failure is a TCP connection reset. Detection
    /// walks the error source chain for the typed `io::Error` kind rather
    /// than matching on message text.
    pub fn is_connection_reset(&self) -> bool {
        match self {
            ProxyError::Transport(e) => error_chain_has_reset(e),
            _ => false,
        }
    }
}

/// Walks an error source chain looking for `io::ErrorKind::ConnectionReset`.
pub fn error_chain_has_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// A single link in the handler chain. Each handler may mutate the request,
/// delegate to `next`, and rewrite the buffered response on the way out.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(
        &self,
        req: &mut ProxyRequest,
        next: Next<'_>,
    ) -> Result<BufferedResponse, ProxyError>;
}

/// The remainder of the chain past the current handler. Running the empty
/// tail yields an empty recorder, which is the innermost sentinel.
pub struct Next<'a> {
    handlers: &'a [Arc<dyn Handler>],
}

impl<'a> Next<'a> {
    pub async fn run(self, req: &mut ProxyRequest) -> Result<BufferedResponse, ProxyError> {
        match self.handlers.split_first() {
            Some((handler, rest)) => handler.call(req, Next { handlers: rest }).await,
            None => Ok(BufferedResponse::new()),
        }
    }
}

/// An ordered handler chain. The first handler is the outermost.
pub struct Pipeline {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Pipeline {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// The standard chain, outermost first. Error sits outside Cache so that
    /// Cache still observes upstream errors for its fallback.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(log::LogHandler),
            Arc::new(error::ErrorHandler),
            Arc::new(two_factor::TwoFactorHandler),
            Arc::new(cache::CacheHandler),
            Arc::new(proxy::ProxyHandler),
        ])
    }

    pub async fn handle(&self, req: &mut ProxyRequest) -> Result<BufferedResponse, ProxyError> {
        Next {
            handlers: &self.handlers,
        }
        .run(req)
        .await
    }
}
