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
use hyper::http::header::CONTENT_TYPE;
use hyper::http::HeaderValue;
use hyper::StatusCode;
use metrics::counter;
use serde::Serialize;
use tracing::error;

use crate::pipeline::{BufferedResponse, Handler, Next, ProxyError, ProxyRequest};

/// The error shape the remote API uses, so clients parse agent-produced
/// failures the same way as server-produced ones.
#[derive(Serialize)]
pub struct ApiError {
    pub id: String,
    pub message: String,
}

/// Converts any error propagated by the inner chain into a well-formed 500
/// JSON response. Propagation stops here; nothing above this handler ever
/// sees an error from below it.
pub struct ErrorHandler;

#[async_trait]
impl Handler for ErrorHandler {
    async fn call(
        &self,
        req: &mut ProxyRequest,
        next: Next<'_>,
    ) -> Result<BufferedResponse, ProxyError> {
        match next.run(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("[error] {e}");
                counter!("heroku_agent_pipeline_errors_total").increment(1);

                let api_error = ApiError {
                    id: "heroku_agent".to_string(),
                    message: format!("heroku-agent: {e}"),
                };

                let mut response = BufferedResponse::new();
                response.status = StatusCode::INTERNAL_SERVER_ERROR;
                response
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response.write(&serde_json::to_vec(&api_error).unwrap_or_default());
                Ok(response)
            }
        }
    }
}
