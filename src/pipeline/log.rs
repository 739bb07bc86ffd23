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
use std::time::Instant;
use tracing::debug;

use crate::pipeline::{BufferedResponse, Handler, Next, ProxyError, ProxyRequest};
use crate::util::scrub_url;

/// Outermost handler. Records start and finish lines with the scrubbed URL,
/// elapsed wall time, final status, and any request id set by upstream.
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn call(
        &self,
        req: &mut ProxyRequest,
        next: Next<'_>,
    ) -> Result<BufferedResponse, ProxyError> {
        let method = req.method.clone();
        let target = format!("{}{}", req.host, scrub_url(&req.url));

        debug!("[log] Request: {method} {target} [start]");
        let start = Instant::now();

        let result = next.run(req).await;

        if let Ok(response) = &result {
            let request_id = response
                .header_str("Request-Id")
                .map(|id| format!(" [request_id={id}]"))
                .unwrap_or_default();

            debug!(
                "[log] Request: {method} {target} [finish] [elapsed={:?}] [status={}]{request_id}",
                start.elapsed(),
                response.status.as_u16()
            );
        }

        result
    }
}
