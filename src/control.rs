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

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::server::STARTED_AT;
use crate::store::{response_cache, second_factor};

/// Shared state of the control-plane router.
#[derive(Clone)]
pub struct ControlState {
    pub shutdown_tx: mpsc::Sender<i32>,
    pub metrics: PrometheusHandle,
}

/// RPC-visible daemon state. The start timestamp is RFC 3339 so the CLI can
/// render uptime without a shared clock representation.
#[derive(Serialize, Deserialize, Debug)]
pub struct DaemonState {
    pub cache_count: usize,
    pub two_factor_count: usize,
    pub up_at: String,
}

#[derive(Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct UpgradeTokenRequest {
    pub token: String,
}

#[derive(Serialize, Deserialize)]
pub struct UpgradeTokenResponse {
    pub token: String,
}

/// Builds the control-plane router served on the control socket.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/rpc/clear", post(clear_handler))
        .route("/rpc/state", get(state_handler))
        .route("/rpc/stop", post(stop_handler))
        .route("/rpc/upgrade-token", post(upgrade_token_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// POST /rpc/clear — empty both stores.
async fn clear_handler() -> Json<Message> {
    let start = Instant::now();
    debug!("[rpc] Request: Clear [start]");

    response_cache::clear();
    second_factor::clear();

    debug!("[rpc] Response: Clear [finish] [elapsed={:?}]", start.elapsed());
    Json(Message {
        message: "Cleared all stores".to_string(),
    })
}

/// GET /rpc/state — counts and start timestamp.
async fn state_handler() -> Json<DaemonState> {
    let start = Instant::now();
    debug!("[rpc] Request: GetState [start]");

    let state = DaemonState {
        cache_count: response_cache::len(),
        two_factor_count: second_factor::len(),
        up_at: STARTED_AT.to_rfc3339(),
    };

    debug!(
        "[rpc] Response: GetState [finish] [elapsed={:?}]",
        start.elapsed()
    );
    Json(state)
}

/// POST /rpc/stop — push exit code 0 onto the shutdown channel.
async fn stop_handler(State(state): State<ControlState>) -> Json<Message> {
    let start = Instant::now();
    debug!("[rpc] Request: Stop [start]");

    if state.shutdown_tx.send(0).await.is_err() {
        warn!("[rpc] shutdown channel closed; stop request dropped");
    }

    debug!("[rpc] Response: Stop [finish] [elapsed={:?}]", start.elapsed());
    Json(Message {
        message: "Stopping".to_string(),
    })
}

/// POST /rpc/upgrade-token — the stored skip-2FA token for a principal, or
/// an empty string when none is held.
async fn upgrade_token_handler(
    Json(request): Json<UpgradeTokenRequest>,
) -> Json<UpgradeTokenResponse> {
    let start = Instant::now();
    debug!("[rpc] Request: UpgradeToken [start]");

    let token = second_factor::upgrade_token(&request.token).unwrap_or_default();

    debug!(
        "[rpc] Response: UpgradeToken [finish] [elapsed={:?}]",
        start.elapsed()
    );
    Json(UpgradeTokenResponse { token })
}

/// GET /metrics — Prometheus exposition.
async fn metrics_handler(State(state): State<ControlState>) -> String {
    state.metrics.render()
}
