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
use axum::routing::any;
use axum::Router;
use chrono::{DateTime, Utc};
use futures::ready;
use hyper::server::accept::Accept;
use hyper::{Body, Request, Response, Server, StatusCode};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::exit;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info};

use crate::config;
use crate::control::{self, ControlState};
use crate::pipeline::{Pipeline, ProxyRequest};
use crate::store::{response_cache, second_factor};

/// Process start timestamp, reported through the control plane.
pub static STARTED_AT: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Runs the daemon: two Unix-domain listeners, the signal handler, the
/// shutdown coordinator, both reapers, and the request pipeline.
pub async fn serve() {
    Lazy::force(&STARTED_AT);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let proxy_path = config::socket_path();
    let control_path = config::control_socket_path();

    let proxy_listener = init_listener(&proxy_path);
    let control_listener = init_listener(&control_path);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<i32>(1);
    task::spawn(handle_signals(shutdown_tx.clone()));
    task::spawn(wait_for_shutdown(
        shutdown_rx,
        vec![proxy_path, control_path],
    ));

    response_cache::start_reaper();
    second_factor::start_reaper();

    let pipeline = Arc::new(Pipeline::standard());
    let data_router = Router::new()
        .route("/", any(data_handler))
        .route("/*path", any(data_handler))
        .with_state(pipeline);

    let control_router = control::router(ControlState {
        shutdown_tx,
        metrics: metrics_handle,
    });

    let data_server =
        Server::builder(ServerAccept { uds: proxy_listener }).serve(data_router.into_make_service());
    let control_server = Server::builder(ServerAccept {
        uds: control_listener,
    })
    .serve(control_router.into_make_service());

    let (data_result, control_result) = tokio::join!(data_server, control_server);

    if let Err(e) = data_result {
        error!("[server] proxy server exited with error: {e}");
    }
    if let Err(e) = control_result {
        error!("[server] control server exited with error: {e}");
    }
}

/// Binds a Unix-domain listener and restricts it to the current user; the
/// socket will carry credentials. A second daemon finding the address in use
/// exits cleanly so that starts are idempotent.
fn init_listener(path: &Path) -> UnixListener {
    match UnixListener::bind(path) {
        Ok(listener) => {
            if let Err(e) =
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                error!("[server] could not chmod {}: {e}", path.display());
                exit(1);
            }
            info!("[server] Listening on: {}", path.display());
            listener
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            info!(
                "[server] heroku-agent already running at {}",
                path.display()
            );
            exit(0);
        }
        Err(e) => {
            error!("[server] could not bind {}: {e}", path.display());
            exit(1);
        }
    }
}

/// Adapts a Unix-domain listener to hyper's accept loop.
struct ServerAccept {
    uds: UnixListener,
}

impl Accept for ServerAccept {
    type Conn = UnixStream;
    type Error = std::io::Error;

    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Conn, Self::Error>>> {
        let (stream, _addr) = ready!(self.uds.poll_accept(cx))?;
        Poll::Ready(Some(Ok(stream)))
    }
}

/// Entry point of the data plane. Buffers the inbound request, runs the
/// pipeline, and copies the buffered response onto the connection. An error
/// escaping the outermost handler is a bug, not a condition to serve.
async fn data_handler(
    State(pipeline): State<Arc<Pipeline>>,
    req: Request<Body>,
) -> Response<Body> {
    counter!("heroku_agent_requests_total").increment(1);

    let (parts, body) = req.into_parts();
    let body = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("[server] could not read request body: {e}");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return response;
        }
    };

    let mut request = ProxyRequest::new(parts.method, parts.uri, parts.headers, body);

    match pipeline.handle(&mut request).await {
        Ok(buffered) => buffered.into_response(),
        Err(e) => {
            error!("[server] error escaped the pipeline: {e}");
            std::process::abort();
        }
    }
}

/// Pushes an exit code onto the shutdown channel when a process-killing
/// signal arrives. Exit codes follow the shell convention of 128 + signal.
async fn handle_signals(shutdown_tx: mpsc::Sender<i32>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("[server] could not install SIGINT handler: {e}");
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("[server] could not install SIGTERM handler: {e}");
            return;
        }
    };

    let (name, code) = tokio::select! {
        _ = interrupt.recv() => ("SIGINT", 128 + 2),
        _ = terminate.recv() => ("SIGTERM", 128 + 15),
    };

    info!("[server] Caught signal {name}: shutting down");
    let _ = shutdown_tx.send(code).await;
}

/// Blocks on the shutdown channel, then unlinks the socket files and exits
/// with the received code. In-flight requests are not drained; the agent is
/// a user-local accelerator, not a server with clients to protect.
async fn wait_for_shutdown(mut shutdown_rx: mpsc::Receiver<i32>, socket_paths: Vec<PathBuf>) {
    let code = shutdown_rx.recv().await.unwrap_or(0);

    for path in &socket_paths {
        let _ = std::fs::remove_file(path);
    }

    info!("[server] exiting with code {code}");
    exit(code);
}
