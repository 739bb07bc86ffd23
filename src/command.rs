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
use clap::Subcommand;
use hyper::http::header::{CONTENT_TYPE, HOST};
use hyper::{Body, Method, Request};
use std::error::Error;
use std::time::Instant;
use tokio::net::UnixStream;
use tracing::debug;

use crate::config;
use crate::control::{DaemonState, UpgradeTokenRequest, UpgradeTokenResponse};

/// Control-plane commands. Without one, the binary runs as the daemon.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clear the daemon's cache and second factor store
    Clear,
    /// Display the daemon's state
    State,
    /// Stop the daemon
    Stop,
    /// Exchange a token for its 2FA-privileged equivalent, if one is held
    UpgradeToken { token: String },
    /// Display version
    Version,
}

/// Runs a command against the daemon and returns the process exit code.
pub async fn run(command: Command) -> i32 {
    match command {
        Command::Clear => clear().await,
        Command::State => state().await,
        Command::Stop => stop().await,
        Command::UpgradeToken { token } => upgrade_token(&token).await,
        Command::Version => version(),
    }
}

async fn clear() -> i32 {
    match rpc("Clear", Method::POST, "/rpc/clear", None).await {
        Ok(_) => {
            println!("Cleared all stores");
            0
        }
        Err(e) => fail(&e),
    }
}

async fn state() -> i32 {
    let bytes = match rpc("GetState", Method::GET, "/rpc/state", None).await {
        Ok(bytes) => bytes,
        Err(e) => return fail(&e),
    };

    let state: DaemonState = match serde_json::from_slice(&bytes) {
        Ok(state) => state,
        Err(e) => return fail(&e),
    };

    println!("Cache count: {}", state.cache_count);
    println!("Second factor count: {}", state.two_factor_count);
    match DateTime::parse_from_rfc3339(&state.up_at) {
        Ok(up_at) => println!(
            "Up: {}",
            format_uptime(Utc::now().signed_duration_since(up_at))
        ),
        Err(_) => println!("Up: {}", state.up_at),
    }
    0
}

async fn stop() -> i32 {
    match rpc("Stop", Method::POST, "/rpc/stop", None).await {
        Ok(_) => {
            println!("Stopped");
            0
        }
        Err(e) => fail(&e),
    }
}

async fn upgrade_token(token: &str) -> i32 {
    let body = match serde_json::to_vec(&UpgradeTokenRequest {
        token: token.to_string(),
    }) {
        Ok(body) => body,
        Err(e) => return fail(&e),
    };

    let bytes = match rpc("UpgradeToken", Method::POST, "/rpc/upgrade-token", Some(body)).await {
        Ok(bytes) => bytes,
        Err(e) => return fail(&e),
    };

    let response: UpgradeTokenResponse = match serde_json::from_slice(&bytes) {
        Ok(response) => response,
        Err(e) => return fail(&e),
    };

    if response.token.is_empty() {
        return 1;
    }

    println!("{}", response.token);
    0
}

fn version() -> i32 {
    println!("{}", env!("CARGO_PKG_VERSION"));
    0
}

fn fail(e: &dyn std::fmt::Display) -> i32 {
    eprintln!("heroku-agent: {e}");
    1
}

/// Performs one RPC round trip against the daemon's control socket.
async fn rpc(
    name: &str,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
) -> Result<Bytes, Box<dyn Error>> {
    let control_path = config::control_socket_path();
    debug!("[command] Connecting to: {}", control_path.display());

    let stream = UnixStream::connect(&control_path)
        .await
        .map_err(|e| format!("couldn't connect to daemon: {e}"))?;
    let (mut sender, connection) = hyper::client::conn::handshake(stream).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("[command] control connection closed: {e}");
        }
    });

    let start = Instant::now();
    debug!("[command] Request: RPC: {name} [start]");

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, "heroku-agent");
    let request = match body {
        Some(bytes) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            builder.body(Body::from(bytes))?
        }
        None => builder.body(Body::empty())?,
    };

    let response = sender.send_request(request).await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;

    debug!(
        "[command] Response: RPC: {name} [finish] [elapsed={:?}]",
        start.elapsed()
    );

    if !status.is_success() {
        return Err(format!("daemon answered {name} with status {status}").into());
    }

    Ok(bytes)
}

/// Renders an uptime duration as `1h23m45s`.
fn format_uptime(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
