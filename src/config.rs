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

use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{error::Error, fs, path::Path, path::PathBuf};

use crate::util::expand_tilde;

/// Default path of the Unix-domain socket carrying proxied API traffic.
pub const DEFAULT_SOCKET: &str = "~/.heroku-agent.sock";

/// Default path of the Unix-domain socket carrying control-plane RPC.
pub const DEFAULT_CONTROL_SOCKET: &str = "~/.heroku-agent-control.sock";

/// Main configuration structure loaded from a YAML file. Every field is
/// optional; the agent runs with built-in defaults when no file is present.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Path of the data socket. `HEROKU_AGENT_SOCK` takes precedence.
    #[serde(default)]
    pub socket: Option<String>,

    /// Path of the control socket. `HEROKU_AGENT_CONTROL_SOCK` takes
    /// precedence.
    #[serde(default)]
    pub control_socket: Option<String>,

    /// Domain suffix identifying development API hosts. Requests to hosts
    /// ending in this suffix skip TLS certificate verification.
    #[serde(default)]
    pub dev_domain_suffix: Option<String>,
}

/// Global, lazily-initialized config object shared across the application.
pub static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    /// Parses configuration from a YAML file.
    ///
    /// # Returns
    /// - `Ok(Config)` if parsing is successful.
    /// - `Err(Box<dyn Error>)` if the file is missing, malformed, or invalid.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn Error>> {
        let contents = fs::read_to_string(path)?;
        let parsed: Config = serde_yaml::from_str(&contents)?;

        if matches!(&parsed.socket, Some(s) if s.trim().is_empty()) {
            return Err("socket must not be empty when set.".into());
        }
        if matches!(&parsed.control_socket, Some(s) if s.trim().is_empty()) {
            return Err("control_socket must not be empty when set.".into());
        }

        Ok(parsed)
    }

    /// Loads configuration from `path` when the file exists, otherwise
    /// returns the built-in defaults.
    pub fn load_or_default(path: &str) -> Result<Self, Box<dyn Error>> {
        if Path::new(path).exists() {
            let config = Self::from_file(path)?;
            tracing::info!("[server] loaded config from {path}");
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }
}

/// Resolves a socket path: environment variable first, then the configured
/// value, then the built-in default. A leading `~/` is always expanded.
fn resolve_path(env_var: &str, configured: Option<&str>, fallback: &str) -> PathBuf {
    let raw = std::env::var(env_var)
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| fallback.to_string());

    expand_tilde(&raw)
}

/// Path of the data socket.
pub fn socket_path() -> PathBuf {
    resolve_path(
        "HEROKU_AGENT_SOCK",
        CONFIG.get().and_then(|c| c.socket.as_deref()),
        DEFAULT_SOCKET,
    )
}

/// Path of the control socket.
pub fn control_socket_path() -> PathBuf {
    resolve_path(
        "HEROKU_AGENT_CONTROL_SOCK",
        CONFIG.get().and_then(|c| c.control_socket.as_deref()),
        DEFAULT_CONTROL_SOCKET,
    )
}

/// The configured development domain suffix, if any.
pub fn dev_domain_suffix() -> Option<String> {
    CONFIG
        .get()
        .and_then(|c| c.dev_domain_suffix.clone())
        .filter(|s| !s.is_empty())
}
