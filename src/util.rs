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

use hyper::HeaderMap;
use std::path::PathBuf;

/// Copies every header from `source` into `destination`, replacing any value
/// already present under the same name.
pub fn copy_headers(source: &HeaderMap, destination: &mut HeaderMap) {
    for (name, value) in source {
        destination.insert(name.clone(), value.clone());
    }
}

/// Replaces the value of a `password` query parameter with `[scrubbed]` so
/// that URLs are safe to display on-screen and in logs. Some CLI clients
/// still send credentials via query parameter.
pub fn scrub_url(url: &str) -> String {
    let Some((_, query)) = url.split_once('?') else {
        return url.to_string();
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key == "password" && !value.is_empty() {
            return url.replacen(value.as_ref(), "[scrubbed]", 1);
        }
    }

    url.to_string()
}

/// Expands a leading `~/` to the current user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Returns the first few characters of an authorization value for logging.
/// Full credentials never reach the log stream.
pub fn auth_prefix(auth: &str) -> &str {
    auth.get(..10).unwrap_or(auth)
}
