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

#[cfg(test)]
mod tests {
    use heroku_agent::client::is_dev_domain;
    use heroku_agent::config::{Config, CONFIG};
    use heroku_agent::pipeline::proxy::build_upstream_url;
    use heroku_agent::pipeline::{error_chain_has_reset, ProxyError};
    use std::io;

    fn with_dev_suffix() {
        let _ = CONFIG.set(Config {
            socket: None,
            control_socket: None,
            dev_domain_suffix: Some("herokudev.com".to_string()),
        });
    }

    #[test]
    fn test_dev_domain_matches_bare_host() {
        with_dev_suffix();
        assert!(is_dev_domain("api.herokudev.com"));
    }

    #[test]
    fn test_dev_domain_matches_port_443_variant() {
        with_dev_suffix();
        assert!(is_dev_domain("api.herokudev.com:443"));
    }

    #[test]
    fn test_dev_domain_rejects_production_hosts() {
        with_dev_suffix();
        assert!(!is_dev_domain("api.heroku.com"));
        assert!(!is_dev_domain("api.heroku.com:443"));
    }

    #[test]
    fn test_dev_domain_rejects_other_ports() {
        with_dev_suffix();
        assert!(!is_dev_domain("api.herokudev.com:8443"));
    }

    #[test]
    fn test_build_upstream_url_defaults_to_https() {
        assert_eq!(
            build_upstream_url("api.heroku.com", "/apps?space=mine"),
            "https://api.heroku.com/apps?space=mine"
        );
    }

    #[test]
    fn test_build_upstream_url_uses_http_for_port_80() {
        assert_eq!(
            build_upstream_url("localhost:80", "/apps"),
            "http://localhost:80/apps"
        );
    }

    #[test]
    fn test_build_upstream_url_other_ports_stay_https() {
        assert_eq!(
            build_upstream_url("api.heroku.com:8443", "/apps"),
            "https://api.heroku.com:8443/apps"
        );
    }

    #[test]
    fn test_error_chain_finds_nested_connection_reset() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
        let wrapped = io::Error::new(io::ErrorKind::Other, reset);
        assert!(error_chain_has_reset(&wrapped));
    }

    #[test]
    fn test_error_chain_ignores_other_kinds() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        assert!(!error_chain_has_reset(&refused));
    }

    #[test]
    fn test_timeout_is_not_a_connection_reset() {
        assert!(!ProxyError::Timeout.is_connection_reset());
    }
}
