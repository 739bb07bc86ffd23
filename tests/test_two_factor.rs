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
    use heroku_agent::store::second_factor::{
        self, is_meaningful, normalize_principal, SecondFactor, TWO_FACTOR_STORE,
    };
    use hyper::http::header::AUTHORIZATION;
    use hyper::http::HeaderValue;
    use hyper::HeaderMap;

    // The store is process-global; every test uses its own principal so
    // concurrent tests never observe each other.

    fn headers_with_auth(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_normalize_bearer() {
        assert_eq!(normalize_principal("Bearer abc123"), "abc123");
    }

    #[test]
    fn test_normalize_basic_with_empty_user() {
        // base64(":secret-token") with an empty user yields the token
        let encoded = format!("Basic {}", base64_of(":secret-token"));
        assert_eq!(normalize_principal(&encoded), "secret-token");
    }

    #[test]
    fn test_normalize_basic_with_user_is_verbatim() {
        let encoded = format!("Basic {}", base64_of("user:secret"));
        assert_eq!(normalize_principal(&encoded), encoded);
    }

    #[test]
    fn test_normalize_other_values_verbatim() {
        assert_eq!(normalize_principal("raw-token"), "raw-token");
    }

    #[test]
    fn test_is_meaningful_rejects_empty() {
        assert!(!is_meaningful(""));
    }

    #[test]
    fn test_is_meaningful_rejects_empty_credentials_placeholder() {
        // "Og==" is the base64 of ":", sent by clients with no stored login
        assert!(!is_meaningful("Og=="));
        assert!(!is_meaningful("Basic Og=="));
    }

    #[test]
    fn test_is_meaningful_accepts_real_credentials() {
        assert!(is_meaningful("Bearer abc123"));
        assert!(is_meaningful(&format!("Basic {}", base64_of(":token"))));
    }

    #[test]
    fn test_try_stored_elevates_authorization() {
        second_factor::put("principal-elevate".to_string(), "skip2fa".to_string(), 1800);

        let mut headers = headers_with_auth("Bearer principal-elevate");
        assert!(second_factor::try_stored(&mut headers));
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer skip2fa");
    }

    #[test]
    fn test_try_stored_without_entry() {
        let mut headers = headers_with_auth("Bearer principal-missing");
        assert!(!second_factor::try_stored(&mut headers));
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap(),
            "Bearer principal-missing"
        );
    }

    #[test]
    fn test_try_stored_deletes_expired_entries() {
        TWO_FACTOR_STORE.insert(
            "principal-expired".to_string(),
            SecondFactor {
                token: "stale".to_string(),
                expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
            },
        );

        let mut headers = headers_with_auth("Bearer principal-expired");
        assert!(!second_factor::try_stored(&mut headers));
        assert!(!TWO_FACTOR_STORE.contains_key("principal-expired"));
    }

    #[test]
    fn test_put_sets_expiry_from_expires_in() {
        let before = chrono::Utc::now();
        second_factor::put("principal-expiry".to_string(), "tok".to_string(), 1800);
        let after = chrono::Utc::now();

        let entry = TWO_FACTOR_STORE.get("principal-expiry").unwrap();
        assert!(entry.expires_at >= before + chrono::Duration::seconds(1800));
        assert!(entry.expires_at <= after + chrono::Duration::seconds(1800));
    }

    #[test]
    fn test_upgrade_token_returns_stored_token() {
        second_factor::put("principal-upgrade".to_string(), "upgraded".to_string(), 1800);
        assert_eq!(
            second_factor::upgrade_token("principal-upgrade").as_deref(),
            Some("upgraded")
        );
    }

    #[test]
    fn test_upgrade_token_without_entry() {
        assert!(second_factor::upgrade_token("principal-unknown").is_none());
    }

    #[test]
    fn test_upgrade_token_expired_entry() {
        TWO_FACTOR_STORE.insert(
            "principal-upgrade-expired".to_string(),
            SecondFactor {
                token: "stale".to_string(),
                expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
            },
        );

        assert!(second_factor::upgrade_token("principal-upgrade-expired").is_none());
        assert!(!TWO_FACTOR_STORE.contains_key("principal-upgrade-expired"));
    }

    #[test]
    fn test_reap_drops_only_expired_entries() {
        TWO_FACTOR_STORE.insert(
            "principal-reap-old".to_string(),
            SecondFactor {
                token: "old".to_string(),
                expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
            },
        );
        second_factor::put("principal-reap-new".to_string(), "new".to_string(), 1800);

        second_factor::reap();

        assert!(!TWO_FACTOR_STORE.contains_key("principal-reap-old"));
        assert!(TWO_FACTOR_STORE.contains_key("principal-reap-new"));
    }

    fn base64_of(input: &str) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(input)
    }
}
