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
    use bytes::Bytes;
    use heroku_agent::pipeline::{BufferedResponse, ProxyRequest};
    use heroku_agent::store::response_cache::{self, CachedResponse, RESPONSE_CACHE, SUDO_HEADER};
    use hyper::http::header::{HeaderName, HeaderValue};
    use hyper::http::Uri;
    use hyper::{HeaderMap, Method, StatusCode};

    // The cache is process-global; every test uses its own authorization so
    // concurrent tests never observe each other.

    fn request(method: Method, auth: &str, url: &str, extra: &[(&str, &str)]) -> ProxyRequest {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("api.heroku.com"));
        if !auth.is_empty() {
            headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        }
        for (name, value) in extra {
            headers.insert(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }

        ProxyRequest::new(
            method,
            url.parse::<Uri>().unwrap(),
            headers,
            Bytes::new(),
        )
    }

    fn response(status: StatusCode, etag: &str, body: &[u8]) -> BufferedResponse {
        let mut response = BufferedResponse::new();
        response.status = status;
        if !etag.is_empty() {
            response
                .headers
                .insert("etag", HeaderValue::from_str(etag).unwrap());
        }
        response
            .headers
            .insert("content-type", HeaderValue::from_static("application/json"));
        response.write(body);
        response
    }

    #[test]
    fn test_set_and_get_round_trip() {
        let req = request(Method::GET, "Bearer cache-roundtrip", "/apps", &[]);
        response_cache::set(&req, &response(StatusCode::OK, "\"v1\"", b"BODY1"));

        let cached = response_cache::get(&req).expect("entry should be stored");
        assert_eq!(cached.etag, "\"v1\"");
        assert_eq!(&cached.body[..], b"BODY1");
        assert!(cached
            .headers
            .iter()
            .any(|(name, value)| name == "Content-Type" && value == "application/json"));
    }

    #[test]
    fn test_entries_are_isolated_per_principal() {
        let first = request(Method::GET, "Bearer cache-principal-a", "/apps", &[]);
        let second = request(Method::GET, "Bearer cache-principal-b", "/apps", &[]);

        response_cache::set(&first, &response(StatusCode::OK, "\"a\"", b"A"));
        response_cache::set(&second, &response(StatusCode::OK, "\"b\"", b"B"));

        assert_eq!(response_cache::get(&first).unwrap().etag, "\"a\"");
        assert_eq!(response_cache::get(&second).unwrap().etag, "\"b\"");
        assert_ne!(
            response_cache::cache_key(&first),
            response_cache::cache_key(&second)
        );
    }

    #[test]
    fn test_sudo_header_changes_the_key() {
        let plain = request(Method::GET, "Bearer cache-sudo", "/apps", &[]);
        let sudo = request(
            Method::GET,
            "Bearer cache-sudo",
            "/apps",
            &[(SUDO_HEADER, "other@example.com")],
        );

        assert_ne!(
            response_cache::cache_key(&plain),
            response_cache::cache_key(&sudo)
        );
    }

    #[test]
    fn test_vary_resolution_changes_the_key() {
        let gzip = request(
            Method::GET,
            "Bearer cache-vary",
            "/apps",
            &[("vary", "Accept-Encoding"), ("accept-encoding", "gzip")],
        );
        let identity = request(
            Method::GET,
            "Bearer cache-vary",
            "/apps",
            &[("vary", "Accept-Encoding"), ("accept-encoding", "identity")],
        );

        assert_ne!(
            response_cache::cache_key(&gzip),
            response_cache::cache_key(&identity)
        );
    }

    #[test]
    fn test_non_get_requests_are_never_cached() {
        let req = request(Method::POST, "Bearer cache-post", "/apps", &[]);
        response_cache::set(&req, &response(StatusCode::OK, "\"v1\"", b"BODY"));
        assert!(response_cache::get(&req).is_none());
    }

    #[test]
    fn test_missing_authorization_is_never_cached() {
        let req = request(Method::GET, "", "/apps", &[]);
        response_cache::set(&req, &response(StatusCode::OK, "\"v1\"", b"BODY"));
        assert!(response_cache::get(&req).is_none());
    }

    #[test]
    fn test_missing_etag_is_never_cached() {
        let req = request(Method::GET, "Bearer cache-noetag", "/apps", &[]);
        response_cache::set(&req, &response(StatusCode::OK, "", b"BODY"));
        assert!(response_cache::get(&req).is_none());
    }

    #[test]
    fn test_non_success_status_is_never_cached() {
        let req = request(Method::GET, "Bearer cache-500", "/apps", &[]);
        response_cache::set(
            &req,
            &response(StatusCode::INTERNAL_SERVER_ERROR, "\"v1\"", b"BODY"),
        );
        assert!(response_cache::get(&req).is_none());
    }

    #[test]
    fn test_vary_star_response_is_never_cached() {
        let req = request(Method::GET, "Bearer cache-varystar", "/apps", &[]);
        let mut resp = response(StatusCode::OK, "\"v1\"", b"BODY");
        resp.headers
            .insert("vary", HeaderValue::from_static("*"));

        response_cache::set(&req, &resp);
        assert!(response_cache::get(&req).is_none());
    }

    #[test]
    fn test_stored_headers_keep_only_content_headers() {
        let req = request(Method::GET, "Bearer cache-headerbag", "/apps", &[]);
        let mut resp = response(StatusCode::OK, "\"v1\"", b"BODY");
        resp.headers
            .insert("x-runtime", HeaderValue::from_static("42"));
        resp.headers
            .insert("content-length", HeaderValue::from_static("4"));

        response_cache::set(&req, &resp);

        let cached = response_cache::get(&req).unwrap();
        assert!(cached.headers.iter().any(|(name, _)| name == "Content-Type"));
        assert!(cached
            .headers
            .iter()
            .any(|(name, _)| name == "Content-Length"));
        assert!(!cached.headers.iter().any(|(name, _)| name == "x-runtime"));
    }

    #[test]
    fn test_expired_entries_remain_readable_until_reaped() {
        let req = request(Method::GET, "Bearer cache-expired", "/apps", &[]);
        response_cache::set(&req, &response(StatusCode::OK, "\"v1\"", b"BODY"));

        let key = response_cache::cache_key(&req);
        let mut entry = RESPONSE_CACHE.get(&key).unwrap().value().clone();
        entry.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        RESPONSE_CACHE.insert(key.clone(), entry);

        // Expiry is enforced by the reaper, not the read path.
        assert!(response_cache::get(&req).is_some());

        response_cache::reap();
        assert!(response_cache::get(&req).is_none());
    }

    #[test]
    fn test_reap_keeps_unexpired_entries() {
        let req = request(Method::GET, "Bearer cache-reap-keep", "/apps", &[]);
        response_cache::set(&req, &response(StatusCode::OK, "\"v1\"", b"BODY"));

        response_cache::reap();
        assert!(response_cache::get(&req).is_some());
    }

    #[test]
    fn test_same_key_writes_overwrite() {
        let req = request(Method::GET, "Bearer cache-overwrite", "/apps", &[]);
        response_cache::set(&req, &response(StatusCode::OK, "\"v1\"", b"FIRST"));
        response_cache::set(&req, &response(StatusCode::OK, "\"v2\"", b"SECOND"));

        let cached = response_cache::get(&req).unwrap();
        assert_eq!(cached.etag, "\"v2\"");
        assert_eq!(&cached.body[..], b"SECOND");
    }

    #[test]
    fn test_hash_key_is_deterministic() {
        assert_eq!(
            response_cache::hash_key("a:b:GET:host:/x:"),
            response_cache::hash_key("a:b:GET:host:/x:")
        );
        assert_ne!(
            response_cache::hash_key("a:b:GET:host:/x:"),
            response_cache::hash_key("a:b:GET:host:/y:")
        );
    }

    #[test]
    fn test_cached_response_expiry_is_one_hour() {
        let req = request(Method::GET, "Bearer cache-ttl", "/apps", &[]);
        let before = chrono::Utc::now();
        response_cache::set(&req, &response(StatusCode::OK, "\"v1\"", b"BODY"));
        let after = chrono::Utc::now();

        let cached: CachedResponse = response_cache::get(&req).unwrap();
        assert!(cached.expires_at >= before + chrono::Duration::minutes(60));
        assert!(cached.expires_at <= after + chrono::Duration::minutes(60));
    }
}
