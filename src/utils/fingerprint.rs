//! Device fingerprint and client-IP extraction from request headers.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::models::DeviceMetadata;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client IP: first x-forwarded-for hop, falling back to x-real-ip.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(headers, "x-real-ip").map(str::to_string))
}

/// Fingerprint derived from the stable request headers: sha256 over
/// user-agent, accept-language and accept-encoding joined with '|'.
/// None when no user-agent is present; an empty basis identifies nothing.
pub fn derive_fingerprint(headers: &HeaderMap) -> Option<String> {
    let user_agent = header_str(headers, "user-agent")?;
    let basis = format!(
        "{}|{}|{}",
        user_agent,
        header_str(headers, "accept-language").unwrap_or(""),
        header_str(headers, "accept-encoding").unwrap_or(""),
    );
    let mut hasher = Sha256::new();
    hasher.update(basis.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

/// Gather per-request device metadata once. An explicit client-supplied
/// fingerprint wins over the derived one.
pub fn extract_device_metadata(
    headers: &HeaderMap,
    explicit_fingerprint: Option<String>,
) -> DeviceMetadata {
    DeviceMetadata {
        ip_address: client_ip(headers),
        user_agent: header_str(headers, "user-agent").map(str::to_string),
        fingerprint: explicit_fingerprint
            .filter(|f| !f.is_empty())
            .or_else(|| derive_fingerprint(headers)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(entries: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_fingerprint_is_stable_and_header_sensitive() {
        let a = headers(&[
            ("user-agent", "TestAgent/1.0"),
            ("accept-language", "en-US"),
            ("accept-encoding", "gzip"),
        ]);
        let b = headers(&[
            ("user-agent", "TestAgent/1.0"),
            ("accept-language", "en-US"),
            ("accept-encoding", "gzip"),
        ]);
        assert_eq!(derive_fingerprint(&a), derive_fingerprint(&b));

        let c = headers(&[
            ("user-agent", "TestAgent/2.0"),
            ("accept-language", "en-US"),
            ("accept-encoding", "gzip"),
        ]);
        assert_ne!(derive_fingerprint(&a), derive_fingerprint(&c));
    }

    #[test]
    fn test_no_user_agent_means_no_fingerprint() {
        assert_eq!(derive_fingerprint(&headers(&[])), None);
    }

    #[test]
    fn test_explicit_fingerprint_wins() {
        let map = headers(&[("user-agent", "TestAgent/1.0")]);
        let metadata = extract_device_metadata(&map, Some("client-fp".to_string()));
        assert_eq!(metadata.fingerprint.as_deref(), Some("client-fp"));
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&map).as_deref(), Some("203.0.113.7"));

        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&map).as_deref(), Some("198.51.100.2"));
    }
}
