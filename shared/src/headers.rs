//! Header rewriting for traffic forwarded to and from an origin server.

use http::header::{
    CONNECTION, HeaderMap, HeaderName, HeaderValue, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE,
    TRAILER, TRANSFER_ENCODING, UPGRADE, VIA,
};
use http::Version;

/// Token appended to `Via` by this service.
pub const VIA_TOKEN: &str = "funnel";

static HOP_BY_HOP: &[HeaderName] = &[
    CONNECTION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
];

fn via_protocol(version: Version) -> Option<&'static str> {
    match version {
        Version::HTTP_09 => Some("0.9"),
        Version::HTTP_10 => Some("1.0"),
        Version::HTTP_11 => Some("1.1"),
        Version::HTTP_2 => Some("2"),
        Version::HTTP_3 => Some("3"),
        _ => None,
    }
}

/// Appends `<protocol> funnel` to the `Via` header, creating it if needed.
pub fn add_via_header(headers: &mut HeaderMap, version: Version) {
    let Some(protocol) = via_protocol(version) else {
        tracing::warn!(?version, "Not adding Via header for unknown HTTP version");
        return;
    };

    let hop = format!("{protocol} {VIA_TOKEN}");
    let value = match headers.get(VIA).map(HeaderValue::to_str) {
        Some(Ok(existing)) => format!("{existing}, {hop}"),
        // Leave a Via we cannot parse as it is.
        Some(Err(_)) => return,
        None => hop,
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(VIA, value);
    }
}

/// Strips connection-scoped headers before a message crosses the proxy. Only
/// HTTP/1.x carries them; later versions are left untouched.
pub fn filter_hop_by_hop(headers: &mut HeaderMap, version: Version) {
    if !matches!(
        version,
        Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11
    ) {
        return;
    }

    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(&listed) {
        headers.remove(name);
    }

    if matches!(version, Version::HTTP_09 | Version::HTTP_10) {
        headers.remove("keep-alive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn test_filter_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, X-Trace"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-trace", HeaderValue::from_static("abc"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));

        filter_hop_by_hop(&mut headers, Version::HTTP_11);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[CONTENT_TYPE], "text/html");
    }

    #[test]
    fn test_filter_reads_every_connection_header() {
        let mut headers = HeaderMap::new();
        headers.append(CONNECTION, HeaderValue::from_static("x-one"));
        headers.append(CONNECTION, HeaderValue::from_static("x-two"));
        headers.insert("x-one", HeaderValue::from_static("1"));
        headers.insert("x-two", HeaderValue::from_static("2"));
        headers.insert("x-three", HeaderValue::from_static("3"));

        filter_hop_by_hop(&mut headers, Version::HTTP_10);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-three"));
    }

    #[test]
    fn test_http2_headers_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(TE, HeaderValue::from_static("trailers"));
        filter_hop_by_hop(&mut headers, Version::HTTP_2);
        assert!(headers.contains_key(TE));
    }

    #[test]
    fn test_via_header_appends() {
        let mut headers = HeaderMap::new();
        add_via_header(&mut headers, Version::HTTP_11);
        assert_eq!(headers[VIA], "1.1 funnel");

        add_via_header(&mut headers, Version::HTTP_2);
        assert_eq!(headers[VIA], "1.1 funnel, 2 funnel");
    }
}
