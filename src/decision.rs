//! Whether an exchange should be compressed or decompressed.

use crate::policy::ExclusionPolicy;
use http::header::{self, HeaderMap, HeaderName};
use http::{StatusCode, Uri};

/// Which side of the exchange is being compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A server compressing a buffered response. Requires the peer to accept gzip.
    Response,
    /// A server compressing a streamed response. The `Accept-Encoding` check
    /// happens when the stream writer is created.
    StreamingResponse,
    /// A client compressing its own request body.
    Request,
}

/// Decides whether the exchange described by `headers` and `uri` is eligible
/// for compression.
///
/// `headers` are always the request headers: the server inspects what the
/// peer sent, the client inspects what it is about to send.
pub fn should_compress(
    direction: Direction,
    headers: &HeaderMap,
    uri: &Uri,
    policy: &ExclusionPolicy,
) -> bool {
    if header_contains(headers, &header::CONNECTION, "upgrade") {
        tracing::debug!(%uri, "skipping gzip for connection upgrade");
        return false;
    }
    if header_contains(headers, &header::ACCEPT, "text/event-stream") {
        tracing::debug!(%uri, "skipping gzip for event stream");
        return false;
    }
    if direction == Direction::Response && !accepts_gzip(headers) {
        return false;
    }

    let path = uri.path();
    let target = uri.path_and_query().map_or(path, |pq| pq.as_str());
    if policy.excludes(path, target) {
        tracing::debug!(%uri, "skipping gzip for excluded path");
        return false;
    }
    true
}

/// Returns true if `Accept-Encoding` mentions gzip.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    header_contains(headers, &header::ACCEPT_ENCODING, "gzip")
}

/// Returns true if `Content-Encoding` declares a gzip payload.
pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

/// Returns true if a response with `status` never carries a body.
pub fn is_bodiless(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Returns true if the response carries only part of the entity.
pub fn has_content_range(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_RANGE)
}

fn header_contains(headers: &HeaderMap, name: &HeaderName, needle: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| contains_ignore_ascii_case(v, needle))
}

fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}
