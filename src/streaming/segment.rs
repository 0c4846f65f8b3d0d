//! Single-segment fetch: one closed GOP as a complete HTTP response.

use crate::state::StreamOutput;
use crate::streaming::response;
use bytes::Bytes;

/// Parse the timestamp out of a `<timestamp>.ts` path segment.
pub fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_suffix(".ts")?.parse().ok()
}

/// Build the full response for a segment request: the GOP payload with an
/// exact Content-Length on a hit, 404 when the timestamp is not resolvable
/// (evicted, never produced, or still open), 500 on corrupt cache state.
pub fn segment_response(stream: &StreamOutput, timestamp: u64) -> Bytes {
    let rap = match stream.cache().seek_timestamp(timestamp) {
        Ok(Some(rap)) => rap,
        Ok(None) => {
            tracing::debug!(stream = %stream.name(), timestamp, "segment not in cache");
            return response::not_found();
        }
        Err(e) => {
            tracing::error!(stream = %stream.name(), error = %e, "segment seek failed");
            return response::internal_error();
        }
    };
    match stream.cache().read_payload(rap) {
        Some(payload) => response::ok(response::CONTENT_TYPE_MPEG, response::CACHE_60S, &payload),
        // Open GOP: its length is unknown until the next one starts.
        None => response::not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StreamOutput;
    use ringcast_media::{CacheWriter, GopCache};
    use std::sync::Arc;

    fn stream_with_segments() -> StreamOutput {
        let cache = Arc::new(GopCache::new(64 * 1024).unwrap());
        let mut writer = CacheWriter::new(Arc::clone(&cache), 1000);
        writer.write(b"segment-one", 1000, true).unwrap();
        writer.write(b"segment-two", 2000, true).unwrap();
        StreamOutput::new("hd", cache, None)
    }

    #[test]
    fn parses_timestamp_from_name() {
        assert_eq!(parse_segment_name("1422000000.ts"), Some(1_422_000_000));
        assert_eq!(parse_segment_name("abc.ts"), None);
        assert_eq!(parse_segment_name("1000"), None);
    }

    #[test]
    fn closed_segment_served_with_exact_length() {
        let stream = stream_with_segments();
        let body = segment_response(&stream, 1000);
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains("Content-Type: video/mpeg\r\n"));
        assert!(text.ends_with("segment-one"));
    }

    #[test]
    fn open_segment_is_not_found() {
        let stream = stream_with_segments();
        // Timestamp 2000 is the GOP still being written.
        let body = segment_response(&stream, 2000);
        assert!(String::from_utf8_lossy(&body).starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn unknown_timestamp_is_not_found() {
        let stream = stream_with_segments();
        let body = segment_response(&stream, 555);
        assert!(String::from_utf8_lossy(&body).starts_with("HTTP/1.1 404"));
    }
}
