//! Incremental HTTP/1.x request parsing.
//!
//! Requests arrive in arbitrary TCP fragments into a session's fixed
//! buffer; parsing either completes, asks for more bytes, or rejects the
//! request. Only the request line is interpreted; headers beyond
//! `Content-Length` (needed to know when a body is complete) are skipped.

const MAX_PATH_LEN: usize = 255;
const MAX_QUERY_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

/// A parsed request line.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version: HttpVersion,
    pub header_len: usize,
}

/// Result of parsing the bytes received so far.
#[derive(Debug)]
pub enum ParseStatus {
    Complete(Request),
    /// Header or body not fully received yet.
    Partial,
    Invalid(&'static str),
}

/// Parse the request accumulated in `buf`.
pub fn parse_request(buf: &[u8]) -> ParseStatus {
    let header_end = match find_header_end(buf) {
        Some(end) => end,
        None => return ParseStatus::Partial,
    };
    let header = match std::str::from_utf8(&buf[..header_end]) {
        Ok(header) => header,
        Err(_) => return ParseStatus::Invalid("request header is not valid UTF-8"),
    };

    // Wait for the full body when the client announced one.
    if let Some(content_length) = parse_content_length(header) {
        if header_end + content_length > buf.len() {
            return ParseStatus::Partial;
        }
    }

    let request_line = match header.lines().next() {
        Some(line) => line,
        None => return ParseStatus::Invalid("empty request"),
    };
    let mut parts = request_line.split_whitespace();

    let method = match parts.next() {
        Some("GET") => Method::Get,
        Some("POST") => Method::Post,
        _ => return ParseStatus::Invalid("unsupported method"),
    };

    let target = match parts.next() {
        Some(target) => target,
        None => return ParseStatus::Invalid("missing request target"),
    };
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    if path.is_empty() || !path.starts_with('/') || path.len() > MAX_PATH_LEN {
        return ParseStatus::Invalid("bad request path");
    }
    if query.len() > MAX_QUERY_LEN {
        return ParseStatus::Invalid("query string too long");
    }

    let version = match parts.next() {
        Some("HTTP/1.1") => HttpVersion::V1_1,
        Some("HTTP/1.0") => HttpVersion::V1_0,
        _ => return ParseStatus::Invalid("unsupported HTTP version"),
    };

    ParseStatus::Complete(Request {
        method,
        path: path.to_string(),
        query: query.to_string(),
        version,
        header_len: header_end,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_content_length(header: &str) -> Option<usize> {
    for line in header.lines().skip(1) {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("content-length") {
            return value.trim().parse().ok();
        }
    }
    None
}
