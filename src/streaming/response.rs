//! HTTP response assembly.
//!
//! Responses are built as complete byte buffers up front; the write path
//! retries partial sends, so nothing here touches a socket.

use bytes::Bytes;

pub const CONTENT_TYPE_MPEG: &str = "video/mpeg";
pub const CONTENT_TYPE_M3U8: &str = "application/vnd.apple.mpegurl";
pub const CONTENT_TYPE_XML: &str = "text/xml";

pub const NO_CACHE: &str = "no-cache";
pub const CACHE_60S: &str = "max-age=60";

const SERVER: &str = concat!("ringcast-", env!("CARGO_PKG_VERSION"));

/// Flash cross-domain policy, served for any `crossdomain.xml` request.
pub const CROSSDOMAIN_POLICY: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<cross-domain-policy>\n\
    <allow-access-from domain=\"*\"/>\n\
</cross-domain-policy>\n";

/// 200 response with a full body and exact Content-Length.
pub fn ok(content_type: &str, cache_control: &str, body: &[u8]) -> Bytes {
    let header = format!(
        "HTTP/1.1 200 Ok\r\n\
         Server: {SERVER}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Cache-Control: {cache_control}\r\n\
         Connection: close\r\n\r\n",
        body.len()
    );
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body);
    Bytes::from(buf)
}

/// Response head for an open-ended progressive stream.
pub fn chunked_preamble() -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 200 OK\r\n\
         Server: {SERVER}\r\n\
         Content-Type: {CONTENT_TYPE_MPEG}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Pragma: no-cache\r\n\
         Cache-Control: no-cache, no-store, must-revalidate\r\n\
         Connection: close\r\n\
         Transfer-Encoding: chunked\r\n\r\n"
    ))
}

/// One chunked-transfer frame: hex size line, payload, trailer.
pub fn chunk_frame(payload: &[u8]) -> Vec<u8> {
    let size_line = format!("{:x}\r\n", payload.len());
    let mut frame = Vec::with_capacity(size_line.len() + payload.len() + 2);
    frame.extend_from_slice(size_line.as_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(b"\r\n");
    frame
}

pub fn not_found() -> Bytes {
    let body = "<h1>Not found</h1>";
    Bytes::from(format!(
        "HTTP/1.1 404 Not Found\r\n\
         Server: {SERVER}\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    ))
}

pub fn internal_error() -> Bytes {
    let body = "<h1>Internal Server Error</h1>";
    Bytes::from(format!(
        "HTTP/1.1 500 Internal Server Error\r\n\
         Server: {SERVER}\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    ))
}
