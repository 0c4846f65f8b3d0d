//! GOP record header codec and wrap-aware ring copies.
//!
//! Every record in the cache is a 12-byte header followed by the raw
//! payload: bytes [0..8) are the presentation timestamp, bytes [8..12) the
//! total record size including the header. A size of zero marks the record
//! still being appended to. Records wrap around the buffer end byte by
//! byte, so every field access here goes through a split copy.

/// Record header length: 8-byte timestamp plus 4-byte size.
pub const GOP_HEADER_LEN: u64 = 12;

/// Copy `src` into the ring at `at`, splitting at the wrap boundary.
pub(super) fn write_ring(buf: &mut [u8], at: u64, src: &[u8]) {
    let cap = buf.len() as u64;
    let at = (at % cap) as usize;
    let first = src.len().min(buf.len() - at);
    buf[at..at + first].copy_from_slice(&src[..first]);
    if first < src.len() {
        buf[..src.len() - first].copy_from_slice(&src[first..]);
    }
}

/// Copy `dst.len()` bytes out of the ring starting at `at`.
pub(super) fn read_ring(buf: &[u8], at: u64, dst: &mut [u8]) {
    let cap = buf.len() as u64;
    let at = (at % cap) as usize;
    let first = dst.len().min(buf.len() - at);
    dst[..first].copy_from_slice(&buf[at..at + first]);
    if first < dst.len() {
        let rest = dst.len() - first;
        dst[first..].copy_from_slice(&buf[..rest]);
    }
}

/// Read the timestamp field of the record starting at `rap`.
pub(super) fn read_timestamp(buf: &[u8], rap: u64) -> u64 {
    let mut raw = [0u8; 8];
    read_ring(buf, rap, &mut raw);
    u64::from_le_bytes(raw)
}

/// Read the size field of the record starting at `rap`.
pub(super) fn read_size(buf: &[u8], rap: u64) -> u32 {
    let mut raw = [0u8; 4];
    read_ring(buf, (rap + 8) % buf.len() as u64, &mut raw);
    u32::from_le_bytes(raw)
}

/// Patch the size field of the record starting at `rap`.
pub(super) fn write_size(buf: &mut [u8], rap: u64, size: u32) {
    write_ring(buf, (rap + 8) % buf.len() as u64, &size.to_le_bytes());
}

/// Write a fresh record header (size zero, still open) at `at`.
pub(super) fn write_header(buf: &mut [u8], at: u64, timestamp: u64) {
    let mut raw = [0u8; GOP_HEADER_LEN as usize];
    raw[..8].copy_from_slice(&timestamp.to_le_bytes());
    write_ring(buf, at, &raw);
}

/// Forward distance from `from` to `to` around the ring.
pub(super) fn ring_distance(cap: u64, from: u64, to: u64) -> u64 {
    (to + cap - from) % cap
}
