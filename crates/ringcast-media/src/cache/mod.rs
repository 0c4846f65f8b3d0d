//! Fixed-capacity circular GOP cache.
//!
//! The cache stores a continuous run of GOP records (12-byte header plus
//! opaque payload) in one contiguous buffer. `head` points at the oldest
//! complete record, `tail` just past the newest byte; the record at
//! `last_rap` is the one the producer is still appending to (its size field
//! reads zero until the next GOP starts). Reclamation only ever advances
//! `head` past whole records.
//!
//! A single mutex guards the control words and every buffer byte. Readers
//! copy ranges out under the lock and release it before touching any
//! socket, so hold time is bounded by the copy size.

mod record;
mod writer;

pub use record::GOP_HEADER_LEN;
pub use writer::{CacheWriter, ClosedGop};

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use record::{
    read_ring, read_size, read_timestamp, ring_distance, write_header, write_ring, write_size,
};

/// Default cache capacity: 64 MiB, matching a typical live encoder output.
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

/// Largest payload slice handed out per progressive read.
pub const MAX_CHUNK: usize = 16 * 1024;

struct CacheState {
    buf: Box<[u8]>,
    head: u64,
    tail: u64,
    last_rap: u64,
    total_written: u64,
}

/// Per-session read position inside a cache.
///
/// `rap` is the start of the record the cursor is inside; `position` the
/// next payload byte to deliver. Both are byte offsets into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCursor {
    pub rap: u64,
    pub position: u64,
}

/// Outcome of one forward read against the cache.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkRead {
    /// Next run of payload bytes, in order, headers skipped.
    Data(Vec<u8>),
    /// Caught up with the producer; nothing new yet.
    AtTail,
}

/// Circular encoder-output cache for one stream.
pub struct GopCache {
    capacity: u64,
    heartbeat: AtomicU64,
    state: Mutex<CacheState>,
}

impl GopCache {
    /// Create a cache of `capacity` bytes.
    ///
    /// The buffer starts with a single open record at offset zero so that
    /// output arriving before the first random access point has a home,
    /// mirroring how the producer side resets a stream.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 4 * GOP_HEADER_LEN as usize {
            return Err(Error::CapacityTooSmall(capacity));
        }
        if capacity > u32::MAX as usize {
            return Err(Error::BufferTooLarge {
                need: capacity,
                usable: u32::MAX as usize,
            });
        }
        let mut buf = vec![0u8; capacity].into_boxed_slice();
        write_header(&mut buf, 0, 0);
        Ok(Self {
            capacity: capacity as u64,
            heartbeat: AtomicU64::new(0),
            state: Mutex::new(CacheState {
                buf,
                head: 0,
                tail: GOP_HEADER_LEN,
                last_rap: 0,
                total_written: 0,
            }),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// True once the producer has appended at least one payload byte.
    pub fn is_ready(&self) -> bool {
        self.state.lock().total_written > 0
    }

    /// Total payload bytes ever appended. Diagnostic only.
    pub fn total_written(&self) -> u64 {
        self.state.lock().total_written
    }

    /// Last producer activity, nanoseconds since the Unix epoch.
    pub fn heartbeat(&self) -> u64 {
        self.heartbeat.load(Ordering::Relaxed)
    }

    pub fn head(&self) -> u64 {
        self.state.lock().head
    }

    pub fn tail(&self) -> u64 {
        self.state.lock().tail
    }

    pub fn last_rap(&self) -> u64 {
        self.state.lock().last_rap
    }

    /// Free bytes between `tail` and `head` around the ring.
    pub fn free_space(&self) -> u64 {
        let state = self.state.lock();
        self.free(&state)
    }

    fn free(&self, state: &CacheState) -> u64 {
        // head == tail cannot occur: construction opens a record, and
        // eviction stops at the open record, which always ends at tail.
        debug_assert_ne!(state.head, state.tail);
        ring_distance(self.capacity, state.tail, state.head)
    }

    /// Evict whole records from `head` until at least `needed` bytes plus
    /// one header of slack are free. The open record cannot be reclaimed;
    /// if eviction reaches it the caller retries after the producer closes
    /// it (`append` re-runs this once the next GOP has started).
    fn ensure_free(&self, state: &mut CacheState, needed: u64) {
        while self.free(state) < needed + GOP_HEADER_LEN {
            let size = read_size(&state.buf, state.head) as u64;
            if size == 0 {
                tracing::debug!(
                    needed,
                    free = self.free(state),
                    "eviction reached the open record"
                );
                break;
            }
            if size > self.capacity {
                tracing::error!(
                    head = state.head,
                    size,
                    "corrupt record size at head, refusing to evict"
                );
                break;
            }
            state.head = (state.head + size) % self.capacity;
        }
    }

    /// Make room for an `n`-byte write (payload plus header), evicting the
    /// oldest records as necessary.
    pub fn reserve(&self, n: usize) {
        let mut state = self.state.lock();
        self.ensure_free(&mut state, n as u64);
    }

    /// Open a new GOP at `tail`: patch the previous record's size field,
    /// move `last_rap`, and write a fresh header with `timestamp`.
    pub fn start_gop(&self, timestamp: u64) {
        let mut state = self.state.lock();
        self.ensure_free(&mut state, GOP_HEADER_LEN);
        let size = ring_distance(self.capacity, state.last_rap, state.tail);
        let rap = state.last_rap;
        write_size(&mut state.buf, rap, size as u32);
        state.last_rap = state.tail;
        let tail = state.tail;
        write_header(&mut state.buf, tail, timestamp);
        state.tail = (state.tail + GOP_HEADER_LEN) % self.capacity;
    }

    /// Append payload bytes to the open GOP, advancing `tail`.
    pub fn append(&self, payload: &[u8]) {
        let mut state = self.state.lock();
        self.ensure_free(&mut state, payload.len() as u64);
        if self.free(&state) < payload.len() as u64 + GOP_HEADER_LEN {
            // A single GOP larger than the cache; dropping the buffer beats
            // overwriting unevicted records.
            tracing::error!(
                len = payload.len(),
                free = self.free(&state),
                "payload cannot fit the cache, dropping"
            );
            return;
        }
        let tail = state.tail;
        write_ring(&mut state.buf, tail, payload);
        state.tail = (state.tail + payload.len() as u64) % self.capacity;
        state.total_written += payload.len() as u64;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.heartbeat.store(now, Ordering::Relaxed);
    }

    /// Timestamp of the record starting at `rap`.
    pub fn rap_timestamp(&self, rap: u64) -> u64 {
        let state = self.state.lock();
        read_timestamp(&state.buf, rap)
    }

    /// Size field of the record starting at `rap`. Zero means the record
    /// is still open, not that it is empty.
    pub fn gop_size(&self, rap: u64) -> u32 {
        let state = self.state.lock();
        read_size(&state.buf, rap)
    }

    /// Start address of the record following the one at `rap`.
    pub fn next_rap(&self, rap: u64) -> u64 {
        let state = self.state.lock();
        (rap + read_size(&state.buf, rap) as u64) % self.capacity
    }

    /// Find the record whose timestamp equals `ts`, scanning record
    /// addresses from `head` through `last_rap`.
    ///
    /// `Ok(None)` is the recoverable miss (evicted or not yet produced).
    /// A `head` outside the buffer is a violated invariant and comes back
    /// as an error after logging loudly.
    pub fn seek_timestamp(&self, ts: u64) -> Result<Option<u64>> {
        let state = self.state.lock();
        let mut rap = state.head;
        loop {
            if rap >= self.capacity {
                tracing::error!(rap, capacity = self.capacity, "record address out of range");
                return Err(Error::CorruptControlState {
                    head: rap,
                    capacity: self.capacity,
                });
            }
            if read_timestamp(&state.buf, rap) == ts {
                return Ok(Some(rap));
            }
            if rap == state.last_rap {
                return Ok(None);
            }
            let size = read_size(&state.buf, rap) as u64;
            if size == 0 {
                // Open record that is not last_rap: stale cursor state.
                return Ok(None);
            }
            rap = (rap + size) % self.capacity;
        }
    }

    /// Copy out the payload of the closed record at `rap`.
    ///
    /// `None` when the record is still open (its length is unknown) or the
    /// size field is nonsense.
    pub fn read_payload(&self, rap: u64) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let size = read_size(&state.buf, rap) as u64;
        if size <= GOP_HEADER_LEN || size > self.capacity {
            return None;
        }
        let mut payload = vec![0u8; (size - GOP_HEADER_LEN) as usize];
        read_ring(&state.buf, (rap + GOP_HEADER_LEN) % self.capacity, &mut payload);
        Some(payload)
    }

    /// Cursor positioned at the first payload byte of the GOP currently
    /// being written, for progressive playback.
    pub fn live_cursor(&self) -> ReadCursor {
        let state = self.state.lock();
        ReadCursor {
            rap: state.last_rap,
            position: (state.last_rap + GOP_HEADER_LEN) % self.capacity,
        }
    }

    /// Read up to `max` payload bytes forward from `cursor`, stopping at
    /// the next safe boundary: the producer's write position while the
    /// current GOP is open, or the end of the GOP when it is closed. At a
    /// GOP boundary the cursor hops over the next record header.
    ///
    /// The cursor advances with the returned bytes; repeated calls deliver
    /// payload in order with no gaps or duplicates as long as the cursor
    /// stays ahead of the eviction frontier.
    pub fn read_forward(&self, cursor: &mut ReadCursor, max: usize) -> ChunkRead {
        let state = self.state.lock();
        loop {
            let end = match read_size(&state.buf, cursor.rap) as u64 {
                0 => None,
                size => Some((cursor.rap + size) % self.capacity),
            };
            if end == Some(cursor.position) {
                // Current GOP fully delivered: continue after the next header.
                cursor.rap = cursor.position;
                cursor.position = (cursor.position + GOP_HEADER_LEN) % self.capacity;
                continue;
            }
            if cursor.position == state.tail {
                return ChunkRead::AtTail;
            }
            let bound = end.unwrap_or(state.tail);
            let run = ring_distance(self.capacity, cursor.position, bound);
            let len = (max as u64).min(run) as usize;
            let mut chunk = vec![0u8; len];
            read_ring(&state.buf, cursor.position, &mut chunk);
            cursor.position = (cursor.position + len as u64) % self.capacity;
            return ChunkRead::Data(chunk);
        }
    }
}

impl std::fmt::Debug for GopCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GopCache")
            .field("capacity", &self.capacity)
            .field("head", &state.head)
            .field("tail", &state.tail)
            .field("last_rap", &state.last_rap)
            .field("total_written", &state.total_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_gop(cache: &GopCache, ts: u64, payload: &[u8]) {
        cache.reserve(payload.len() + GOP_HEADER_LEN as usize);
        cache.start_gop(ts);
        cache.append(payload);
    }

    #[test]
    fn empty_cache_is_not_ready() {
        let cache = GopCache::new(1024).unwrap();
        assert!(!cache.is_ready());
        assert_eq!(cache.head(), 0);
        assert_eq!(cache.tail(), GOP_HEADER_LEN);
    }

    #[test]
    fn open_gop_size_reads_zero_until_next_starts() {
        let cache = GopCache::new(4096).unwrap();
        write_gop(&cache, 100, b"first");
        let rap = cache.seek_timestamp(100).unwrap().unwrap();
        assert_eq!(cache.gop_size(rap), 0);
        write_gop(&cache, 200, b"second");
        assert_eq!(cache.gop_size(rap) as u64, GOP_HEADER_LEN + 5);
    }

    #[test]
    fn seek_finds_exact_timestamp_only() {
        let cache = GopCache::new(4096).unwrap();
        write_gop(&cache, 100, b"aaaa");
        write_gop(&cache, 200, b"bbbb");
        write_gop(&cache, 300, b"cccc");
        assert!(cache.seek_timestamp(100).unwrap().is_some());
        assert!(cache.seek_timestamp(200).unwrap().is_some());
        assert!(cache.seek_timestamp(300).unwrap().is_some());
        assert!(cache.seek_timestamp(150).unwrap().is_none());
        assert!(cache.seek_timestamp(999).unwrap().is_none());
    }

    #[test]
    fn payload_roundtrip_with_wrapping_records() {
        // Capacity chosen so records repeatedly straddle the wrap boundary.
        let cache = GopCache::new(256).unwrap();
        for i in 0u64..40 {
            let payload: Vec<u8> = (0..50).map(|b| (i as u8).wrapping_add(b)).collect();
            write_gop(&cache, 1000 + i, &payload);
            // Closing the record happens on the next start_gop; check the
            // previous one read back intact.
            if i > 0 {
                if let Some(rap) = cache.seek_timestamp(1000 + i - 1).unwrap() {
                    let expect: Vec<u8> =
                        (0..50).map(|b| ((i - 1) as u8).wrapping_add(b)).collect();
                    assert_eq!(cache.read_payload(rap).unwrap(), expect);
                }
            }
        }
    }

    #[test]
    fn reserve_evicts_oldest_complete_records() {
        let cache = GopCache::new(1024).unwrap();
        for i in 0u64..8 {
            write_gop(&cache, i, &[i as u8; 100]);
        }
        // Oldest timestamps fell off; head still points at a record start.
        assert!(cache.seek_timestamp(0).unwrap().is_none());
        let head = cache.head();
        let ts = cache.rap_timestamp(head);
        assert_eq!(cache.seek_timestamp(ts).unwrap(), Some(head));
        // Requested space is available after any reserve.
        cache.reserve(300);
        assert!(cache.free_space() >= 300);
    }

    #[test]
    fn eviction_scenario_two_large_gops() {
        // Capacity 1024: GOP A (ts=100, 900 bytes) then GOP B (ts=200,
        // 900 bytes) must evict A entirely.
        let cache = GopCache::new(1024).unwrap();
        write_gop(&cache, 100, &[0xAA; 900]);
        write_gop(&cache, 200, &[0xBB; 900]);

        let b = cache.seek_timestamp(200).unwrap().expect("B present");
        assert_eq!(cache.head(), b);
        assert!(cache.seek_timestamp(100).unwrap().is_none());
        // B is still the open record.
        assert_eq!(cache.gop_size(b), 0);
    }

    #[test]
    fn read_forward_streams_payloads_in_order() {
        let cache = GopCache::new(4096).unwrap();
        write_gop(&cache, 1, b"alpha");
        let mut cursor = cache.live_cursor();
        // Open GOP: data up to tail.
        assert_eq!(cache.read_forward(&mut cursor, 4096), ChunkRead::Data(b"alpha".to_vec()));
        assert_eq!(cache.read_forward(&mut cursor, 4096), ChunkRead::AtTail);
        // Close it, append more: the cursor hops the next header.
        write_gop(&cache, 2, b"beta");
        assert_eq!(cache.read_forward(&mut cursor, 4096), ChunkRead::Data(b"beta".to_vec()));
        assert_eq!(cache.read_forward(&mut cursor, 4096), ChunkRead::AtTail);
    }

    #[test]
    fn read_forward_respects_max_chunk() {
        let cache = GopCache::new(8192).unwrap();
        let payload = vec![7u8; 5000];
        write_gop(&cache, 1, &payload);
        let mut cursor = cache.live_cursor();
        let mut got = Vec::new();
        loop {
            match cache.read_forward(&mut cursor, 1024) {
                ChunkRead::Data(chunk) => {
                    assert!(chunk.len() <= 1024);
                    got.extend_from_slice(&chunk);
                }
                ChunkRead::AtTail => break,
            }
        }
        assert_eq!(got, payload);
    }

    #[test]
    fn read_forward_across_wrap_boundary() {
        let cache = GopCache::new(512).unwrap();
        // Fill past the boundary with several GOPs, then stream the last
        // two from a cursor taken before they were closed.
        for i in 0u64..5 {
            write_gop(&cache, i, &[i as u8; 120]);
        }
        let mut cursor = cache.live_cursor();
        write_gop(&cache, 5, &[5u8; 120]);
        let mut got = Vec::new();
        loop {
            match cache.read_forward(&mut cursor, 64) {
                ChunkRead::Data(chunk) => got.extend_from_slice(&chunk),
                ChunkRead::AtTail => break,
            }
        }
        // Remainder of GOP 4 (already consumed position starts at its
        // first payload byte) then all of GOP 5.
        let mut expect = vec![4u8; 120];
        expect.extend_from_slice(&[5u8; 120]);
        assert_eq!(got, expect);
    }

    #[test]
    fn total_written_is_monotonic() {
        let cache = GopCache::new(1024).unwrap();
        write_gop(&cache, 1, &[0; 100]);
        write_gop(&cache, 2, &[0; 100]);
        assert_eq!(cache.total_written(), 200);
    }
}
