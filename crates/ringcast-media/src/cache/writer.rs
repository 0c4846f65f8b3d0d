//! Single-writer producer interface.
//!
//! The encoder pipeline calls [`CacheWriter::write`] once per encoded
//! output buffer. The writer composes the cache's producer contract
//! (`reserve`, `start_gop` on random access points, `append`) and reports
//! each segment it closes so the job layer can extend the stream's live
//! playlist.

use super::{GopCache, GOP_HEADER_LEN};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// A segment closed by the arrival of the next random access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedGop {
    /// Timestamp the closed GOP was started with.
    pub timestamp: u64,
    /// Wall duration covered, from consecutive RAP timestamps.
    pub duration: Duration,
}

/// Producer-side handle for one stream's cache. Exactly one writer exists
/// per cache; all mutating traffic goes through it.
pub struct CacheWriter {
    cache: Arc<GopCache>,
    /// Timestamp units per second, for converting GOP spans to durations.
    timescale: u32,
    last_rap_timestamp: Option<u64>,
}

impl CacheWriter {
    pub fn new(cache: Arc<GopCache>, timescale: u32) -> Self {
        Self {
            cache,
            timescale: timescale.max(1),
            last_rap_timestamp: None,
        }
    }

    pub fn cache(&self) -> &Arc<GopCache> {
        &self.cache
    }

    /// Append one encoded buffer.
    ///
    /// `random_access` marks the buffer as the start of a new GOP; the
    /// previous GOP is closed at that moment and returned so the caller
    /// can announce the finished segment.
    pub fn write(
        &mut self,
        payload: &[u8],
        timestamp: u64,
        random_access: bool,
    ) -> Result<Option<ClosedGop>> {
        let need = payload.len() + GOP_HEADER_LEN as usize;
        let usable = self.cache.capacity() as usize - 2 * GOP_HEADER_LEN as usize;
        if need > usable {
            return Err(Error::BufferTooLarge { need, usable });
        }

        self.cache.reserve(need);
        let mut closed = None;
        if random_access {
            self.cache.start_gop(timestamp);
            if let Some(prev) = self.last_rap_timestamp.replace(timestamp) {
                let span = timestamp.saturating_sub(prev);
                closed = Some(ClosedGop {
                    timestamp: prev,
                    duration: Duration::from_secs_f64(span as f64 / self.timescale as f64),
                });
            }
        }
        self.cache.append(payload);
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_previous_gop_on_new_rap() {
        let cache = Arc::new(GopCache::new(4096).unwrap());
        let mut writer = CacheWriter::new(cache.clone(), 1000);

        assert_eq!(writer.write(b"head", 1000, true).unwrap(), None);
        assert_eq!(writer.write(b"more", 1000, false).unwrap(), None);
        let closed = writer.write(b"next", 4000, true).unwrap().unwrap();
        assert_eq!(closed.timestamp, 1000);
        assert_eq!(closed.duration, Duration::from_secs(3));

        let rap = cache.seek_timestamp(1000).unwrap().unwrap();
        assert_eq!(cache.read_payload(rap).unwrap(), b"headmore");
    }

    #[test]
    fn rejects_buffer_larger_than_cache() {
        let cache = Arc::new(GopCache::new(256).unwrap());
        let mut writer = CacheWriter::new(cache, 1000);
        let huge = vec![0u8; 512];
        assert!(matches!(
            writer.write(&huge, 1, true),
            Err(Error::BufferTooLarge { .. })
        ));
    }

    #[test]
    fn heartbeat_advances_on_write() {
        let cache = Arc::new(GopCache::new(1024).unwrap());
        let mut writer = CacheWriter::new(cache.clone(), 1000);
        assert_eq!(cache.heartbeat(), 0);
        writer.write(b"x", 1, true).unwrap();
        assert!(cache.heartbeat() > 0);
    }
}
