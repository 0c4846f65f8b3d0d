//! Progressive chunked playback.
//!
//! A progressive session owns a cursor into its stream's cache and is
//! re-invoked by the engine: each step flushes whatever is pending, then
//! frames at most one new chunk. Chunks stop at the next safe boundary
//! (the producer's write position while the GOP is open, the GOP end once
//! closed) and never exceed 16 KiB. Delays are jittered so a crowd of
//! viewers does not wake in lockstep.

use crate::server::{try_send, Outcome};
use crate::state::{AccessGuard, StreamOutput};
use crate::streaming::response;
use rand::Rng;
use ringcast_media::cache::MAX_CHUNK;
use ringcast_media::{ChunkRead, ReadCursor};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Wait when the cursor has caught up with the producer.
const NO_DATA_DELAY: Duration = Duration::from_millis(100);
const NO_DATA_JITTER_MS: u64 = 400;

/// Pause after a fully delivered chunk before framing the next.
const CHUNK_GAP: Duration = Duration::from_millis(10);

/// Retry delay after a partial send that still made progress.
const PARTIAL_RETRY: Duration = Duration::from_millis(200);

const SMALL_JITTER_MS: u64 = 1;

fn jittered(base: Duration, jitter_ms: u64) -> Duration {
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// Buffer mid-delivery: the response preamble or one chunk frame.
struct Pending {
    buf: Vec<u8>,
    sent: usize,
}

enum Flush {
    Sent,
    Progressed,
    WouldBlock,
    Failed,
}

/// Per-session state of one open-ended stream.
pub struct ProgressiveStream {
    stream: Arc<StreamOutput>,
    /// Job age at session start; a restart ends the stream.
    job_age: u64,
    /// None until the preamble is out; positioned at the live GOP then.
    cursor: Option<ReadCursor>,
    pending: Option<Pending>,
    access: AccessGuard,
}

impl ProgressiveStream {
    pub fn new(stream: Arc<StreamOutput>, access: AccessGuard) -> Self {
        let job_age = access.job().age();
        Self {
            stream,
            job_age,
            cursor: None,
            pending: Some(Pending {
                buf: response::chunked_preamble().to_vec(),
                sent: 0,
            }),
            access,
        }
    }

    /// One engine step. Returns the outcome plus bytes written, so the
    /// caller can account them on the session.
    pub fn step(&mut self, io: &TcpStream) -> (Outcome, u64) {
        let mut written = 0u64;

        if self.pending.is_some() {
            match self.flush(io, &mut written) {
                Flush::Sent => {
                    if self.cursor.is_none() {
                        // Preamble delivered: start at the GOP currently
                        // being written.
                        self.cursor = Some(self.stream.cache().live_cursor());
                        return (Outcome::Idle(Duration::ZERO), written);
                    }
                    return (Outcome::Idle(jittered(CHUNK_GAP, SMALL_JITTER_MS)), written);
                }
                Flush::Progressed => {
                    return (Outcome::Idle(jittered(PARTIAL_RETRY, SMALL_JITTER_MS)), written)
                }
                Flush::WouldBlock => return (Outcome::Block, written),
                Flush::Failed => return (Outcome::Done, written),
            }
        }

        if self.access.job().age() != self.job_age || !self.access.job().is_playing() {
            tracing::debug!(job = %self.access.job().name(), "producer restarted or stopped, ending stream");
            return (Outcome::Done, written);
        }

        let cursor = match self.cursor.as_mut() {
            Some(cursor) => cursor,
            None => return (Outcome::Done, written),
        };
        match self.stream.cache().read_forward(cursor, MAX_CHUNK) {
            ChunkRead::AtTail => (
                Outcome::Idle(jittered(NO_DATA_DELAY, NO_DATA_JITTER_MS)),
                written,
            ),
            ChunkRead::Data(payload) => {
                self.pending = Some(Pending {
                    buf: response::chunk_frame(&payload),
                    sent: 0,
                });
                let outcome = match self.flush(io, &mut written) {
                    Flush::Sent => Outcome::Idle(jittered(CHUNK_GAP, SMALL_JITTER_MS)),
                    Flush::Progressed => Outcome::Idle(jittered(PARTIAL_RETRY, SMALL_JITTER_MS)),
                    Flush::WouldBlock => Outcome::Block,
                    Flush::Failed => Outcome::Done,
                };
                (outcome, written)
            }
        }
    }

    fn flush(&mut self, io: &TcpStream, written: &mut u64) -> Flush {
        let pending = match self.pending.as_mut() {
            Some(pending) => pending,
            None => return Flush::Sent,
        };
        let before = pending.sent;
        match try_send(io, &pending.buf, &mut pending.sent) {
            Ok(true) => {
                *written += (pending.sent - before) as u64;
                self.pending = None;
                Flush::Sent
            }
            Ok(false) => {
                let progressed = pending.sent > before;
                *written += (pending.sent - before) as u64;
                if progressed {
                    Flush::Progressed
                } else {
                    Flush::WouldBlock
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "socket write failed, ending stream");
                Flush::Failed
            }
        }
    }
}
