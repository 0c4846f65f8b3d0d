//! Request sessions and the pre-allocated session pool.
//!
//! The server never allocates a session at connection time: slots are
//! drawn from a fixed free list and recycled on every exit path. A session
//! owns the transport state; the protocol state slot belongs to whatever
//! dispatcher the server runs and is dropped wholesale on recycle, which
//! is what releases per-session resources (access guards, pending
//! buffers).

use super::request::Request;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;

/// Size of the reusable raw-request buffer per session.
pub const REQUEST_BUFFER_SIZE: usize = 16 * 1024;

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Accepted, no bytes processed yet.
    Connected,
    /// Reading and parsing the request.
    Request,
    /// Woken up to run another dispatch step.
    Continue,
    /// Parked until a scheduled wake time.
    Idle,
    /// Parked on socket readiness, with a hard deadline.
    Blocked,
    /// Finished; about to be recycled.
    Finished,
}

/// Result of draining readable bytes into the request buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// Drained everything currently available.
    Progress,
    /// Peer sent FIN.
    Closed,
    /// Request exceeded the fixed buffer.
    TooLarge,
    /// Hard socket error.
    Failed,
}

/// One HTTP connection being served.
pub struct Session<S> {
    id: usize,
    pub io: Option<Arc<TcpStream>>,
    pub peer: Option<SocketAddr>,
    pub status: SessionStatus,
    pub birth: Instant,
    pub bytes_sent: u64,
    pub request: Option<Request>,
    /// Dispatcher-owned state; opaque to the server.
    pub protocol: Option<S>,
    buf: Box<[u8]>,
    read_len: usize,
}

impl<S> Session<S> {
    fn new(id: usize) -> Self {
        Self {
            id,
            io: None,
            peer: None,
            status: SessionStatus::Connected,
            birth: Instant::now(),
            bytes_sent: 0,
            request: None,
            protocol: None,
            buf: vec![0u8; REQUEST_BUFFER_SIZE].into_boxed_slice(),
            read_len: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Bind an accepted connection to this slot.
    pub fn attach(&mut self, io: Arc<TcpStream>, peer: SocketAddr) {
        self.io = Some(io);
        self.peer = Some(peer);
        self.status = SessionStatus::Connected;
        self.birth = Instant::now();
        self.bytes_sent = 0;
        self.read_len = 0;
    }

    /// Bytes received so far for the current request.
    pub fn received(&self) -> &[u8] {
        &self.buf[..self.read_len]
    }

    /// Drain whatever the socket has into the request buffer without
    /// blocking.
    pub fn fill_request_buffer(&mut self) -> FillOutcome {
        let io = match &self.io {
            Some(io) => io,
            None => return FillOutcome::Failed,
        };
        loop {
            if self.read_len == self.buf.len() {
                return FillOutcome::TooLarge;
            }
            match io.try_read(&mut self.buf[self.read_len..]) {
                Ok(0) => return FillOutcome::Closed,
                Ok(n) => self.read_len += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return FillOutcome::Progress;
                }
                Err(e) => {
                    tracing::debug!(session = self.id, error = %e, "socket read error");
                    return FillOutcome::Failed;
                }
            }
        }
    }

    /// Probe a parked session's socket: detects a peer FIN, discards any
    /// unexpected extra bytes.
    pub fn peer_hung_up(&self) -> bool {
        let io = match &self.io {
            Some(io) => io,
            None => return true,
        };
        let mut scratch = [0u8; 1024];
        loop {
            match io.try_read(&mut scratch) {
                Ok(0) => return true,
                Ok(_) => {
                    tracing::debug!(session = self.id, "unexpected bytes from client, ignoring");
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return false,
                Err(_) => return true,
            }
        }
    }

    /// Clear per-request state so the slot can serve a new connection.
    /// Dropping `protocol` releases everything the dispatcher held.
    fn reset(&mut self) {
        self.io = None;
        self.peer = None;
        self.status = SessionStatus::Connected;
        self.bytes_sent = 0;
        self.request = None;
        self.protocol = None;
        self.read_len = 0;
    }
}

/// Fixed-size free list of session slots.
pub struct SessionPool<S> {
    free: Mutex<Vec<Session<S>>>,
    capacity: usize,
}

impl<S> SessionPool<S> {
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity).map(Session::new).collect();
        Self {
            free: Mutex::new(free),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a free slot; `None` means the server is at its session limit
    /// and the connection must be refused.
    pub fn checkout(&self) -> Option<Session<S>> {
        self.free.lock().pop()
    }

    /// Return a finished session to the free list.
    pub fn recycle(&self, mut session: Session<S>) {
        session.reset();
        self.free.lock().push(session);
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_hands_out_fixed_slots() {
        let pool: SessionPool<()> = SessionPool::new(2);
        let first = pool.checkout().unwrap();
        let _second = pool.checkout().unwrap();
        assert!(pool.checkout().is_none());
        pool.recycle(first);
        assert!(pool.checkout().is_some());
    }

    #[test]
    fn recycle_clears_session_state() {
        let pool: SessionPool<u32> = SessionPool::new(1);
        let mut session = pool.checkout().unwrap();
        session.protocol = Some(7);
        session.bytes_sent = 99;
        session.status = SessionStatus::Finished;
        pool.recycle(session);

        let session = pool.checkout().unwrap();
        assert!(session.protocol.is_none());
        assert_eq!(session.bytes_sent, 0);
        assert_eq!(session.status, SessionStatus::Connected);
    }
}
