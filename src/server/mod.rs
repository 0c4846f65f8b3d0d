//! Event-driven HTTP delivery engine.
//!
//! One accept loop hands connections to a fixed pool of session slots;
//! readiness and timers ride the tokio reactor. A bounded set of worker
//! tasks drains the work queue, running at most one dispatch step per
//! submission and never blocking on a socket: every read and write is a
//! non-blocking attempt, and a session that cannot make progress is parked
//! in the idle queue (timed wake) or the blocked list (readiness wake).
//!
//! The engine is protocol-agnostic: everything HTTP-specific beyond
//! request parsing lives behind the [`Dispatch`] trait.

pub mod request;
pub mod scheduler;
pub mod session;

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use scheduler::{BlockedList, IdleQueue};
use session::{FillOutcome, SessionPool};
pub use session::{Session, SessionStatus};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Sent when the request line cannot be parsed. Everything richer comes
/// from the dispatcher.
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\
Content-Type: text/html\r\n\
Content-Length: 20\r\n\
Connection: close\r\n\r\n\
<h1>Bad Request</h1>";

/// What a dispatch step wants next for its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Re-invoke after roughly this long.
    Idle(Duration),
    /// Re-invoke when the socket is writable, or after the block timeout.
    Block,
    /// Stream over; recycle the session.
    Done,
}

/// Protocol logic invoked once per session wake.
///
/// Implementations own `Session::protocol` and must only touch the socket
/// through non-blocking writes; "not ready" is expressed through the
/// returned [`Outcome`], never by waiting.
pub trait Dispatch: Send + Sync + 'static {
    type State: Send + 'static;

    fn dispatch(&self, session: &mut Session<Self::State>) -> Outcome;
}

struct Shared<D: Dispatch> {
    dispatcher: D,
    pool: SessionPool<D::State>,
    idle: Arc<IdleQueue<D::State>>,
    blocked: Arc<BlockedList<D::State>>,
    work_tx: UnboundedSender<Session<D::State>>,
    /// Connections accepted, including ones answered with one response.
    accepted_total: AtomicU64,
    /// Requests that turned into scheduled streaming sessions.
    streaming_total: AtomicU64,
}

/// The running delivery engine.
pub struct EventServer<D: Dispatch> {
    shared: Arc<Shared<D>>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<D: Dispatch> EventServer<D> {
    /// Bind and start: accept loop, worker pool, idle waker, blocked
    /// scanner.
    pub async fn bind(config: &ServerConfig, dispatcher: D) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, workers = config.workers, "delivery engine listening");

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            dispatcher,
            pool: SessionPool::new(config.max_sessions),
            idle: Arc::new(IdleQueue::new()),
            blocked: Arc::new(BlockedList::new()),
            work_tx: work_tx.clone(),
            accepted_total: AtomicU64::new(0),
            streaming_total: AtomicU64::new(0),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(Arc::clone(&shared.idle).run(work_tx.clone())));
        tasks.push(tokio::spawn(Arc::clone(&shared.blocked).run(work_tx.clone())));

        let work_rx = Arc::new(AsyncMutex::new(work_rx));
        for _ in 0..config.workers.max(1) {
            tasks.push(tokio::spawn(worker_loop(
                Arc::clone(&shared),
                Arc::clone(&work_rx),
            )));
        }

        tasks.push(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            shutdown_rx,
        )));

        Ok(Self {
            shared,
            local_addr,
            shutdown_tx,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Log engine occupancy and traffic counters.
    pub fn report(&self) {
        tracing::info!(
            free_sessions = self.shared.pool.available(),
            idle = self.shared.idle.len(),
            blocked = self.shared.blocked.len(),
            accepted_total = self.shared.accepted_total.load(Ordering::Relaxed),
            streaming_total = self.shared.streaming_total.load(Ordering::Relaxed),
            "delivery engine status"
        );
    }

    /// Stop accepting and tear down workers. In-flight sessions drop,
    /// which releases their per-job access.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("delivery engine stopped");
    }
}

async fn accept_loop<D: Dispatch>(
    listener: TcpListener,
    shared: Arc<Shared<D>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown_rx.changed() => break,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "accept error");
                continue;
            }
        };
        shared.accepted_total.fetch_add(1, Ordering::Relaxed);

        let mut session = match shared.pool.checkout() {
            Some(session) => session,
            None => {
                tracing::warn!(%peer, "session slots exhausted, refusing connection");
                drop(stream);
                continue;
            }
        };
        tracing::debug!(session = session.id(), %peer, "connection accepted");
        session.attach(Arc::new(stream), peer);

        // Hand the session to the workers on first readability; until then
        // it costs nothing but its slot.
        let work_tx = shared.work_tx.clone();
        tokio::spawn(async move {
            if let Some(io) = session.io.clone() {
                let _ = io.readable().await;
            }
            session.status = SessionStatus::Request;
            let _ = work_tx.send(session);
        });
    }
}

async fn worker_loop<D: Dispatch>(
    shared: Arc<Shared<D>>,
    work_rx: Arc<AsyncMutex<UnboundedReceiver<Session<D::State>>>>,
) {
    loop {
        let session = { work_rx.lock().await.recv().await };
        match session {
            Some(session) => step(&shared, session),
            None => break,
        }
    }
}

/// One scheduling step for one session: exactly one dispatch call at most.
fn step<D: Dispatch>(shared: &Shared<D>, mut session: Session<D::State>) {
    match session.status {
        SessionStatus::Connected | SessionStatus::Request => {
            session.status = SessionStatus::Request;
            read_and_dispatch(shared, session);
        }
        SessionStatus::Idle | SessionStatus::Blocked => {
            // Woken by timer, readiness, or deadline. A FIN while parked is
            // the normal end of a progressive session.
            if session.peer_hung_up() {
                finish(shared, session);
                return;
            }
            session.status = SessionStatus::Continue;
            let outcome = shared.dispatcher.dispatch(&mut session);
            route(shared, session, outcome);
        }
        SessionStatus::Continue => {
            let outcome = shared.dispatcher.dispatch(&mut session);
            route(shared, session, outcome);
        }
        SessionStatus::Finished => finish(shared, session),
    }
}

fn read_and_dispatch<D: Dispatch>(shared: &Shared<D>, mut session: Session<D::State>) {
    match session.fill_request_buffer() {
        FillOutcome::Closed => {
            tracing::debug!(session = session.id(), "client closed before request");
            finish(shared, session);
        }
        FillOutcome::Failed | FillOutcome::TooLarge => finish(shared, session),
        FillOutcome::Progress => match request::parse_request(session.received()) {
            request::ParseStatus::Partial => {
                // Keep Request status; the blocked list wakes us for more
                // bytes or on the deadline.
                shared.blocked.park(session, Interest::READABLE);
            }
            request::ParseStatus::Invalid(reason) => {
                tracing::warn!(session = session.id(), reason, "bad request");
                if let Some(io) = &session.io {
                    let _ = io.try_write(BAD_REQUEST);
                }
                finish(shared, session);
            }
            request::ParseStatus::Complete(parsed) => {
                tracing::debug!(
                    session = session.id(),
                    path = %parsed.path,
                    "request parsed"
                );
                session.request = Some(parsed);
                let outcome = shared.dispatcher.dispatch(&mut session);
                if matches!(outcome, Outcome::Idle(_)) {
                    shared.streaming_total.fetch_add(1, Ordering::Relaxed);
                }
                route(shared, session, outcome);
            }
        },
    }
}

fn route<D: Dispatch>(shared: &Shared<D>, mut session: Session<D::State>, outcome: Outcome) {
    match outcome {
        Outcome::Idle(delay) => shared.idle.park(session, Instant::now() + delay),
        Outcome::Block => {
            session.status = SessionStatus::Blocked;
            shared.blocked.park(session, Interest::WRITABLE);
        }
        Outcome::Done => finish(shared, session),
    }
}

fn finish<D: Dispatch>(shared: &Shared<D>, mut session: Session<D::State>) {
    session.status = SessionStatus::Finished;
    tracing::debug!(
        session = session.id(),
        bytes_sent = session.bytes_sent,
        "session finished"
    );
    // Recycling drops the socket and the protocol state, releasing the
    // job access on every exit path.
    shared.pool.recycle(session);
}

/// Non-blocking write helper shared by dispatchers: pushes as much of
/// `buf[*sent..]` as the socket accepts, updating `*sent`.
pub fn try_send(io: &TcpStream, buf: &[u8], sent: &mut usize) -> std::io::Result<bool> {
    while *sent < buf.len() {
        match io.try_write(&buf[*sent..]) {
            Ok(n) => *sent += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
