//! Session parking: timed wakeups and readiness waits.
//!
//! Two structures hold sessions that are not currently being processed.
//! The idle queue is time-ordered and wakes sessions exactly when their
//! deadline passes; the blocked list is unordered and is rescanned on a
//! coarse tick, resubmitting sessions whose socket became ready or whose
//! hard deadline elapsed. Both push woken sessions back into the worker
//! queue, never processing them in place.

use super::session::{Session, SessionStatus};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::Interest;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Hard ceiling on a blocked session's wait; after this it is re-dispatched
/// no matter what the socket says, so a missed readiness edge cannot stall
/// a session forever.
pub const BLOCK_TIMEOUT: Duration = Duration::from_millis(300);

/// How often the blocked list is rescanned.
pub const BLOCK_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Time-ordered queue of sessions waiting for a scheduled wake.
pub struct IdleQueue<S> {
    queue: Mutex<BTreeMap<Instant, Session<S>>>,
    notify: Notify,
}

impl<S: Send + 'static> IdleQueue<S> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
        }
    }

    /// Park `session` until `wake_at`. Identical wake times are perturbed
    /// forward a nanosecond at a time until the key is unique.
    pub fn park(&self, mut session: Session<S>, wake_at: Instant) {
        session.status = SessionStatus::Idle;
        {
            let mut queue = self.queue.lock();
            let mut key = wake_at;
            while queue.contains_key(&key) {
                key += Duration::from_nanos(1);
            }
            queue.insert(key, session);
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Waker loop: sleeps until the earliest deadline, resubmits everything
    /// due, repeats. Runs until the work queue closes.
    pub async fn run(self: Arc<Self>, work_tx: UnboundedSender<Session<S>>) {
        loop {
            let (due, next) = {
                let mut queue = self.queue.lock();
                let now = Instant::now();
                let mut due = Vec::new();
                while let Some(entry) = queue.first_entry() {
                    if *entry.key() <= now {
                        due.push(entry.remove());
                    } else {
                        break;
                    }
                }
                (due, queue.keys().next().copied())
            };

            for session in due {
                if work_tx.send(session).is_err() {
                    return;
                }
            }

            match next {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

struct BlockedEntry<S> {
    session: Session<S>,
    interest: Interest,
    deadline: Instant,
}

/// Unordered list of sessions waiting on socket readiness.
pub struct BlockedList<S> {
    entries: Mutex<Vec<BlockedEntry<S>>>,
    notify: Notify,
}

impl<S: Send + 'static> BlockedList<S> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Park `session` until its socket reports `interest` or the block
    /// timeout passes. The caller decides the session status: a request
    /// still being read keeps `Request`, a stalled write parks as
    /// `Blocked`.
    pub fn park(&self, session: Session<S>, interest: Interest) {
        self.entries.lock().push(BlockedEntry {
            session,
            interest,
            deadline: Instant::now() + BLOCK_TIMEOUT,
        });
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Scanner loop: on every tick, resubmit sessions that became ready or
    /// ran out their deadline.
    pub async fn run(self: Arc<Self>, work_tx: UnboundedSender<Session<S>>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(BLOCK_SCAN_INTERVAL) => {}
                _ = self.notify.notified() => {}
            }

            let woken = {
                let mut entries = self.entries.lock();
                let now = Instant::now();
                let mut woken = Vec::new();
                let mut i = 0;
                while i < entries.len() {
                    if now >= entries[i].deadline || entry_ready(&entries[i]) {
                        woken.push(entries.swap_remove(i).session);
                    } else {
                        i += 1;
                    }
                }
                woken
            };

            for session in woken {
                if work_tx.send(session).is_err() {
                    return;
                }
            }
        }
    }
}

/// Non-blocking readiness probe for one parked session.
fn entry_ready<S>(entry: &BlockedEntry<S>) -> bool {
    match &entry.session.io {
        Some(io) => io.ready(entry.interest).now_or_never().is_some(),
        // No socket left; wake it so the worker can clean up.
        None => true,
    }
}
