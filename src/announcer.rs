//! Fire-and-forget delivery of announcements to a speech engine.
//!
//! The frame loop must never wait on audio. We hand each text to a worker thread through a
//! small bounded queue:
//! - the worker exclusively owns the engine and speaks one text at a time, in queue order
//! - `announce` never blocks; if the worker is behind and the queue is full, the oldest
//!   pending text is dropped so the newest direction is always the last one spoken
//! - engine failures, including panics, are logged and discarded on the worker

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::Result;
use crate::speech::SpeechEngine;

/// Owner of the announcement worker thread.
pub struct Announcer {
    handle: AnnouncerHandle,
    worker: JoinHandle<()>,
}

/// Cheap, cloneable sender used by pipeline loops to queue announcements.
///
/// The worker stops once every handle (including the [`Announcer`]'s own) is gone and the
/// queue has drained.
#[derive(Debug)]
pub struct AnnouncerHandle {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
    depth: usize,
}

#[derive(Debug)]
struct Queue {
    pending: VecDeque<String>,
    senders: usize,
    worker_alive: bool,
}

impl Announcer {
    /// Start a worker that owns `engine` and keeps up to `queue_depth` pending texts.
    pub fn spawn<E>(engine: E, queue_depth: usize) -> Result<Self>
    where
        E: SpeechEngine + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                senders: 1,
                worker_alive: true,
            }),
            ready: Condvar::new(),
            depth: queue_depth.max(1),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("pathcue-announcer".to_owned())
            .spawn(move || run_worker(engine, &worker_shared))?;

        Ok(Self {
            handle: AnnouncerHandle { shared },
            worker,
        })
    }

    pub fn handle(&self) -> AnnouncerHandle {
        self.handle.clone()
    }

    /// Drop this owner's sender and wait for the worker to drain its queue.
    ///
    /// Blocks until every other [`AnnouncerHandle`] has been dropped as well.
    pub fn shutdown(self) {
        drop(self.handle);
        if self.worker.join().is_err() {
            warn!("announcer worker panicked");
        }
    }
}

impl AnnouncerHandle {
    /// Queue `text` for speaking without waiting for it.
    ///
    /// When the queue is full the oldest pending text is superseded. Returns `false` only
    /// if the worker is gone.
    pub fn announce(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        let mut queue = self.shared.lock();
        if !queue.worker_alive {
            warn!(%text, "announcement dropped: speech worker is gone");
            return false;
        }

        if queue.pending.len() >= self.shared.depth {
            if let Some(stale) = queue.pending.pop_front() {
                debug!(%stale, newer = %text, "pending announcement superseded");
            }
        }
        queue.pending.push_back(text);
        drop(queue);

        self.shared.ready.notify_one();
        true
    }
}

impl Clone for AnnouncerHandle {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for AnnouncerHandle {
    fn drop(&mut self) {
        let mut queue = self.shared.lock();
        queue.senders = queue.senders.saturating_sub(1);
        if queue.senders == 0 {
            drop(queue);
            self.shared.ready.notify_all();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until there is something to speak, or `None` once every sender is gone.
    fn next(&self) -> Option<String> {
        let mut queue = self.lock();
        loop {
            if let Some(text) = queue.pending.pop_front() {
                return Some(text);
            }
            if queue.senders == 0 {
                return None;
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Marks the worker as gone however it exits.
struct WorkerExit<'a>(&'a Shared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let mut queue = self.0.lock();
        queue.worker_alive = false;
        queue.pending.clear();
    }
}

fn run_worker<E: SpeechEngine>(mut engine: E, shared: &Shared) {
    let _exit = WorkerExit(shared);
    while let Some(text) = shared.next() {
        debug!(%text, "speaking");
        match catch_unwind(AssertUnwindSafe(|| engine.speak(&text))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, %text, "speech engine failed; announcement discarded")
            }
            Err(_) => warn!(%text, "speech engine panicked; announcement discarded"),
        }
    }
    debug!("announcer worker stopped");
}
