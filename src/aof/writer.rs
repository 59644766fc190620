//! AOF writer
//!
//! One background thread owns the file. Frames arrive over a bounded tokio
//! `mpsc` channel and are appended in the order they were queued. Before each
//! batch the writer takes the pause lock in shared mode; [`Aof::pause`] takes it
//! exclusively, which holds the writer back while producers keep queueing.
//!
//! Producers try the queue without waiting first. Only a full queue makes them
//! wait, and on a runtime worker that wait is moved off the worker.

use crate::aof::{AofConfig, AofError};
use crate::protocol::Frame;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self as capture_mpsc, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

/// Handle to the append-only log and its writer thread.
pub struct Aof {
    path: PathBuf,

    /// Producer side of the queue; `None` once closed
    sender: RwLock<Option<mpsc::Sender<Frame>>>,

    /// Shared by the writer for each batch, exclusive while paused
    pause: Arc<RwLock<()>>,

    /// Receives a copy of every queued frame while a capture is active
    capture: RwLock<Option<Sender<Frame>>>,

    /// Frames written to the file so far
    appended: Arc<AtomicU64>,

    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Holds the writer paused until dropped.
///
/// Frames queued meanwhile are kept and written after the pause ends.
#[must_use = "the writer resumes as soon as the pause is dropped"]
pub struct AofPause<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl std::fmt::Debug for Aof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aof")
            .field("path", &self.path)
            .field("appended", &self.appended())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Aof {
    /// Opens (or creates) the log file for appending and starts the writer.
    pub fn open(config: &AofConfig) -> Result<Self, AofError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .map_err(|source| AofError::Open {
                path: config.path.clone(),
                source,
            })?;

        // tokio rejects a zero-capacity channel
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let pause = Arc::new(RwLock::new(()));
        let appended = Arc::new(AtomicU64::new(0));

        let worker = {
            let pause = Arc::clone(&pause);
            let appended = Arc::clone(&appended);
            let path = config.path.clone();
            thread::Builder::new()
                .name("aof-writer".to_string())
                .spawn(move || write_loop(file, &path, receiver, &pause, &appended))
                .map_err(AofError::Spawn)?
        };

        debug!(path = %config.path.display(), queue = config.queue_size, "AOF writer started");

        Ok(Self {
            path: config.path.clone(),
            sender: RwLock::new(Some(sender)),
            pause,
            capture: RwLock::new(None),
            appended,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues `frame` to be appended.
    ///
    /// Returns as soon as the frame is queued; blocks only while the queue is
    /// full. Callable from synchronous code and from inside a tokio runtime.
    pub fn append(&self, frame: Frame) -> Result<(), AofError> {
        // Clone the sender out so a concurrent close() is never blocked behind
        // a producer waiting for queue space.
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AofError::Closed)?;

        if let Some(capture) = self
            .capture
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            // A dropped receiver just means nobody is listening any more
            let _ = capture.send(frame.clone());
        }

        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => send_blocking(&sender, frame),
            Err(TrySendError::Closed(_)) => Err(AofError::Closed),
        }
    }

    /// Pauses the writer until the returned guard is dropped.
    ///
    /// Must not be held across [`Aof::close`] on the same thread: close waits
    /// for the writer, which waits for the pause to end.
    pub fn pause(&self) -> AofPause<'_> {
        AofPause {
            _guard: self.pause.write().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Starts copying every frame queued from now on to the returned receiver.
    ///
    /// Replaces any capture already in progress.
    pub fn start_capture(&self) -> Receiver<Frame> {
        let (sender, receiver) = capture_mpsc::channel();
        *self.capture.write().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        receiver
    }

    /// Ends the current capture; its receiver sees a disconnect once drained.
    pub fn stop_capture(&self) {
        self.capture
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Number of frames written to the file so far.
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stops accepting frames, waits for the writer to drain the queue and
    /// sync the file. Idempotent.
    pub fn close(&self) {
        drop(
            self.sender
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!(path = %self.path.display(), "AOF writer panicked");
            }
        }
    }
}

impl Drop for Aof {
    fn drop(&mut self) {
        self.close();
    }
}

/// Waits for queue space.
///
/// `blocking_send` refuses to run on a runtime thread. A multi-threaded worker
/// is handed back to the runtime with `block_in_place`; a current-thread
/// runtime waits on a scoped helper thread instead.
fn send_blocking(sender: &mpsc::Sender<Frame>, frame: Frame) -> Result<(), AofError> {
    let send = move || sender.blocking_send(frame).map_err(|_| AofError::Closed);
    match Handle::try_current() {
        Err(_) => send(),
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(send)
        }
        Ok(_) => thread::scope(|scope| {
            scope
                .spawn(send)
                .join()
                .unwrap_or(Err(AofError::Closed))
        }),
    }
}

/// Body of the writer thread. Returns once every sender is gone and the queue
/// is empty.
fn write_loop(
    file: File,
    path: &Path,
    mut frames: mpsc::Receiver<Frame>,
    pause: &RwLock<()>,
    appended: &AtomicU64,
) {
    let mut out = BufWriter::new(file);
    let mut buf = Vec::with_capacity(4096);

    while let Some(frame) = frames.blocking_recv() {
        let _running = pause.read().unwrap_or_else(PoisonError::into_inner);

        // Take whatever else is already queued so a burst costs one write
        let mut batch = 1;
        buf.clear();
        frame.write_to(&mut buf);
        while let Ok(next) = frames.try_recv() {
            next.write_to(&mut buf);
            batch += 1;
        }

        match out.write_all(&buf).and_then(|()| out.flush()) {
            Ok(()) => {
                appended.fetch_add(batch, Ordering::Release);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, frames = batch, "AOF write failed");
            }
        }
    }

    if let Err(e) = out.flush().and_then(|()| out.get_ref().sync_all()) {
        warn!(path = %path.display(), error = %e, "AOF sync failed");
    }
    debug!(path = %path.display(), "AOF writer stopped");
}
