//! Stop-the-World Gate
//!
//! A gate that reads pass through before touching storage. While the gate is
//! open, [`Gate::wait`] is a single atomic load. A maintenance operation (such
//! as a future consistent snapshot) can close it to hold back new reads, then
//! reopen it to release every waiter at once.
//!
//! Nothing in the server closes the gate yet, so in practice every wait is a
//! no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};

/// A closable barrier for storage reads.
#[derive(Debug)]
pub struct Gate {
    /// Mirrors `state` so the open path never takes the mutex
    open: AtomicBool,
    state: Mutex<bool>,
    cond: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates an open gate.
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            state: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    /// Blocks until the gate is open.
    pub fn wait(&self) {
        if self.is_open() {
            return;
        }
        off_worker(|| {
            let open = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let _open = self
                .cond
                .wait_while(open, |open| !*open)
                .unwrap_or_else(PoisonError::into_inner);
        });
    }

    /// Blocks until the gate is open or `timeout` elapses.
    ///
    /// Returns `true` if the gate was open when this returned.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_open() {
            return true;
        }
        off_worker(|| {
            let open = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let (open, _) = self
                .cond
                .wait_timeout_while(open, timeout, |open| !*open)
                .unwrap_or_else(PoisonError::into_inner);
            *open
        })
    }

    /// Closes the gate; subsequent waits block until [`Gate::open`].
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = false;
        self.open.store(false, Ordering::Release);
    }

    /// Opens the gate and wakes every waiter.
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = true;
        self.open.store(true, Ordering::Release);
        drop(state);
        self.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Runs a blocking wait, handing the worker thread back to the runtime first
/// when called from a multi-threaded tokio runtime.
fn off_worker<R>(wait: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_open_gate_does_not_block() {
        let gate = Gate::new();
        assert!(gate.is_open());
        gate.wait();
        assert!(gate.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_closed_gate_times_out() {
        let gate = Gate::new();
        gate.close();
        assert!(!gate.is_open());
        assert!(!gate.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_open_releases_waiters() {
        let gate = Arc::new(Gate::new());
        gate.close();

        let passed = Arc::new(AtomicBool::new(false));
        let waiter = {
            let gate = Arc::clone(&gate);
            let passed = Arc::clone(&passed);
            thread::spawn(move || {
                gate.wait();
                passed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));

        gate.open();
        waiter.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_open_gate_skips_the_lock() {
        let gate = Arc::new(Gate::new());
        let _held = gate.state.lock().unwrap();

        let (done, rx) = std::sync::mpsc::channel();
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.wait();
                assert!(gate.wait_timeout(Duration::from_millis(1)));
                done.send(()).unwrap();
            })
        };

        // Would hang if an open gate still went through the mutex
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        waiter.join().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_closed_gate_releases_the_worker() {
        let gate = Arc::new(Gate::new());
        gate.close();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The only worker is parked in wait(); other tasks still run
        let other = tokio::spawn(async { 7 });
        let value = tokio::time::timeout(Duration::from_secs(2), other).await;
        assert_eq!(value.unwrap().unwrap(), 7);

        gate.open();
        waiter.await.unwrap();
    }
}
