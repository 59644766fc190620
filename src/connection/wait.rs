//! In-flight dispatch counter
//!
//! Counts frames that have started dispatch but whose reply has not been fully
//! written yet. Closing a session waits, with a deadline, for the count to
//! reach zero so shutdown never cuts a reply in half.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
pub struct InFlight {
    count: watch::Sender<usize>,
}

/// Marks one dispatch as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    count: &'a watch::Sender<usize>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlight {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub fn begin(&self) -> InFlightGuard<'_> {
        self.count.send_modify(|n| *n += 1);
        InFlightGuard { count: &self.count }
    }

    pub fn current(&self) -> usize {
        *self.count.borrow()
    }

    /// Waits until nothing is in flight.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let idle = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        idle
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}
