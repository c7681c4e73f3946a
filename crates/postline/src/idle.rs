//! The idle-disconnect timer.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};

/// A single-shot timer owned by the worker.
///
/// Disarmed, [`expired`](Self::expired) never resolves.
#[derive(Debug, Default)]
pub(crate) struct IdleTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl IdleTimer {
    /// Starts (or restarts) the countdown.
    pub(crate) fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(sleep(after)));
    }

    pub(crate) fn cancel(&mut self) {
        self.sleep = None;
    }

    pub(crate) const fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves once the armed delay has passed, disarming the timer.
    pub(crate) async fn expired(&mut self) {
        match &mut self.sleep {
            Some(sleep) => sleep.as_mut().await,
            None => future::pending().await,
        }
        self.sleep = None;
    }
}
