//! Client settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long an open connection may sit with an empty queue before it is
    /// closed with `QUIT`.
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Sets the idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}
