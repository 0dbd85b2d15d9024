//! Liveness monitor.
//!
//! Every accepted connection gets a [`Heartbeat`]: a background task that
//! sends a transport-level ping on a fixed interval while the connection is
//! open. Liveness is passive. A missing pong is never acted on; the
//! transport's own close or error is what ends a connection.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::trace;

use crate::identifiers::ConnectionId;
use crate::transport::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Default interval between heartbeat pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Heartbeat
// ============================================================================

/// Periodic ping timer bound to one connection.
///
/// Cancelled by [`Heartbeat::cancel`] or on drop, whichever comes first.
#[derive(Debug)]
pub struct Heartbeat {
    /// Connection being probed.
    connection: ConnectionId,
    /// Timer task; `None` once cancelled.
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Starts pinging `connection` every `period`. The first ping fires one
    /// full period after start.
    ///
    /// Must be called within a tokio runtime. `period` must be non-zero.
    pub fn start(connection: Connection, period: Duration) -> Self {
        let id = connection.id();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if !connection.is_open() || connection.ping().is_err() {
                    trace!(connection = %connection.id(), "Heartbeat stopped, connection closed");
                    break;
                }
            }
        });

        Self {
            connection: id,
            task: Some(task),
        }
    }

    /// Stops the timer. Returns `true` on the first call only.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                trace!(connection = %self.connection, "Heartbeat cancelled");
                true
            }
            None => false,
        }
    }

    /// Returns `true` until the heartbeat is cancelled.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
