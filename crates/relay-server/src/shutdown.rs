//! Stopping the relay.
//!
//! Triggering shutdown cancels one token shared by the listener, the purge
//! sweep, and every dispatcher. Each open stream then emits
//! `error SHUTTING_DOWN` and deregisters. [`Shutdown::drain`] waits for the
//! registry to empty before joining the background tasks, all within one
//! grace period.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::StreamRegistry;

/// How often the registry is checked while streams close.
const STREAM_CHECK: Duration = Duration::from_millis(20);

/// What was still running when the grace period ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Streams that had not deregistered.
    pub streams_open: usize,
    /// Tasks that had not finished.
    pub tasks_unfinished: usize,
}

impl DrainReport {
    /// Whether everything stopped in time.
    pub fn is_clean(&self) -> bool {
        self.streams_open == 0 && self.tasks_unfinished == 0
    }
}

/// Server-wide shutdown signal with a bounded drain.
pub struct Shutdown {
    token: CancellationToken,
    grace: Duration,
}

impl Shutdown {
    /// Shutdown that allows `grace` for streams and tasks to stop.
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Token cancelled on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger, then wait for open streams to close and `tasks` to finish.
    pub async fn drain(&self, registry: &StreamRegistry, tasks: Vec<JoinHandle<()>>) -> DrainReport {
        self.trigger();
        let deadline = Instant::now() + self.grace;
        info!(
            streams = registry.connection_count(),
            tasks = tasks.len(),
            grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
            "draining"
        );

        while registry.connection_count() > 0 && Instant::now() < deadline {
            sleep(STREAM_CHECK).await;
        }

        let mut report = DrainReport {
            streams_open: registry.connection_count(),
            tasks_unfinished: 0,
        };
        for task in tasks {
            if timeout_at(deadline, task).await.is_err() {
                report.tasks_unfinished += 1;
            }
        }

        if report.is_clean() {
            info!("drained");
        } else {
            warn!(
                streams_open = report.streams_open,
                tasks_unfinished = report.tasks_unfinished,
                "grace period ended before everything stopped"
            );
        }
        report
    }
}
