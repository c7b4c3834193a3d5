//! Daemon log tailing
//!
//! [`LogTailer::start_tailing`] spawns a follower task for one log file and
//! hands back a [`LogSubscription`], a [`Stream`] of [`LogEvent`]s that
//! lives until [`LogSubscription::stop`] is called or the subscription is
//! dropped. Each subscription owns its own file handle and watcher, so
//! subscriptions never share state with each other or with the lifecycle
//! supervisor.
//!
//! Truncation and rotation are reported as one [`LogEvent::Discontinuity`],
//! after which the new file is read from its beginning.

mod follower;
mod line;

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::error::TailError;

pub use line::{LogLevel, LogLine};

/// Events queued ahead of a slow consumer before the follower waits
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Position within the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogCursor {
    /// Byte offset just past the last delivered line
    pub offset: u64,
    /// Number of the last delivered line
    pub line: u64,
    /// File identity (inode on unix)
    pub file_id: Option<u64>,
}

/// Where a new subscription starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailFrom {
    /// Only lines appended after the subscription starts
    #[default]
    End,
    /// The whole current file, then new lines
    Beginning,
    /// Continue a previous subscription on the same file
    Cursor(LogCursor),
}

/// Why the tailer reset its position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuityReason {
    /// The file shrank below the read position
    Truncated,
    /// A different file now lives at the path
    Rotated,
}

/// An item produced by a log subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    Line(LogLine),
    /// Lines before and after this marker come from different files or
    /// different generations of the same file
    Discontinuity { reason: DiscontinuityReason },
}

type Delivery = (Result<LogEvent, TailError>, LogCursor);

/// Starts log subscriptions
#[derive(Debug, Clone)]
pub struct LogTailer {
    interval: Duration,
    lost_after: Duration,
}

impl LogTailer {
    /// Create a tailer that re-checks files every `interval` and gives up on
    /// a vanished file after `lost_after`
    pub fn new(interval: Duration, lost_after: Duration) -> Self {
        Self {
            interval,
            lost_after,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(config.tail_interval, config.lost_after)
    }

    /// Start following `source`.
    ///
    /// Must be called from within a tokio runtime. The returned subscription
    /// is independent of any other; starting again after a stop creates a
    /// fresh one.
    pub fn start_tailing(&self, source: impl Into<PathBuf>, from: TailFrom) -> LogSubscription {
        let path = source.into();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();

        debug!(subscription = %id, path = %path.display(), ?from, "Starting log subscription");

        let follower = follower::Follower::new(
            path,
            from,
            self.interval,
            self.lost_after,
            tx,
            cancel.clone(),
        );
        let task = tokio::spawn(follower.run());

        LogSubscription {
            id,
            rx,
            cancel,
            task: Some(task),
            cursor: None,
        }
    }

    /// Release everything held by `subscription`. Idempotent.
    pub async fn stop_tailing(&self, subscription: &mut LogSubscription) {
        subscription.stop().await;
    }
}

/// A live log subscription.
///
/// Yields `Ok(LogEvent)` in append order. If the file disappears for longer
/// than the tailer's `lost_after`, yields one `Err(TailError::SourceLost)`
/// and then ends.
pub struct LogSubscription {
    id: Uuid,
    rx: mpsc::Receiver<Delivery>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    cursor: Option<LogCursor>,
}

impl LogSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Position after the last item this subscription yielded
    pub fn cursor(&self) -> Option<LogCursor> {
        self.cursor
    }

    /// Whether `stop` has been called or the follower has finished
    pub fn is_stopped(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop following and release the file handle and watcher.
    ///
    /// Waits for the follower task to finish. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(subscription = %self.id, error = %e, "Log follower ended abnormally");
            }
            debug!(subscription = %self.id, "Log subscription stopped");
        }
        self.rx.close();
    }
}

impl Stream for LogSubscription {
    type Item = Result<LogEvent, TailError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some((item, cursor))) => {
                this.cursor = Some(cursor);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("id", &self.id)
            .field("cursor", &self.cursor)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
