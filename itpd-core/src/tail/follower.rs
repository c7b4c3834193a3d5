//! Per-subscription follower task

use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Delivery, DiscontinuityReason, LogCursor, LogEvent, LogLine, TailFrom};
use crate::error::TailError;

const READ_CHUNK: usize = 8 * 1024;

/// Bytes kept from just before the read position to spot in-place rewrites
const FINGERPRINT_LEN: usize = 32;

/// The follower must stop: cancelled, consumer gone, or terminal error sent
struct Halt;

struct OpenLog {
    file: File,
    id: Option<u64>,
}

pub(super) struct Follower {
    path: PathBuf,
    from: Option<TailFrom>,
    interval: Duration,
    lost_after: Duration,
    tx: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
    log: Option<OpenLog>,
    pending: Vec<u8>,
    /// Last bytes read, ending at the read position
    fingerprint: Vec<u8>,
    cursor: LogCursor,
    missing_since: Option<Instant>,
}

impl Follower {
    pub(super) fn new(
        path: PathBuf,
        from: TailFrom,
        interval: Duration,
        lost_after: Duration,
        tx: mpsc::Sender<Delivery>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path,
            from: Some(from),
            interval,
            lost_after,
            tx,
            cancel,
            log: None,
            pending: Vec::new(),
            fingerprint: Vec::new(),
            cursor: LogCursor::default(),
            missing_since: None,
        }
    }

    pub(super) async fn run(mut self) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        // Dropped with the task, which releases the inotify descriptor
        let _watcher = self.watch_parent(wake_tx);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.check().await.is_err() {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = wake_rx.recv() => {}
            }
        }

        trace!(path = %self.path.display(), "Log follower exiting");
    }

    /// Watch the log's directory so appends wake the follower before the
    /// next tick. Polling alone still works if this fails.
    fn watch_parent(&self, wake: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty())?;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                // Full channel means a wake-up is already pending
                let _ = wake.try_send(());
            }
        })
        .map_err(|e| debug!(error = %e, "File watcher unavailable, polling only"))
        .ok()?;

        match watcher.watch(parent, RecursiveMode::NonRecursive) {
            Ok(()) => Some(watcher),
            Err(e) => {
                debug!(
                    dir = %parent.display(),
                    error = %e,
                    "Cannot watch log directory, polling only"
                );
                None
            }
        }
    }

    async fn check(&mut self) -> Result<(), Halt> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                self.missing_since = None;
                let current_id = file_id(&meta);

                if self.log.is_none() {
                    self.open().await?;
                } else if let Some(log) = &self.log
                    && log.id != current_id
                {
                    self.rotate().await?;
                } else if meta.len() < self.read_position() || !self.content_unchanged().await? {
                    // Shrunk, or rewritten in place past our position
                    self.truncate().await?;
                }

                self.read_available().await
            }
            Err(e) if e.kind() == ErrorKind::NotFound => self.handle_missing().await,
            Err(source) => {
                self.fail(TailError::Io {
                    path: self.path.clone(),
                    source,
                })
                .await
            }
        }
    }

    /// Open the file at the path, positioning according to `from`.
    /// Reopens after rotation start at the beginning.
    async fn open(&mut self) -> Result<(), Halt> {
        let from = self.from.take().unwrap_or(TailFrom::Beginning);

        let (file, id, len) = match self.open_file().await {
            Ok(opened) => opened,
            // Raced with a delete between stat and open
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return self
                    .fail(TailError::Io {
                        path: self.path.clone(),
                        source,
                    })
                    .await;
            }
        };

        let mut cursor = LogCursor {
            offset: 0,
            line: 0,
            file_id: id,
        };
        let mut discontinuity = None;

        match from {
            TailFrom::End => cursor.offset = len,
            TailFrom::Beginning => {}
            TailFrom::Cursor(saved) => {
                let same_file = saved.file_id.is_none() || id.is_none() || saved.file_id == id;
                if !same_file {
                    discontinuity = Some(DiscontinuityReason::Rotated);
                } else if saved.offset > len {
                    discontinuity = Some(DiscontinuityReason::Truncated);
                } else {
                    cursor.offset = saved.offset;
                    cursor.line = saved.line;
                }
            }
        }

        self.log = Some(OpenLog { file, id });
        self.cursor = cursor;
        self.pending.clear();
        self.load_fingerprint(cursor.offset).await;
        self.seek(cursor.offset).await?;

        debug!(
            path = %self.path.display(),
            offset = cursor.offset,
            "Opened log file"
        );

        if let Some(reason) = discontinuity {
            self.emit(Ok(LogEvent::Discontinuity { reason })).await?;
        }
        Ok(())
    }

    /// A new file replaced the one we hold: finish the old one, then
    /// restart at the beginning of the new one.
    async fn rotate(&mut self) -> Result<(), Halt> {
        self.read_available().await?;
        self.flush_partial().await?;
        debug!(path = %self.path.display(), "Log file rotated");

        self.log = None;
        self.from = None;
        self.open().await?;
        self.emit(Ok(LogEvent::Discontinuity {
            reason: DiscontinuityReason::Rotated,
        }))
        .await
    }

    async fn truncate(&mut self) -> Result<(), Halt> {
        debug!(
            path = %self.path.display(),
            offset = self.cursor.offset,
            "Log file truncated"
        );
        self.pending.clear();
        self.fingerprint.clear();
        self.cursor.offset = 0;
        self.cursor.line = 0;
        self.seek(0).await?;
        self.emit(Ok(LogEvent::Discontinuity {
            reason: DiscontinuityReason::Truncated,
        }))
        .await
    }

    async fn handle_missing(&mut self) -> Result<(), Halt> {
        if self.log.is_none()
            && let Some(from) = self.from
        {
            // Not created yet; wait without a deadline. Everything in a file
            // that appears later was written after we started.
            if from == TailFrom::End {
                self.from = Some(TailFrom::Beginning);
            }
            return Ok(());
        }

        if self.log.is_some() {
            // Lines written just before the unlink are still readable
            self.read_available().await?;
        }

        let since = *self.missing_since.get_or_insert_with(Instant::now);
        if since.elapsed() < self.lost_after {
            return Ok(());
        }

        warn!(
            path = %self.path.display(),
            "Log file disappeared, ending subscription"
        );
        self.flush_partial().await?;
        self.log = None;
        self.fail(TailError::SourceLost(self.path.clone())).await
    }

    /// Read everything currently available, emitting each complete line.
    async fn read_available(&mut self) -> Result<(), Halt> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let Some(log) = self.log.as_mut() else {
                return Ok(());
            };
            let n = match log.file.read(&mut chunk).await {
                Ok(n) => n,
                Err(source) => {
                    return self
                        .fail(TailError::Io {
                            path: self.path.clone(),
                            source,
                        })
                        .await;
                }
            };
            if n == 0 {
                return Ok(());
            }
            self.pending.extend_from_slice(&chunk[..n]);
            self.remember(&chunk[..n]);

            while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=end).collect();
                self.cursor.offset += raw.len() as u64;
                self.emit_line(&raw).await?;
            }
        }
    }

    /// Emit a trailing line that never got its newline
    async fn flush_partial(&mut self) -> Result<(), Halt> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let raw = std::mem::take(&mut self.pending);
        self.cursor.offset += raw.len() as u64;
        self.emit_line(&raw).await
    }

    async fn emit_line(&mut self, raw: &[u8]) -> Result<(), Halt> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_end_matches(['\n', '\r']);
        self.cursor.line += 1;
        let line = LogLine::new(self.cursor.line, text);
        self.emit(Ok(LogEvent::Line(line))).await
    }

    async fn emit(&mut self, event: Result<LogEvent, TailError>) -> Result<(), Halt> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Halt),
            sent = self.tx.send((event, self.cursor)) => sent.map_err(|_| Halt),
        }
    }

    /// Deliver a terminal error and stop
    async fn fail(&mut self, error: TailError) -> Result<(), Halt> {
        let _ = self.emit(Err(error)).await;
        Err(Halt)
    }

    async fn seek(&mut self, offset: u64) -> Result<(), Halt> {
        let Some(log) = self.log.as_mut() else {
            return Ok(());
        };
        if let Err(source) = log.file.seek(SeekFrom::Start(offset)).await {
            return self
                .fail(TailError::Io {
                    path: self.path.clone(),
                    source,
                })
                .await;
        }
        Ok(())
    }

    async fn open_file(&self) -> std::io::Result<(File, Option<u64>, u64)> {
        let file = File::open(&self.path).await?;
        let meta = file.metadata().await?;
        Ok((file, file_id(&meta), meta.len()))
    }

    fn remember(&mut self, bytes: &[u8]) {
        self.fingerprint.extend_from_slice(bytes);
        let excess = self.fingerprint.len().saturating_sub(FINGERPRINT_LEN);
        self.fingerprint.drain(..excess);
    }

    /// Fingerprint the bytes before `offset` of a freshly opened file. The
    /// caller seeks to `offset` afterwards.
    async fn load_fingerprint(&mut self, offset: u64) {
        self.fingerprint.clear();
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let len = FINGERPRINT_LEN.min(offset as usize);
        let mut bytes = vec![0u8; len];
        match read_at(&mut log.file, offset - len as u64, &mut bytes).await {
            Ok(()) => self.fingerprint = bytes,
            Err(e) => trace!(error = %e, "No fingerprint for log file"),
        }
    }

    /// Whether the bytes just before the read position are still the ones we
    /// read. Leaves the file positioned at the read position.
    async fn content_unchanged(&mut self) -> Result<bool, Halt> {
        if self.fingerprint.is_empty() {
            return Ok(true);
        }
        let start = self.read_position() - self.fingerprint.len() as u64;
        let Some(log) = self.log.as_mut() else {
            return Ok(true);
        };

        let mut current = vec![0u8; self.fingerprint.len()];
        match read_at(&mut log.file, start, &mut current).await {
            Ok(()) => Ok(current == self.fingerprint),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(source) => self
                .fail(TailError::Io {
                    path: self.path.clone(),
                    source,
                })
                .await
                .map(|()| false),
        }
    }

    fn read_position(&self) -> u64 {
        self.cursor.offset + self.pending.len() as u64
    }
}

async fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.read_exact(buf).await?;
    Ok(())
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}
