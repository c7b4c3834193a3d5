//! Print and follow the daemon log

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use itpd_core::{LogCursor, LogEvent, LogTailer, TailError, TailFrom};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::config::ConfigLoader;

const TAIL_CHUNK: u64 = 8 * 1024;

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Print the whole log
    #[arg(long, conflicts_with = "lines")]
    pub all: bool,

    /// Number of trailing lines to print
    #[arg(short = 'n', long, default_value_t = 20)]
    pub lines: usize,

    /// Keep printing lines as they are appended
    #[arg(short, long)]
    pub follow: bool,
}

pub async fn run(args: LogsArgs, explicit: Option<&Path>) -> Result<()> {
    let config = ConfigLoader::load(explicit)?;
    let path = config.daemon.log_path.clone();

    let keep = (!args.all).then_some(args.lines);
    let cursor = match read_tail(&path, keep).await {
        Ok((lines, cursor)) => {
            for line in lines {
                println!("{}", line);
            }
            Some(cursor)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && args.follow => {
            info!(path = %path.display(), "Log file does not exist yet, waiting");
            None
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    if !args.follow {
        return Ok(());
    }

    let tailer = LogTailer::from_config(&config.daemon);
    let from = cursor.map_or(TailFrom::Beginning, TailFrom::Cursor);
    let mut sub = tailer.start_tailing(&path, from);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = sub.next() => match event {
                Some(Ok(LogEvent::Line(line))) => println!("{}", line.text),
                Some(Ok(LogEvent::Discontinuity { reason })) => {
                    info!(?reason, "Log file restarted");
                }
                Some(Err(TailError::SourceLost(lost))) => {
                    warn!(path = %lost.display(), "Log file disappeared");
                }
                Some(Err(e)) => warn!(error = %e, "Log read failed"),
                None => break,
            },
        }
    }

    tailer.stop_tailing(&mut sub).await;
    Ok(())
}

/// Read the last `keep` complete lines of the file (all when `None`),
/// working backwards from the end in chunks.
///
/// When the start of the file was never read, the cursor's line number
/// is 0 and a follow numbers lines from the resume point.
async fn read_tail(
    path: &Path,
    keep: Option<usize>,
) -> std::io::Result<(Vec<String>, LogCursor)> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();

    let mut buf = Vec::new();
    let mut start = len;
    match keep {
        None => {
            file.read_to_end(&mut buf).await?;
            start = 0;
        }
        // One newline more than `keep` marks where the first kept line begins
        Some(keep) => {
            while start > 0 && buf.iter().filter(|&&b| b == b'\n').count() <= keep {
                let from = start.saturating_sub(TAIL_CHUNK);
                let mut chunk = vec![0u8; (start - from) as usize];
                file.seek(SeekFrom::Start(from)).await?;
                file.read_exact(&mut chunk).await?;
                chunk.extend_from_slice(&buf);
                buf = chunk;
                start = from;
            }
        }
    }

    // Drop the line we only saw the end of
    let skip = if start > 0 {
        buf.iter().position(|&b| b == b'\n').map_or(buf.len(), |i| i + 1)
    } else {
        0
    };
    let (lines, tail) = split_tail(&buf[skip..], keep);
    let cursor = LogCursor {
        offset: start + skip as u64 + tail.offset,
        line: if start == 0 { tail.line } else { 0 },
        file_id: None,
    };
    Ok((lines, cursor))
}

/// Split complete lines out of `bytes`, keeping the last `keep` of them
/// (all when `None`).
///
/// The returned cursor points just past the last complete line, so a
/// trailing partial line is picked up by a follow.
fn split_tail(bytes: &[u8], keep: Option<usize>) -> (Vec<String>, LogCursor) {
    let complete = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);

    // The slice ends with a newline (or is empty), so the last part is empty
    let mut parts: Vec<&[u8]> = bytes[..complete].split(|&b| b == b'\n').collect();
    parts.pop();

    let lines: Vec<String> = parts
        .into_iter()
        .map(|raw| {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            String::from_utf8_lossy(raw).into_owned()
        })
        .collect();

    let cursor = LogCursor {
        offset: complete as u64,
        line: lines.len() as u64,
        file_id: None,
    };
    let skip = keep.map_or(0, |keep| lines.len().saturating_sub(keep));
    (lines.into_iter().skip(skip).collect(), cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        logs: LogsArgs,
    }

    #[test]
    fn test_logs_defaults() {
        let cli = TestCli::parse_from(["test"]);
        assert!(!cli.logs.all);
        assert!(!cli.logs.follow);
        assert_eq!(cli.logs.lines, 20);
    }

    #[test]
    fn test_logs_lines_and_follow() {
        let cli = TestCli::parse_from(["test", "-n", "5", "-f"]);
        assert_eq!(cli.logs.lines, 5);
        assert!(cli.logs.follow);
    }

    #[test]
    fn test_logs_all_conflicts_with_lines() {
        assert!(TestCli::try_parse_from(["test", "--all", "-n", "5"]).is_err());
    }

    #[test]
    fn test_split_tail_keeps_last_lines() {
        let (lines, cursor) = split_tail(b"one\ntwo\r\nthree\n", Some(2));
        assert_eq!(lines, vec!["two", "three"]);
        assert_eq!(cursor.offset, 15);
        assert_eq!(cursor.line, 3);
    }

    #[test]
    fn test_split_tail_leaves_partial_line_for_follow() {
        let (lines, cursor) = split_tail(b"done\nhalf", None);
        assert_eq!(lines, vec!["done"]);
        assert_eq!(cursor.offset, 5);
        assert_eq!(cursor.line, 1);
    }

    #[test]
    fn test_split_tail_empty_file() {
        let (lines, cursor) = split_tail(b"", Some(20));
        assert!(lines.is_empty());
        assert_eq!(cursor, LogCursor::default());
    }

    fn numbered_log(dir: &TempDir, count: usize, trailer: &str) -> (std::path::PathBuf, u64) {
        let mut contents: String = (1..=count).map(|i| format!("line {}\n", i)).collect();
        contents.push_str(trailer);
        let path = dir.path().join("i2pd.log");
        std::fs::write(&path, &contents).unwrap();
        (path, contents.len() as u64)
    }

    #[tokio::test]
    async fn test_read_tail_spans_chunks() {
        let dir = TempDir::new().unwrap();
        let (path, len) = numbered_log(&dir, 5000, "");
        assert!(len > 2 * TAIL_CHUNK);

        let (lines, cursor) = read_tail(&path, Some(3)).await.unwrap();
        assert_eq!(lines, vec!["line 4998", "line 4999", "line 5000"]);
        assert_eq!(cursor.offset, len);
        assert_eq!(cursor.line, 0);

        // Enough lines to need more than one chunk
        let (lines, cursor) = read_tail(&path, Some(2000)).await.unwrap();
        assert_eq!(lines.len(), 2000);
        assert_eq!(lines[0], "line 3001");
        assert_eq!(cursor.offset, len);
    }

    #[tokio::test]
    async fn test_read_tail_whole_file_counts_lines() {
        let dir = TempDir::new().unwrap();
        let (path, len) = numbered_log(&dir, 5000, "half");

        let (lines, cursor) = read_tail(&path, None).await.unwrap();
        assert_eq!(lines.len(), 5000);
        assert_eq!(cursor.line, 5000);
        assert_eq!(cursor.offset, len - "half".len() as u64);
    }

    #[tokio::test]
    async fn test_read_tail_small_file_keeps_numbering() {
        let dir = TempDir::new().unwrap();
        let (path, _) = numbered_log(&dir, 3, "half");

        let (lines, cursor) = read_tail(&path, Some(20)).await.unwrap();
        assert_eq!(lines, vec!["line 1", "line 2", "line 3"]);
        assert_eq!(cursor.line, 3);
        assert_eq!(cursor.offset, 21);
    }

    #[tokio::test]
    async fn test_read_tail_missing_file() {
        let dir = TempDir::new().unwrap();
        let error = read_tail(&dir.path().join("nope.log"), Some(5)).await.unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::NotFound);
    }
}
