//! Repeated subscribe/unsubscribe cycles must not leak descriptors.
//!
//! Kept in its own test binary so no other test opens files concurrently.

#![cfg(target_os = "linux")]

use std::fs::OpenOptions;
use std::io::Write;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_stream::StreamExt;

use itpd_core::{LogEvent, LogTailer, TailFrom};

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

/// Watcher threads close their descriptors asynchronously after drop
async fn wait_for_fds(at_most: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let current = open_fds();
        if current <= at_most || Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn stop_and_restart_tailing_returns_to_baseline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("i2pd.log");
    std::fs::write(&path, "").unwrap();

    let tailer = LogTailer::new(Duration::from_millis(20), Duration::from_secs(1));

    // One warm-up cycle so runtime-internal descriptors exist before the
    // baseline is taken
    let mut warm_up = tailer.start_tailing(&path, TailFrom::End);
    tokio::time::sleep(Duration::from_millis(50)).await;
    warm_up.stop().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let baseline = open_fds();

    for i in 0..25 {
        let mut sub = tailer.start_tailing(&path, TailFrom::End);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "cycle {}", i).unwrap();
        drop(file);

        let event = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap();
        assert!(
            matches!(&event, Some(Ok(LogEvent::Line(line))) if line.text == format!("cycle {}", i)),
            "cycle {}: {:?}",
            i,
            event
        );

        sub.stop().await;
    }

    let after = wait_for_fds(baseline).await;
    assert!(
        after <= baseline,
        "descriptors leaked across tail cycles: {} -> {}",
        baseline,
        after
    );
}
