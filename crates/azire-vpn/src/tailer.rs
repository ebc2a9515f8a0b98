//! Log tailer: follows the ring log and posts new lines to the UI.

use crate::ringlog::{LogCursor, LogSource, RingLogError};
use crate::runner::RunFlag;
use crate::ui::UiEvent;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Background task delivering ring log lines in order
pub struct LogTailer {
    source: Arc<dyn LogSource>,
    cursor: LogCursor,
    interval: Duration,
    ui_tx: Sender<UiEvent>,
}

impl LogTailer {
    /// Follow `source` from everything it still retains
    pub fn new(source: Arc<dyn LogSource>, interval: Duration, ui_tx: Sender<UiEvent>) -> Self {
        Self {
            source,
            cursor: LogCursor::All,
            interval,
            ui_tx,
        }
    }

    /// Start from `cursor` instead of the full history
    pub fn starting_at(mut self, cursor: LogCursor) -> Self {
        self.cursor = cursor;
        self
    }

    /// Fetch and deliver one batch; false once the UI side is gone
    pub fn poll_once(&mut self) -> bool {
        let batch = self.source.follow(self.cursor);
        self.deliver(batch)
    }

    fn deliver(&mut self, batch: Result<(LogCursor, Vec<String>), RingLogError>) -> bool {
        match batch {
            Ok((next, lines)) => {
                self.cursor = next;
                for line in lines {
                    if self.ui_tx.send(UiEvent::LogLine(line)).is_err() {
                        return false;
                    }
                }
            }
            Err(e) => warn!("Failed to read log: {}", e),
        }
        true
    }

    /// Tail until `running` is lowered
    pub async fn run(mut self, mut running: RunFlag) {
        info!("Log tailer started");

        while running.is_running() {
            // File reads are blocking; keep them off the async workers
            let source = self.source.clone();
            let cursor = self.cursor;
            let delivered = match tokio::task::spawn_blocking(move || source.follow(cursor)).await {
                Ok(batch) => self.deliver(batch),
                Err(e) => {
                    warn!("Log read task failed: {}", e);
                    true
                }
            };
            if !delivered {
                debug!("Presentation thread gone");
                break;
            }
            if !running.sleep(self.interval).await {
                break;
            }
        }

        info!("Log tailer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ringlog::{RingLogger, MAX_LINES};
    use crossbeam_channel::unbounded;

    fn drain(rx: &crossbeam_channel::Receiver<UiEvent>) -> Vec<String> {
        rx.try_iter()
            .filter_map(|e| match e {
                UiEvent::LogLine(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_never_repeats_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(RingLogger::create(dir.path().join("log.bin"), "GUI").unwrap());
        let (tx, rx) = unbounded();
        let mut tailer = LogTailer::new(log.clone(), Duration::from_millis(10), tx);

        log.write("a").unwrap();
        tailer.poll_once();
        tailer.poll_once();
        log.write("b").unwrap();
        tailer.poll_once();

        let lines = drain(&rx);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[GUI] a"));
        assert!(lines[1].ends_with("[GUI] b"));
    }

    #[test]
    fn test_overrun_delivers_retained_window() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(RingLogger::create(dir.path().join("log.bin"), "GUI").unwrap());
        let (tx, rx) = unbounded();
        let mut tailer = LogTailer::new(log.clone(), Duration::from_millis(10), tx);

        log.write("first").unwrap();
        tailer.poll_once();
        for i in 0..MAX_LINES + 5 {
            log.write(&format!("n{}", i)).unwrap();
        }
        tailer.poll_once();

        let lines = drain(&rx);
        assert_eq!(lines.len() as u64, 1 + MAX_LINES);
        assert!(lines[1].ends_with("[GUI] n5"));
    }

    #[test]
    fn test_starting_now_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(RingLogger::create(dir.path().join("log.bin"), "GUI").unwrap());
        log.write("old").unwrap();
        let (tx, rx) = unbounded();
        let mut tailer = LogTailer::new(log.clone(), Duration::from_millis(10), tx)
            .starting_at(LogCursor::Now);

        tailer.poll_once();
        log.write("new").unwrap();
        tailer.poll_once();

        let lines = drain(&rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[GUI] new"));
    }

    #[tokio::test]
    async fn test_run_stops_on_flag() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(RingLogger::create(dir.path().join("log.bin"), "GUI").unwrap());
        log.write("hello").unwrap();
        let (tx, rx) = unbounded();
        let (stop, flag) = RunFlag::new();

        let task = tokio::spawn(LogTailer::new(log, Duration::from_secs(3600), tx).run(flag));
        let line = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(line, UiEvent::LogLine(l) if l.ends_with("[GUI] hello")));

        stop.send(false).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
