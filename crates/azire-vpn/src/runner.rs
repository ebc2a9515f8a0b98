//! Background task lifecycle.
//!
//! Both pollers observe one shared run flag at the top of every cycle.
//! Clearing it also wakes any sleep or pending read, after which the tasks
//! are joined with a bounded wait.

use crate::tailer::LogTailer;
use crate::transfer::TransferPoller;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Read side of the shared run flag
#[derive(Debug, Clone)]
pub struct RunFlag {
    rx: watch::Receiver<bool>,
}

impl RunFlag {
    /// Create a raised flag and the handle that lowers it
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(true);
        (tx, Self { rx })
    }

    /// Still running? A dropped sender counts as stopped.
    pub fn is_running(&self) -> bool {
        *self.rx.borrow() && self.rx.has_changed().is_ok()
    }

    /// Resolve once the flag is lowered
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|running| !*running).await;
    }

    /// Sleep for `duration` unless stopped first; returns whether to go on
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_running(),
            _ = self.stopped() => false,
        }
    }
}

/// The log tailer and transfer poller, running
pub struct BackgroundTasks {
    stop: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    /// Spawn both pollers on the current runtime
    pub fn spawn(tailer: LogTailer, poller: TransferPoller) -> Self {
        let (stop, flag) = RunFlag::new();

        let tasks = vec![
            ("log tailer", tokio::spawn(tailer.run(flag.clone()))),
            ("transfer poller", tokio::spawn(poller.run(flag))),
        ];
        info!("Background tasks started");

        Self { stop, tasks }
    }

    /// Lower the run flag and wait up to `timeout` for each task
    pub async fn stop(self, timeout: Duration) {
        let _ = self.stop.send(false);

        for (name, handle) in self.tasks {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("{} stopped", name),
                Ok(Err(e)) => warn!("{} ended abnormally: {}", name, e),
                Err(_) => {
                    warn!("{} did not stop within {:?}, aborting", name, timeout);
                    abort.abort();
                }
            }
        }
        info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_interrupted_by_stop() {
        let (stop, mut flag) = RunFlag::new();
        assert!(flag.is_running());

        let sleeper = tokio::spawn(async move { flag.sleep(Duration::from_secs(3600)).await });
        stop.send(false).unwrap();

        let keep_going = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(!keep_going);
    }

    #[tokio::test]
    async fn test_dropped_sender_means_stopped() {
        let (stop, flag) = RunFlag::new();
        drop(stop);
        assert!(!flag.is_running());
    }

    #[tokio::test]
    async fn test_sleep_elapses() {
        let (_stop, mut flag) = RunFlag::new();
        assert!(flag.sleep(Duration::from_millis(1)).await);
    }
}
