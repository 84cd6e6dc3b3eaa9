//! [`StallMonitor`] – input-channel liveness watchdog.
//!
//! A role loop calls [`StallMonitor::heartbeat`] every time a message
//! arrives.  A background task counts each full `timeout` that passes
//! without a heartbeat as one stall and logs it.  The monitor never touches
//! the channel or the estimator: a silent producer is reported, not
//! papered over.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Heartbeat-driven stall detector for one input channel.
///
/// Dropping the monitor stops its background task.
pub struct StallMonitor {
    channel: String,
    beats: watch::Sender<u64>,
    consecutive: Arc<AtomicU32>,
    total: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl StallMonitor {
    /// Start watching `channel`.  Must be called inside a Tokio runtime.
    pub fn spawn(channel: impl Into<String>, timeout: Duration) -> Self {
        let channel = channel.into();
        let (beats, mut rx) = watch::channel(0u64);
        let consecutive = Arc::new(AtomicU32::new(0));
        let total = Arc::new(AtomicU64::new(0));

        let task = {
            let consecutive = Arc::clone(&consecutive);
            let total = Arc::clone(&total);
            let channel = channel.clone();
            tokio::spawn(async move {
                loop {
                    match tokio::time::timeout(timeout, rx.changed()).await {
                        Ok(Ok(())) => {}
                        // Every sender is gone: the role loop has ended.
                        Ok(Err(_)) => break,
                        Err(_) => {
                            let n = consecutive.fetch_add(1, Ordering::Relaxed) + 1;
                            total.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                channel = %channel,
                                consecutive = n,
                                silent_ms = timeout.as_millis() as u64 * u64::from(n),
                                "input channel stalled; still waiting"
                            );
                        }
                    }
                }
            })
        };

        Self {
            channel,
            beats,
            consecutive,
            total,
            task,
        }
    }

    /// Record that a message arrived.
    pub fn heartbeat(&self) {
        let previous = self.consecutive.swap(0, Ordering::Relaxed);
        if previous > 0 {
            info!(channel = %self.channel, stalls = previous, "input channel resumed");
        }
        self.beats.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Stalls since the last heartbeat.
    pub fn consecutive_stalls(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }

    /// Stalls since the monitor started.
    pub fn total_stalls(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Drop for StallMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
