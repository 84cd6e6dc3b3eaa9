//! Process-wide shutdown signal.
//!
//! The CLI's Ctrl-C handler holds the [`ShutdownTrigger`]; every role loop
//! holds a [`ShutdownSignal`] and races it against its channel read.

use tokio::sync::watch;

/// Fires the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger(watch::Sender<bool>);

/// Resolves once shutdown has been requested.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

/// Create a connected trigger/signal pair.
pub fn shutdown_pair() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownSignal(rx))
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    /// A fresh signal bound to this trigger.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal(self.0.subscribe())
    }
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the trigger fires.  If every trigger is dropped without
    /// firing, this never resolves.
    pub async fn wait(&mut self) {
        if self.0.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_wakes_waiters() {
        let (trigger, mut signal) = shutdown_pair();
        let mut second = trigger.subscribe();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move { signal.wait().await });
        trigger.trigger();
        waiter.await.unwrap();
        second.wait().await;
        assert!(second.is_triggered());
    }

    #[tokio::test]
    async fn dropped_trigger_never_fires() {
        let (trigger, mut signal) = shutdown_pair();
        drop(trigger);
        let res = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn never_signal_stays_quiet() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let res = tokio::time::timeout(Duration::from_millis(10), signal.wait()).await;
        assert!(res.is_err());
    }
}
