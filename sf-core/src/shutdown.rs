//! Cooperative shutdown signal shared by every long-lived task

use std::time::Duration;
use tokio::sync::watch;

/// Create a trigger and the first of its listeners
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Owner side; dropping it also counts as shutdown
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Listener side, cheap to clone into each task
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered or the trigger is gone
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless shutdown comes first; `false` means shut down
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.wait() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_on_trigger() {
        let (trigger, mut shutdown) = shutdown_channel();
        let waiter = tokio::spawn(async move { shutdown.wait().await });
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = shutdown_channel();
        drop(trigger);
        shutdown.wait().await;
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_trigger() {
        let (trigger, mut shutdown) = shutdown_channel();
        assert!(shutdown.sleep(Duration::from_secs(5)).await);
        trigger.trigger();
        assert!(!shutdown.sleep(Duration::from_secs(5)).await);
    }
}
