//! Process-wide gateway context.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// Shutdown coordination passed to every long-running component.
///
/// The flag is sticky, so components that subscribe late still observe a
/// shutdown that already happened.
#[derive(Debug)]
pub struct GatewayContext {
    shutting_down: AtomicBool,
    tx: broadcast::Sender<()>,
}

impl GatewayContext {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            shutting_down: AtomicBool::new(false),
            tx,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Set the flag and wake every subscriber. Later calls are no-ops.
    pub fn trigger(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            tracing::info!("Shutdown initiated");
            let _ = self.tx.send(());
        }
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if self.is_shutting_down() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for GatewayContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_after_trigger() {
        let context = Arc::new(GatewayContext::new());
        let waiter = {
            let context = context.clone();
            tokio::spawn(async move { context.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!context.is_shutting_down());
        context.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(context.is_shutting_down());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let context = GatewayContext::new();
        context.trigger();
        context.trigger();
        tokio::time::timeout(Duration::from_millis(100), context.cancelled())
            .await
            .unwrap();
    }
}
