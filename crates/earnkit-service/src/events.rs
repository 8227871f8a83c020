//! External event bus contract and the debounced reload trigger.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Completed-transaction classification carried on the bus. Only
/// non-transfer completions can change an earning position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Plain balance transfer.
    Transfer,
    /// Cross-chain transfer.
    Xcm,
    /// Any earning action (join, leave, withdraw, claim).
    Earning,
    Other,
}

impl TransactionKind {
    pub fn is_pure_transfer(&self) -> bool {
        matches!(self, TransactionKind::Transfer)
    }
}

/// Notifications delivered by the external event bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    AccountRemoved { address: String },
    ChainStateUpdated { chain: String, active: bool },
    TransactionDone { kind: TransactionKind },
}

/// Coalesces bursts of reload triggers: the callback runs once per
/// quiet-of-`delay` window, no matter how many triggers arrived.
pub(crate) struct ReloadDebouncer {
    tx: mpsc::UnboundedSender<()>,
}

impl ReloadDebouncer {
    pub fn new<F, Fut>(delay: Duration, token: CancellationToken, reload: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    trigger = rx.recv() => {
                        if trigger.is_none() {
                            break;
                        }
                        // Absorb every trigger landing inside the window.
                        loop {
                            tokio::select! {
                                _ = token.cancelled() => return,
                                _ = tokio::time::sleep(delay) => break,
                                more = rx.recv() => {
                                    if more.is_none() {
                                        break;
                                    }
                                }
                            }
                        }
                        reload().await;
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn near_simultaneous_triggers_collapse_into_one_reload() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let debouncer = ReloadDebouncer::new(
            Duration::from_millis(50),
            CancellationToken::new(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        for _ in 0..5 {
            debouncer.trigger();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn only_plain_transfers_are_pure() {
        assert!(TransactionKind::Transfer.is_pure_transfer());
        assert!(!TransactionKind::Xcm.is_pure_transfer());
        assert!(!TransactionKind::Earning.is_pure_transfer());
        assert!(!TransactionKind::Other.is_pure_transfer());
    }
}
