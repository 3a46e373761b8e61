use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::AppResult;
use crate::storage::ChangeBus;

/// Something that can pull the latest durable state into its cache.
pub trait Reconcile: Send + Sync {
    fn key(&self) -> &'static str;

    /// Returns whether the cached contents changed.
    fn reconcile(&self) -> AppResult<bool>;
}

/// Background task that reconciles a set of stores on a fixed interval and
/// whenever the change bus fires.
///
/// Call [`shutdown`](Self::shutdown) for an orderly stop. Dropping the handle
/// aborts the task so no timer outlives its owner.
pub struct Reconciler {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reconciler {
    pub fn spawn(targets: Vec<Arc<dyn Reconcile>>, interval: Duration, bus: &ChangeBus) -> Self {
        let mut signals = Some(bus.subscribe());
        let (shutdown, mut stop) = oneshot::channel();

        let keys: Vec<&str> = targets.iter().map(|t| t.key()).collect();
        tracing::info!("Reconciling {:?} every {:?}", keys, interval);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Stores hydrate on open, so skip the immediate first tick.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {}
                    _ = next_signal(&mut signals) => {}
                }
                reconcile_all(&targets);
            }

            tracing::info!("Reconciler stopped");
        });

        Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

async fn next_signal(signals: &mut Option<broadcast::Receiver<()>>) {
    let closed = match signals.as_mut() {
        // A lagged receiver still means "something changed".
        Some(rx) => matches!(rx.recv().await, Err(RecvError::Closed)),
        None => std::future::pending::<bool>().await,
    };
    if closed {
        tracing::warn!("Change bus closed, falling back to polling only");
        *signals = None;
    }
}

fn reconcile_all(targets: &[Arc<dyn Reconcile>]) {
    for target in targets {
        if let Err(e) = target.reconcile() {
            tracing::warn!(
                key = target.key(),
                error = %e,
                "Reconcile failed, retrying next interval"
            );
        }
    }
}
