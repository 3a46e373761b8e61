use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

/// Payload-free "storage changed" signal shared by every context in the
/// process. Receivers cannot tell which key changed; each store re-reads its
/// own key and compares.
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<()>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self) {
        // No subscribers is fine: polling still picks the change up.
        let receivers = self.tx.send(()).unwrap_or(0);
        tracing::debug!("storage change published to {} receivers", receivers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_signal() {
        let bus = ChangeBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();

        bus.publish();

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        ChangeBus::new().publish();
    }
}
