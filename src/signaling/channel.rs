use crate::error::Result;
use crate::signaling::events::{Incoming, Outgoing};
use tokio::sync::mpsc;

/// Bidirectional bus to the coordinating server. Delivery is reliable and
/// ordered per sender; `emit` never waits for acknowledgement.
pub trait SignalingChannel: Send + Sync {
    /// Identity the server knows this client by.
    fn local_id(&self) -> String;

    fn emit(&self, message: Outgoing) -> Result<()>;

    /// Starts a new subscription; only events arriving after this call are
    /// delivered to it.
    fn subscribe(&self) -> Subscription;
}

/// Session-scoped listener registration. Closing (or dropping) it
/// deregisters from the channel and discards anything still queued.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Incoming>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Incoming>, on_close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            on_close: Some(Box::new(on_close)),
        }
    }

    pub async fn recv(&mut self) -> Option<Incoming> {
        if self.on_close.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Incoming> {
        if self.on_close.is_none() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.on_close.is_none()
    }

    pub fn close(&mut self) {
        if let Some(deregister) = self.on_close.take() {
            deregister();
            self.rx.close();
            while self.rx.try_recv().is_ok() {}
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
