//! Transport seam between the protocol client and the wire.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::client::IBConfig;
use crate::error::{IbError, Result};
use crate::protocol::{GatewayEvent, GatewayRequest};

/// Channels of one established gateway connection.
pub struct GatewayLink {
    /// Requests written to the gateway.
    pub requests: mpsc::UnboundedSender<GatewayRequest>,
    /// Events read from the gateway, in arrival order.
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
}

/// Lower-level transport that delivers typed events and accepts typed requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the socket and perform the protocol handshake.
    async fn connect(&self, config: &IBConfig) -> Result<GatewayLink>;

    /// Close the socket. Idempotent.
    async fn disconnect(&self) -> Result<()>;
}

/// Shared handle on the current connection's request channel.
///
/// Cloned into every component that talks to the gateway; detached on
/// disconnect so late sends fail with `NotConnected` instead of queueing.
#[derive(Clone, Default)]
pub struct Outbound {
    inner: Arc<RwLock<Option<mpsc::UnboundedSender<GatewayRequest>>>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, sender: mpsc::UnboundedSender<GatewayRequest>) {
        *self.inner.write() = Some(sender);
    }

    pub fn detach(&self) {
        self.inner.write().take();
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Queue a request for the gateway.
    pub fn send(&self, request: GatewayRequest) -> Result<()> {
        let guard = self.inner.read();
        let sender = guard.as_ref().ok_or(IbError::NotConnected)?;
        trace!(kind = request.kind(), "Sending gateway request");
        sender.send(request).map_err(|_| IbError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_requires_attachment() {
        let outbound = Outbound::new();
        assert!(matches!(
            outbound.send(GatewayRequest::RequestIds),
            Err(IbError::NotConnected)
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        assert!(outbound.is_attached());
        outbound.send(GatewayRequest::Positions).unwrap();
        assert_eq!(rx.try_recv().unwrap(), GatewayRequest::Positions);

        outbound.detach();
        assert!(!outbound.is_attached());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        drop(rx);
        assert!(matches!(
            outbound.send(GatewayRequest::RequestIds),
            Err(IbError::Disconnected)
        ));
    }
}
