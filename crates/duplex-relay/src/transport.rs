//! Transport seam between the relay connection and the wire.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// One open duplex text stream to the relay.
///
/// Frames are whole Engine.IO text packets. The stream is closed when either
/// half is dropped.
#[derive(Debug)]
pub struct RelayLink {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

impl RelayLink {
    /// Wrap the two halves of a transport.
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self { outbound, inbound }
    }

    /// Next inbound frame.
    pub async fn recv(&mut self) -> Result<String, RelayError> {
        self.inbound.recv().await.ok_or(RelayError::Closed)
    }

    /// Queue a frame for the wire.
    pub async fn send(&self, frame: String) -> Result<(), RelayError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RelayError::Closed)
    }

    /// Queue a frame without waiting. A full queue is a transport error.
    pub fn try_send(&self, frame: String) -> Result<(), RelayError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::Transport {
                reason: "outbound queue full".into(),
            },
            mpsc::error::TrySendError::Closed(_) => RelayError::Closed,
        })
    }

    /// Handle for non-blocking sends from outside the connection task.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }
}

/// Opens transports to a relay URL.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Open a transport to `url` (an `http(s)://` relay base URL).
    async fn connect(&self, url: &str) -> Result<RelayLink, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn closed_halves_report_closed() {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (in_tx, in_rx) = mpsc::channel(1);
        let mut link = RelayLink::new(out_tx, in_rx);
        drop(in_tx);
        drop(out_rx);
        assert_matches!(link.recv().await, Err(RelayError::Closed));
        assert_matches!(link.send("2".into()).await, Err(RelayError::Closed));
        assert_matches!(link.try_send("2".into()), Err(RelayError::Closed));
    }

    #[tokio::test]
    async fn try_send_reports_a_full_queue() {
        let (out_tx, _out_rx) = mpsc::channel(1);
        let (_in_tx, in_rx) = mpsc::channel(1);
        let link = RelayLink::new(out_tx, in_rx);
        link.try_send("3".into()).unwrap();
        assert_matches!(link.try_send("3".into()), Err(RelayError::Transport { .. }));
    }
}
