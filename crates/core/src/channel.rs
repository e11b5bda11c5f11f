//! Outbound half of the control channel.

use kelion_realtime_types::{ControlMessage, encode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Encodes control messages and queues them for the transport writer.
///
/// The session owns the only long-lived clone. Other components receive it
/// for the duration of a single operation.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<String>,
    /// Cancelled when the session shuts down; a send waiting for queue space
    /// gives up instead of blocking teardown.
    shutdown: CancellationToken,
}

impl ControlChannel {
    pub fn new(tx: mpsc::Sender<String>, shutdown: CancellationToken) -> Self {
        Self { tx, shutdown }
    }

    /// Queues `message` for sending. Returns `false` if the message could not
    /// be encoded, the transport has gone away, or the session is shutting
    /// down.
    pub async fn send(&self, message: ControlMessage) -> bool {
        let frame = match encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode control message");
                return false;
            }
        };
        let sent = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!(kind = message.kind(), "session shutting down; message dropped");
                return false;
            }
            sent = self.tx.send(frame) => sent,
        };
        match sent {
            Ok(()) => {
                debug!(kind = message.kind(), "control message queued");
                true
            }
            Err(_) => {
                warn!(kind = message.kind(), "control channel closed; message dropped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
