//! Events surfaced to the application.
//!
//! The connection task reports lifecycle changes over an unbounded channel,
//! so connect and disconnect notifications are never lost or reordered.
//! Drop totals travel over a watch channel instead: a consumer that falls
//! behind observes only the latest cumulative count, which is all the count
//! means anyway.

use tokio::sync::{mpsc, watch};

use crate::frame::ProtocolError;
use crate::transport::TransportError;

/// Errors reported through [`ClientEvent::Disconnected`].
#[derive(Debug)]
pub enum ClientError {
    /// The connection failed or was lost at the socket level
    Transport(TransportError),

    /// The collector violated the framing protocol
    Protocol(ProtocolError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "Transport error: {}", e),
            ClientError::Protocol(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport(e) => Some(e),
            ClientError::Protocol(e) => Some(e),
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Transport(err)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err)
    }
}

/// Notification delivered to the application through [`EventStream`].
#[derive(Debug)]
pub enum ClientEvent {
    /// A connection to the collector became ready for delivery
    Connected,

    /// An established connection was lost. Carries the triggering error,
    /// or `None` when the collector closed the connection cleanly
    Disconnected(Option<ClientError>),

    /// Records have been dropped; carries the cumulative count since the
    /// client was created
    Dropped(u64),
}

/// Receiving half of the client's event surface.
///
/// Await [`EventStream::next`] to observe the client's life. The stream
/// ends (`None`) once the client has shut down and all pending events have
/// been delivered.
pub struct EventStream {
    lifecycle: mpsc::UnboundedReceiver<ClientEvent>,
    drops: watch::Receiver<u64>,
    last_dropped: u64,
    lifecycle_closed: bool,
    drops_closed: bool,
}

impl EventStream {
    pub(crate) fn new(
        lifecycle: mpsc::UnboundedReceiver<ClientEvent>,
        drops: watch::Receiver<u64>,
    ) -> Self {
        Self {
            lifecycle,
            drops,
            last_dropped: 0,
            lifecycle_closed: false,
            drops_closed: false,
        }
    }

    /// Wait for the next event.
    ///
    /// Lifecycle events arrive in the order the connection task emitted
    /// them. Drop notifications carry the latest cumulative count at the
    /// time this call observes it; intermediate counts may be skipped.
    /// Once the connection task has exited, any unreported final drop
    /// total is delivered and the stream then ends.
    pub async fn next(&mut self) -> Option<ClientEvent> {
        loop {
            if self.lifecycle_closed {
                // The connection task is gone; nothing can drop records any
                // more. Flush a final total if one slipped in, then end.
                let dropped = *self.drops.borrow_and_update();
                if dropped > self.last_dropped {
                    self.last_dropped = dropped;
                    return Some(ClientEvent::Dropped(dropped));
                }
                return None;
            }
            tokio::select! {
                event = self.lifecycle.recv() => {
                    match event {
                        Some(event) => return Some(event),
                        None => self.lifecycle_closed = true,
                    }
                }
                changed = self.drops.changed(), if !self.drops_closed => {
                    if changed.is_err() {
                        self.drops_closed = true;
                    }
                    let dropped = *self.drops.borrow_and_update();
                    if dropped > self.last_dropped {
                        self.last_dropped = dropped;
                        return Some(ClientEvent::Dropped(dropped));
                    }
                }
            }
        }
    }
}
