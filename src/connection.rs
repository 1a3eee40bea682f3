//! Connection lifecycle for the shipper client.
//!
//! One background task owns the connection for the life of the client and
//! walks it through `Connecting -> Handshaking -> Connected`, falling back
//! to `Backoff` after any failure and trying again with exponentially
//! increasing delays. While connected it drains the delivery queue into
//! data frames, keeps a bounded window of them in flight, and releases
//! records as the collector acknowledges them. Records still unacknowledged
//! when a connection dies are returned to the front of the queue, so a
//! record is only ever lost to the queue capacity, never to a reconnect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{BackoffOptions, ConnectionOptions};
use crate::events::{ClientError, ClientEvent};
use crate::frame::{encode_data_frame, encode_window_frame, AckDecoder};
use crate::queue::DeliveryQueue;
use crate::record::Record;
use crate::transport::Transport;

/// Size of the buffer used for reading acknowledgements.
const READ_BUFFER_SIZE: usize = 4096;

/// Time allowed for the closing handshake during shutdown.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Observable phase of the collector connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted
    Disconnected,

    /// A TCP connect is in progress
    Connecting,

    /// The transport is being secured and the window announced
    Handshaking,

    /// Frames are flowing; records can be delivered
    Connected,

    /// The last attempt failed; waiting before trying again
    Backoff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// Reconnect delay schedule.
#[derive(Debug)]
pub(crate) struct BackoffState {
    options: BackoffOptions,
    attempt: u32,
}

impl BackoffState {
    pub(crate) fn new(options: BackoffOptions) -> Self {
        Self {
            options,
            attempt: 0,
        }
    }

    /// Number of consecutive failed attempts so far.
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget accumulated failures after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Calculate the delay before the next attempt and advance the schedule.
    ///
    /// Uses exponential backoff with jitter:
    /// delay = min(base_delay * 2^attempt + jitter, max_delay)
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base_delay = (self.options.base_delay.as_millis() as u64).max(1);
        let max_delay = self.options.max_delay.as_millis() as u64;

        // Calculate exponential delay: base * 2^attempt
        let exponential_delay = base_delay.saturating_mul(1 << self.attempt.min(10));

        // Add jitter (up to 25% of the delay)
        let jitter = rand::random::<u64>() % (exponential_delay / 4 + 1);

        // Cap at maximum delay
        let total_delay = exponential_delay.saturating_add(jitter).min(max_delay);

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(total_delay)
    }
}

/// Why the connected phase ended.
enum Flow {
    /// Shutdown was requested; the task should exit
    Shutdown,

    /// The connection died; carries the cause, or `None` for a clean
    /// close by the collector
    ConnectionLost(Option<ClientError>),
}

/// Drive the connection for the life of the client.
///
/// Runs until shutdown is signalled. State changes are published through
/// `state`; connect and disconnect notifications go out through `events`.
pub(crate) async fn connection_task(
    options: ConnectionOptions,
    queue: Arc<DeliveryQueue>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = BackoffState::new(options.backoff.clone());

    loop {
        state.send_replace(ConnectionState::Connecting);
        debug!(host = %options.host, port = options.port, "Connecting to collector");

        let established = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            result = establish(&options, &state) => result,
        };

        let mut transport = match established {
            Ok(transport) => transport,
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(
                    error = %err,
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis(),
                    "Connection attempt failed, backing off"
                );
                state.send_replace(ConnectionState::Backoff);
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = sleep(delay) => {}
                }
                continue;
            }
        };

        backoff.reset();
        state.send_replace(ConnectionState::Connected);
        info!(host = %options.host, port = options.port, "Connected to collector");
        let _ = events.send(ClientEvent::Connected);

        match drive_connected(&mut transport, &options, &queue, &mut shutdown).await {
            Flow::Shutdown => {
                let _ = timeout(SHUTDOWN_FLUSH_TIMEOUT, transport.shutdown()).await;
                break;
            }
            Flow::ConnectionLost(reason) => {
                match &reason {
                    Some(err) => warn!(error = %err, "Connection to collector lost"),
                    None => info!("Collector closed the connection"),
                }
                let _ = events.send(ClientEvent::Disconnected(reason));

                let delay = backoff.next_delay();
                state.send_replace(ConnectionState::Backoff);
                debug!(delay_ms = delay.as_millis(), "Backing off before reconnect");
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = sleep(delay) => {}
                }
            }
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    queue.clear();
    debug!("Connection task stopped");
}

/// Open and secure one connection, reporting the handshake phase as it
/// starts.
async fn establish(
    options: &ConnectionOptions,
    state: &watch::Sender<ConnectionState>,
) -> Result<Transport, crate::transport::TransportError> {
    let transport = Transport::connect(options).await?;
    state.send_replace(ConnectionState::Handshaking);
    transport.handshake(options).await
}

/// Pump records out and acknowledgements in until the connection dies or
/// shutdown is requested.
async fn drive_connected(
    transport: &mut Transport,
    options: &ConnectionOptions,
    queue: &DeliveryQueue,
    shutdown: &mut watch::Receiver<bool>,
) -> Flow {
    if let Err(err) = transport
        .send(&encode_window_frame(options.window_size as u32))
        .await
    {
        return Flow::ConnectionLost(Some(err.into()));
    }

    // Sequence numbers restart at 1 on every connection; acknowledgements
    // only ever refer to frames of the connection they arrived on.
    let mut sequence: u32 = 0;
    let mut in_flight: VecDeque<(u32, Record)> = VecDeque::new();
    let mut decoder = AckDecoder::new();
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        // Fill the in-flight window from the queue.
        while in_flight.len() < options.window_size {
            let Some(record) = queue.pop_front() else {
                break;
            };

            let next_sequence = sequence.wrapping_add(1);
            let frame = match encode_data_frame(next_sequence, &record) {
                Ok(frame) => frame,
                Err(err) => {
                    // Counted like a queue drop so the loss stays visible.
                    warn!(error = %err, "Record could not be framed, dropping it");
                    queue.count_drop();
                    continue;
                }
            };
            sequence = next_sequence;
            in_flight.push_back((next_sequence, record));

            let sent = tokio::select! {
                _ = shutdown_requested(shutdown) => return Flow::Shutdown,
                result = transport.send(&frame) => result,
            };
            if let Err(err) = sent {
                requeue_unacknowledged(queue, &mut in_flight);
                return Flow::ConnectionLost(Some(err.into()));
            }
            debug!(sequence = next_sequence, "Data frame sent");
        }

        // Wait for acknowledgements, new records, or shutdown. The wakeup
        // future is created before the queue is re-checked, so an enqueue
        // racing this await cannot be missed.
        let wakeup = queue.notified();
        tokio::select! {
            _ = shutdown_requested(shutdown) => return Flow::Shutdown,

            read = transport.read(&mut read_buf) => match read {
                Ok(0) => {
                    requeue_unacknowledged(queue, &mut in_flight);
                    return Flow::ConnectionLost(None);
                }
                Ok(n) => {
                    decoder.feed(&read_buf[..n]);
                    loop {
                        match decoder.next_ack() {
                            Ok(Some(ack)) => {
                                let released = release_acknowledged(&mut in_flight, ack);
                                debug!(ack, released, "Acknowledgement received");
                            }
                            Ok(None) => break,
                            Err(err) => {
                                requeue_unacknowledged(queue, &mut in_flight);
                                return Flow::ConnectionLost(Some(err.into()));
                            }
                        }
                    }
                }
                Err(err) => {
                    requeue_unacknowledged(queue, &mut in_flight);
                    return Flow::ConnectionLost(Some(err.into()));
                }
            },

            _ = wakeup, if in_flight.len() < options.window_size => {}
        }
    }
}

/// Resolve once shutdown has been signalled. A dropped sender counts as a
/// shutdown request so an abandoned task cannot spin forever.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Hand every in-flight record back to the queue for redelivery.
fn requeue_unacknowledged(queue: &DeliveryQueue, in_flight: &mut VecDeque<(u32, Record)>) {
    if in_flight.is_empty() {
        return;
    }
    let records: Vec<Record> = in_flight.drain(..).map(|(_, record)| record).collect();
    let unacknowledged = records.len();
    let lost = queue.requeue_front(records);
    debug!(unacknowledged, lost, "Returned unacknowledged records to the queue");
}

/// Drop every in-flight entry covered by a cumulative acknowledgement.
/// Returns how many were released.
fn release_acknowledged(in_flight: &mut VecDeque<(u32, Record)>, ack: u32) -> usize {
    let mut released = 0;
    while let Some((sequence, _)) = in_flight.front() {
        if !ack_covers(ack, *sequence) {
            break;
        }
        in_flight.pop_front();
        released += 1;
    }
    released
}

/// Whether a cumulative ack covers the given sequence, compared in
/// wrapping sequence space.
fn ack_covers(ack: u32, sequence: u32) -> bool {
    ack.wrapping_sub(sequence) < u32::MAX / 2
}
