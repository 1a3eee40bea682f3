//! Public client handle for shipping log records to a collector.
//!
//! [`ShipperClient`] owns a background connection task and a bounded
//! delivery queue. Callers hand records over without blocking and observe
//! the client's life through the [`EventStream`] returned at construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConnectionOptions, QueueOptions};
use crate::connection::{connection_task, ConnectionState};
use crate::events::EventStream;
use crate::queue::DeliveryQueue;
use crate::record::Record;
use crate::transport;

/// Client that ships records to a collector over a resilient connection.
///
/// The client never blocks the caller and never fails a write: records are
/// queued for the background task, and anything the queue cannot hold is
/// dropped and counted. Connection trouble shows up as disconnect events
/// and a growing drop count, not as errors on the write path.
///
/// # Example
///
/// ```no_run
/// use logship::{ClientEvent, ConnectionOptions, QueueOptions, Record, ShipperClient};
///
/// #[tokio::main]
/// async fn main() {
///     let (client, mut events) = ShipperClient::new(
///         ConnectionOptions::new("logs.example.com", 5044),
///         QueueOptions::new(500),
///     )
///     .expect("Failed to create client");
///
///     tokio::spawn(async move {
///         while let Some(event) = events.next().await {
///             match event {
///                 ClientEvent::Connected => println!("connected"),
///                 ClientEvent::Disconnected(reason) => println!("disconnected: {reason:?}"),
///                 ClientEvent::Dropped(count) => println!("{count} records dropped so far"),
///             }
///         }
///     });
///
///     client.write_data_frame(Record::event("service started"));
///     client.close().await;
/// }
/// ```
pub struct ShipperClient {
    /// Queue shared with the connection task
    queue: Arc<DeliveryQueue>,

    /// Latest state published by the connection task
    state: watch::Receiver<ConnectionState>,

    /// Signal that tells the connection task to stop
    shutdown: watch::Sender<bool>,

    /// Handle of the connection task, taken by the first close
    task: Mutex<Option<JoinHandle<()>>>,

    /// Set once close has begun; writes are discarded from then on
    closed: AtomicBool,
}

impl ShipperClient {
    /// Create a client and start its connection task.
    ///
    /// Returns the client handle together with the stream of lifecycle and
    /// drop events. The first connection attempt begins immediately.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the options fail validation or the TLS
    /// trust material cannot be parsed. No task is started in that case.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, as the connection task
    /// has nowhere to run.
    pub fn new(
        connection: ConnectionOptions,
        queue: QueueOptions,
    ) -> Result<(Self, EventStream), ConfigError> {
        connection.validate()?;
        queue.validate()?;
        if let Some(tls) = &connection.tls {
            // Unusable trust material would otherwise surface as a connect
            // loop that can never succeed.
            transport::build_tls_connector(tls).map_err(|e| ConfigError {
                message: e.to_string(),
                option: Some("tls"),
            })?;
        }

        let delivery = Arc::new(DeliveryQueue::new(queue.max_queue_size));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let drops_rx = delivery.subscribe_drops();

        info!(
            host = %connection.host,
            port = connection.port,
            max_queue_size = queue.max_queue_size,
            "Starting shipper client"
        );
        let task = tokio::spawn(connection_task(
            connection,
            Arc::clone(&delivery),
            events_tx,
            state_tx,
            shutdown_rx,
        ));

        let client = Self {
            queue: delivery,
            state: state_rx,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        };
        Ok((client, EventStream::new(events_rx, drops_rx)))
    }

    /// Queue a record for delivery.
    ///
    /// Never blocks and never fails. If the queue is at capacity the
    /// record is discarded; the loss is visible through the drop counter
    /// and a `Dropped` event, not on this call. Records written after
    /// [`ShipperClient::close`] are discarded without being counted.
    pub fn write_data_frame(&self, record: Record) {
        if self.closed.load(Ordering::Acquire) {
            debug!("Client is closed, record discarded");
            return;
        }
        self.queue.enqueue(record);
    }

    /// Shut the client down.
    ///
    /// Stops the connection task, closes any live connection, and discards
    /// records still queued. Waits until the task has fully stopped before
    /// returning. Calling close again, or writing afterwards, has no
    /// effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down shipper client");
        let _ = self.shutdown.send(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "Connection task ended abnormally");
            }
        }
    }

    /// Current phase of the collector connection.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes as they happen.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Number of records waiting in the delivery queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Total records dropped since the client was created.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Whether close has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for ShipperClient {
    fn drop(&mut self) {
        // A client dropped without close still stops its task; nobody is
        // left to wait for the join handle.
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.shutdown.send(true);
        }
    }
}
