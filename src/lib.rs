//! Logship
//!
//! A resilient client for shipping structured log records to a collector
//! over TCP or TLS:
//!
//! - **record**: Structured records with deterministic field ordering
//! - **frame**: Wire framing for data, window, and ack frames
//! - **queue**: Bounded delivery queue with drop accounting
//! - **transport**: Single-use TCP/TLS connections to the collector
//! - **connection**: Background task driving connect, delivery, and reconnect
//! - **events**: Lifecycle and drop notifications for the application
//! - **client**: The public [`ShipperClient`] handle
//! - **config**: Options and validation
//!
//! The client keeps one connection alive in the background, reconnecting
//! with backoff whenever it fails. Writes never block and never error:
//! records queue up while the collector is unreachable, and once the queue
//! is full the newest records are dropped and counted rather than stalling
//! the caller. Unacknowledged records are retransmitted after a reconnect,
//! so delivery is at least once up to the queue capacity.
//!
//! # Example
//!
//! ```no_run
//! use logship::{ClientEvent, ConnectionOptions, QueueOptions, Record, ShipperClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Create the client; the first connection attempt starts right away
//!     let (client, mut events) = ShipperClient::new(
//!         ConnectionOptions::new("logs.example.com", 5044),
//!         QueueOptions::new(500),
//!     )
//!     .expect("Failed to create client");
//!
//!     // Observe the connection lifecycle
//!     tokio::spawn(async move {
//!         while let Some(event) = events.next().await {
//!             match event {
//!                 ClientEvent::Connected => println!("connected"),
//!                 ClientEvent::Disconnected(reason) => println!("disconnected: {reason:?}"),
//!                 ClientEvent::Dropped(count) => println!("{count} records dropped"),
//!             }
//!         }
//!     });
//!
//!     // Ship records without waiting for the connection
//!     client.write_data_frame(Record::event("service started"));
//!
//!     client.close().await;
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod connection;
pub mod events;
pub mod frame;
pub mod queue;
pub mod record;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use client::ShipperClient;
pub use config::{BackoffOptions, ConfigError, ConnectionOptions, QueueOptions, TlsOptions};
pub use connection::ConnectionState;
pub use events::{ClientError, ClientEvent, EventStream};
pub use frame::ProtocolError;
pub use queue::{DeliveryQueue, EnqueueOutcome};
pub use record::Record;
pub use transport::TransportError;
