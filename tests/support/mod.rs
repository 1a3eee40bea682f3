//! Shared test support: an in-process collector speaking the shipper
//! protocol over real sockets, with scriptable per-connection behaviour.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use logship::{BackoffOptions, ClientEvent, ConnectionOptions, EventStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

/// Install a compact subscriber so `RUST_LOG` surfaces client activity
/// during a test run. Safe to call from every test; only the first call
/// takes effect.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

/// How a scripted connection acknowledges data frames.
#[derive(Debug, Clone, Copy)]
pub enum AckMode {
    /// Ack every data frame as soon as it is read
    EveryFrame,
    /// Never send an ack
    Never,
    /// Ack only sequences up to and including this one
    UpTo(u32),
}

/// Behaviour of one accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionScript {
    pub ack: AckMode,
    /// Close the connection after reading this many data frames;
    /// `Some(0)` closes immediately after accepting.
    pub close_after: Option<usize>,
}

impl ConnectionScript {
    pub fn ack_all() -> Self {
        Self {
            ack: AckMode::EveryFrame,
            close_after: None,
        }
    }

    pub fn silent_close_after(frames: usize) -> Self {
        Self {
            ack: AckMode::Never,
            close_after: Some(frames),
        }
    }

    pub fn close_immediately() -> Self {
        Self {
            ack: AckMode::Never,
            close_after: Some(0),
        }
    }
}

/// What the collector observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorEvent {
    /// A connection was accepted
    Connected,
    /// The client announced its window size
    Window(u32),
    /// A data frame arrived
    Record {
        sequence: u32,
        fields: BTreeMap<String, String>,
    },
    /// The connection ended, by script or by the client
    Disconnected,
}

/// In-process collector accepting shipper connections one at a time.
///
/// Connections are handled with the scripts given at start, in order; once
/// the scripts run out every further connection acks everything.
pub struct MockCollector {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    events: mpsc::UnboundedReceiver<CollectorEvent>,
    task: JoinHandle<()>,
}

impl MockCollector {
    /// Start a collector on an ephemeral port.
    pub async fn start(scripts: Vec<ConnectionScript>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind collector");
        Self::serve(listener, scripts)
    }

    /// Start a collector on a specific address, for tests where the client
    /// exists before the collector does.
    pub async fn start_at(addr: SocketAddr, scripts: Vec<ConnectionScript>) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind collector at addr");
        Self::serve(listener, scripts)
    }

    fn serve(listener: TcpListener, scripts: Vec<ConnectionScript>) -> Self {
        init_tracing();
        let addr = listener.local_addr().expect("collector addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut next_script = 0usize;
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let script = scripts
                    .get(next_script)
                    .copied()
                    .unwrap_or_else(ConnectionScript::ack_all);
                next_script += 1;
                handle_connection(socket, script, &events_tx).await;
            }
        });

        Self {
            addr,
            connections,
            events: events_rx,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client options pointing at this collector, tuned for fast tests.
    pub fn options(&self) -> ConnectionOptions {
        fast_options(self.addr)
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next observation, failing the test after a generous timeout.
    pub async fn next_event(&mut self) -> CollectorEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for collector event")
            .expect("collector task ended")
    }

    /// Next data frame, skipping other observations.
    pub async fn next_record(&mut self) -> (u32, BTreeMap<String, String>) {
        loop {
            if let CollectorEvent::Record { sequence, fields } = self.next_event().await {
                return (sequence, fields);
            }
        }
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client options for a given endpoint with short timeouts and backoff.
pub fn fast_options(addr: SocketAddr) -> ConnectionOptions {
    ConnectionOptions::new(addr.ip().to_string(), addr.port())
        .with_connect_timeout(Duration::from_millis(500))
        .with_backoff(BackoffOptions::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
        ))
}

/// Reserve an address nothing listens on; connecting to it is refused.
pub async fn reserved_addr() -> SocketAddr {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}

/// Next client event, failing the test after a generous timeout.
pub async fn next_client_event(events: &mut EventStream) -> ClientEvent {
    timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for client event")
        .expect("event stream ended unexpectedly")
}

async fn handle_connection(
    mut socket: TcpStream,
    script: ConnectionScript,
    events: &mpsc::UnboundedSender<CollectorEvent>,
) {
    let _ = events.send(CollectorEvent::Connected);

    if script.close_after == Some(0) {
        let _ = events.send(CollectorEvent::Disconnected);
        return;
    }

    let mut data_frames = 0usize;
    loop {
        let mut header = [0u8; 2];
        if socket.read_exact(&mut header).await.is_err() {
            break;
        }

        match header[1] {
            b'W' => {
                let Ok(size) = read_u32(&mut socket).await else {
                    break;
                };
                let _ = events.send(CollectorEvent::Window(size));
            }
            b'D' => {
                let Ok(sequence) = read_u32(&mut socket).await else {
                    break;
                };
                let Ok(pairs) = read_u32(&mut socket).await else {
                    break;
                };

                let mut fields = BTreeMap::new();
                let mut truncated = false;
                for _ in 0..pairs {
                    let (Ok(key), Ok(value)) =
                        (read_chunk(&mut socket).await, read_chunk(&mut socket).await)
                    else {
                        truncated = true;
                        break;
                    };
                    fields.insert(key, value);
                }
                if truncated {
                    break;
                }

                data_frames += 1;
                let _ = events.send(CollectorEvent::Record { sequence, fields });

                let ack = match script.ack {
                    AckMode::EveryFrame => Some(sequence),
                    AckMode::UpTo(limit) if sequence <= limit => Some(sequence),
                    _ => None,
                };
                if let Some(sequence) = ack {
                    if write_ack(&mut socket, sequence).await.is_err() {
                        break;
                    }
                }

                if script.close_after == Some(data_frames) {
                    break;
                }
            }
            _ => break,
        }
    }

    let _ = events.send(CollectorEvent::Disconnected);
}

async fn read_u32(socket: &mut TcpStream) -> std::io::Result<u32> {
    let mut bytes = [0u8; 4];
    socket.read_exact(&mut bytes).await?;
    Ok(u32::from_be_bytes(bytes))
}

async fn read_chunk(socket: &mut TcpStream) -> std::io::Result<String> {
    let length = read_u32(socket).await? as usize;
    let mut bytes = vec![0u8; length];
    socket.read_exact(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn write_ack(socket: &mut TcpStream, sequence: u32) -> std::io::Result<()> {
    let mut frame = vec![b'1', b'A'];
    frame.extend_from_slice(&sequence.to_be_bytes());
    socket.write_all(&frame).await?;
    socket.flush().await
}
