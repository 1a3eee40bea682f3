//! Configuration for the shipper client.
//!
//! Options are supplied programmatically at construction time and validated
//! before the connection task starts. Invalid values are construction-time
//! errors; nothing is corrected silently.

use std::time::Duration;

/// Default time allowed for the TCP connect and for the TLS handshake
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default number of unacknowledged data frames kept in flight
const DEFAULT_WINDOW_SIZE: usize = 16;

/// Default base delay for reconnect backoff in milliseconds
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Maximum reconnect backoff delay in milliseconds
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Default capacity of the delivery queue
const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Where and how to reach the collector.
///
/// # Examples
///
/// ```
/// use logship::{ConnectionOptions, TlsOptions};
///
/// let options = ConnectionOptions::new("logs.example.com", 5044)
///     .with_tls(TlsOptions::new());
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Hostname or IP address of the collector
    pub host: String,

    /// TCP port the collector listens on
    pub port: u16,

    /// TLS settings; `None` sends frames over plain TCP
    pub tls: Option<TlsOptions>,

    /// Time allowed for the TCP connect and for the TLS handshake, each
    pub connect_timeout: Duration,

    /// Number of unacknowledged data frames kept in flight, announced to
    /// the collector in the window frame
    pub window_size: usize,

    /// Reconnect backoff tuning
    pub backoff: BackoffOptions,
}

impl ConnectionOptions {
    /// Create options for the given collector endpoint, with defaults for
    /// everything else.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            window_size: DEFAULT_WINDOW_SIZE,
            backoff: BackoffOptions::default(),
        }
    }

    /// Enable TLS with the given settings.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Override the connect and handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the in-flight window size.
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Override the reconnect backoff tuning.
    pub fn with_backoff(mut self, backoff: BackoffOptions) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check the options for values the client cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the host is empty or the port is zero
    /// - the connect timeout or window size is zero
    /// - the backoff delays are zero or inverted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError {
                message: "collector host must not be empty".to_string(),
                option: Some("host"),
            });
        }

        if self.port == 0 {
            return Err(ConfigError {
                message: "collector port must not be zero".to_string(),
                option: Some("port"),
            });
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError {
                message: "connect timeout must be greater than zero".to_string(),
                option: Some("connect_timeout"),
            });
        }

        if self.window_size == 0 {
            return Err(ConfigError {
                message: "window size must be at least 1".to_string(),
                option: Some("window_size"),
            });
        }

        if u32::try_from(self.window_size).is_err() {
            return Err(ConfigError {
                message: format!("window size {} does not fit in 32 bits", self.window_size),
                option: Some("window_size"),
            });
        }

        self.backoff.validate()
    }
}

/// TLS settings for the collector connection.
///
/// Trust defaults to the platform certificate store; additional roots may
/// be supplied as PEM bytes for collectors behind a private CA.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Extra PEM-encoded root certificates to trust
    pub ca_certificates: Vec<Vec<u8>>,

    /// Skip certificate and hostname verification when true. Intended for
    /// tests and closed networks only
    pub accept_invalid_certs: bool,

    /// Server name presented during the handshake; defaults to the
    /// connection host
    pub domain: Option<String>,
}

impl TlsOptions {
    /// TLS with platform trust and full verification.
    pub fn new() -> Self {
        Self::default()
    }

    /// TLS with certificate and hostname verification disabled.
    pub fn insecure() -> Self {
        Self {
            accept_invalid_certs: true,
            ..Self::default()
        }
    }

    /// Trust an additional PEM-encoded root certificate.
    pub fn with_ca_certificate(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_certificates.push(pem.into());
        self
    }

    /// Override the server name presented during the handshake.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Tuning for the exponential reconnect backoff.
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    /// Delay before the first retry; later retries double from here
    pub base_delay: Duration,

    /// Ceiling no computed delay may exceed
    pub max_delay: Duration,
}

impl BackoffOptions {
    /// Create backoff tuning from explicit delays.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError {
                message: "base delay must be greater than zero".to_string(),
                option: Some("backoff.base_delay"),
            });
        }

        if self.max_delay < self.base_delay {
            return Err(ConfigError {
                message: "max delay must not be below the base delay".to_string(),
                option: Some("backoff.max_delay"),
            });
        }

        Ok(())
    }
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }
}

/// Sizing for the delivery queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Maximum number of records held while the collector is unreachable
    pub max_queue_size: usize,
}

impl QueueOptions {
    /// Create queue options with the given capacity.
    pub fn new(max_queue_size: usize) -> Self {
        Self { max_queue_size }
    }

    /// Check the options for values the client cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError {
                message: "queue capacity must be at least 1".to_string(),
                option: Some("max_queue_size"),
            });
        }
        Ok(())
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Error type for invalid configuration values
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub option: Option<&'static str>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.option {
            Some(option) => write!(f, "Configuration error for {}: {}", option, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}
