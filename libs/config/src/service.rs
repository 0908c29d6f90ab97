//! Service configuration defaults
//!
//! Default values used when neither the config file nor the environment
//! provides a setting.

/// Market data feed defaults
pub mod feed {
    /// Delayed stocks cluster
    pub const DEFAULT_URL: &str = "wss://delayed.polygon.io/stocks";

    /// Minute aggregate channel
    pub const DEFAULT_CHANNEL: &str = "AM";

    /// Connection timeout (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Keepalive ping interval on quiet connections (milliseconds)
    pub const PING_INTERVAL_MS: u64 = 15_000;

    /// Time without any frame, pongs included, before the connection is considered lost (milliseconds)
    pub const MESSAGE_TIMEOUT_MS: u64 = 120_000;

    /// Reconnection backoff base (milliseconds)
    pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

    /// Reconnection backoff cap (milliseconds)
    pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
}

/// Ingestion loop defaults
pub mod ingestion {
    /// Bars or indicator rows buffered before a flush
    pub const BATCH_SIZE: usize = 500;

    /// Time-based flush interval (milliseconds)
    pub const FLUSH_INTERVAL_MS: u64 = 1_000;

    /// Batches retained while the sinks are failing
    pub const MAX_BUFFERED_BATCHES: usize = 20;

    /// Bars queued between the feed reader and the engine
    pub const CHANNEL_CAPACITY: usize = 1_024;

    /// Sink write attempts per flush
    pub const SINK_RETRY_ATTEMPTS: u32 = 3;

    /// Symbol metadata reload age (seconds); 0 disables reloading
    pub const METADATA_TTL_SECS: u64 = 3_600;
}

/// Indicator engine defaults
pub mod engine {
    /// Exchange timezone used to derive trading dates
    pub const MARKET_TIMEZONE: &str = "America/New_York";
}
