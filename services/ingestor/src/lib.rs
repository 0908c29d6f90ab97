//! # Barflow Ingestor
//!
//! Streams minute aggregates from a Polygon-style WebSocket feed, computes
//! indicators per bar and persists bars and indicator values in batches.
//!
//! ## Components
//!
//! - [`input`]: reconnecting feed client producing [`input::FeedBar`]s
//! - [`cache`]: single-flight cache for ticker and metadata lookups
//! - [`sinks`]: storage traits and in-memory implementations
//! - [`worker`]: the ingestion loop tying source, engine and sinks together
//!
//! Transient failures (socket drops, sink outages) are retried with capped
//! exponential backoff. Only configuration errors and rejected credentials
//! stop the service.

pub mod cache;
pub mod error;
pub mod input;
pub mod logging;
pub mod sinks;
pub mod worker;

pub use cache::SingleFlightCache;
pub use error::{IngestError, Result, SinkError};
pub use input::{BarSource, FeedBar, PolygonSource, SourceStats};
pub use sinks::{
    BarSink, InMemoryRegistry, IndicatorSink, MemoryBarSink, MemoryIndicatorSink, SymbolRegistry,
};
pub use worker::{IngestionLoop, IngestionSummary, LoopConfig};
