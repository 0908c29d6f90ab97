//! # Barflow Configuration
//!
//! Configuration loading and default values for barflow services.
//!
//! ## Features
//!
//! - **Layered Loading**: optional TOML file, then `BARFLOW__SECTION__KEY` overrides
//! - **Env Expansion**: `${VAR}` references in credentials and endpoints
//! - **Validation**: fatal startup errors for missing credentials or bad settings
//!
//! ## Usage
//!
//! ```no_run
//! use service_config::IngestorConfig;
//!
//! let config = IngestorConfig::load()?;
//! println!("subscribing to {}", config.subscription_params());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod service;
pub mod service_config;

// Re-export commonly used types
pub use service_config::{
    ConnectionSettings, EngineSettings, IngestionSettings, IngestorConfig, LoggingSettings,
    PolygonConfig, SymbolReference,
};
