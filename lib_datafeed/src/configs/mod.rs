//! # Configuration Module
//!
//! Typed configuration for transports and providers, plus loading of a
//! multi-provider feed document from disk.
//!
//! ## Contained Modules:
//!
//! - **`provider_config`**: `TransportConfig` and the `ProviderConfig` tagged
//!   union selecting which provider implementation to build.
//! - **`config_loader`**: `FeedConfig` (named providers + logging) read from a
//!   JSON5 file.
//!
//! A `TransportConfig` is immutable for the lifetime of one provider; a new
//! logical connection gets a new provider built from its own config.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Provider and transport configuration types.
pub mod provider_config;
/// Feed document loading.
pub mod config_loader;

// --- Public API Re-exports ---
pub use config_loader::{FeedConfig, LoggingConfig, load_feed_config, parse_feed_config};
pub use provider_config::{
    AppDataConfig, MockConfig, ProviderConfig, ProviderType, RestConfig, TransportConfig,
};
