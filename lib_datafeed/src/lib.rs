//! # lib_datafeed
//!
//! The streaming data-provider engine. A provider connects to an external
//! real-time source, pulls a bounded initial snapshot (deduplicated against an
//! optional key column), then switches to continuous update delivery while
//! counting traffic. Rows pulled through a provider can be fed to the schema
//! inference engine to derive column paths, types and nullability.
//!
//! ## Folders
//!
//! - **`core`**: deduplication buffer, statistics tracker, completion guard,
//!   connection state and the provider registry.
//! - **`schema`**: pure, synchronous field inference over JSON rows.
//! - **`configs`** *(feature `configs`)*: transport/provider configuration.
//! - **`transport`** *(feature `transport`)*: STOMP, raw WebSocket and
//!   Socket.IO clients behind one `TransportClient` trait.
//! - **`providers`** *(feature `providers`)*: the capability facade shared by
//!   every source, and its implementations.
//! - **`retrieve`** *(feature `retrieve`)*: retrying HTTP client.
//! - **`loggers`** *(feature `loggers`)*: tracing subscriber setup.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod errors;
pub mod schema;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "providers")]
pub mod providers;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "transport")]
pub mod transport;

pub use errors::{ProviderError, Result};
