//! # Data Retrieval Module
//!
//! HTTP plumbing for sources that are polled rather than streamed.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff.
//!   The REST poller provider is built on it.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, RawResponse};
