//! # Utility Modules
//!
//! Logging setup and observability counters shared by the relay.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from
//!   [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe frame and connection counters

pub mod logging;
pub mod metrics;
