//! # packet-relay
//!
//! Intercepting TCP relay for a length-prefixed, XOR-obfuscated game protocol.
//!
//! Each accepted client is paired with a fresh upstream connection. Frames
//! travelling either way are de-obfuscated, parsed against a versioned message
//! schema, handed to registered handlers and then forwarded, dropped or
//! re-encoded with a replacement event.
//!
//! ## Layers
//! - [`core`]: byte cursors, frame header, keystream obfuscation, stream framing
//! - [`protocol`]: schemas, registry, schema codec, dispatcher, frame pipeline
//! - [`transport`]: TCP listener and per-connection relay loop
//! - [`service`]: multi-listener proxy with login redirection
//! - [`utils`]: logging and metrics
//!
//! ## Example
//! ```no_run
//! use packet_relay::config::ProxyConfig;
//! use packet_relay::service::ProxyService;
//!
//! # async fn run() -> packet_relay::error::Result<()> {
//! let config = ProxyConfig::from_file("relay.toml")?;
//! config.validate_strict()?;
//! ProxyService::new(config)?.run().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::ProxyConfig;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::{Direction, Dispatcher, Verdict};
pub use crate::protocol::event::{Event, Value};
pub use crate::protocol::pipeline::{ConnectionContext, FrameAction, Pipeline};
pub use crate::protocol::registry::{Identifier, ProtocolRegistry, SchemaVersion};
pub use crate::service::ProxyService;
