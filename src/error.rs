//! # Error Types
//!
//! Error handling for the relay, the obfuscation layer and the schema codec.
//!
//! This module defines every error variant that can occur while framing,
//! decoding, dispatching and re-encoding intercepted traffic.
//!
//! ## Error Categories
//! - **I/O Errors**: socket and file system failures
//! - **Cursor Errors**: reads past the end of a frame, writes past a sized buffer
//! - **Schema Errors**: unknown protocol versions, opcodes, definitions or field types
//! - **Wire Errors**: corrupt headers, offsets pointing into the header region
//! - **Resource Errors**: missing keystream tables or schema bundles
//!
//! Errors raised while handling one frame never cross the relay's per-frame
//! boundary. [`ProtocolError::drops_frame`] tells the relay whether the frame
//! is dropped or forwarded verbatim.
//!
//! ## Example Usage
//! ```rust
//! use packet_relay::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn lookup(version: u32) -> Result<&'static str> {
//!     match version {
//!         1 => Ok("known"),
//!         other => Err(ProtocolError::UnknownProtocolVersion(other)),
//!     }
//! }
//!
//! fn main() {
//!     match lookup(7) {
//!         Ok(found) => info!(found, "resolved"),
//!         Err(e) => error!(error = %e, "lookup failed"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Session errors
    pub const ERR_SESSION_LOCK: &str = "Failed to acquire session lock";

    /// Protocol validation errors
    pub const ERR_INVALID_HEADER: &str = "Invalid frame header";
    pub const ERR_MISSING_PROTOCOL_VERSION: &str = "missing protocol version";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
}

// ProtocolError is the primary error type for all relay operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Read out of bounds: need {needed} bytes at {position}, buffer holds {available}")]
    OutOfBounds {
        position: usize,
        needed: usize,
        available: usize,
    },

    #[error("Write past capacity: need {needed} bytes at position {position}, capacity {capacity}")]
    WriterOverflow {
        position: usize,
        needed: usize,
        capacity: usize,
    },

    #[error("No opcode mapping for protocol version {0}")]
    UnknownProtocolVersion(u32),

    #[error("Mapping not found for opcode {opcode} (protocol version {protocol_version})")]
    UnknownOpcode { protocol_version: u32, opcode: u16 },

    #[error("No definition found for message \"{name}\" (schema version: {schema_version})")]
    NoDefinition { name: String, schema_version: String },

    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),

    #[error("Cannot write \"{0}\": no opcode known for this message")]
    MissingOpcode(String),

    #[error("Invalid offset {offset} for \"{path}\" at {position} (inside header)")]
    InvalidOffset {
        path: String,
        offset: u16,
        position: usize,
    },

    #[error("Error writing \"{path}\" of {message} ({kind}), data: {value}, reason: {source}")]
    FieldWrite {
        message: String,
        path: String,
        kind: String,
        value: String,
        #[source]
        source: Box<ProtocolError>,
    },

    #[error("Value mismatch: expected {expected}, found {found}")]
    ValueMismatch { expected: String, found: String },

    #[error("Schema nesting deeper than {0} levels")]
    RecursionLimit(usize),

    #[error("Invalid frame header")]
    InvalidHeader,

    #[error("Keystream table {0} not found")]
    MissingKeystream(u32),

    #[error("No keystream table loaded")]
    NoKeystream,

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Keystream table {version} has {len} bytes (expected 256)")]
    InvalidKeystream { version: u32, len: usize },

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether a decode failure means the frame must be dropped rather than
    /// forwarded verbatim.
    pub fn drops_frame(&self) -> bool {
        matches!(
            self,
            ProtocolError::OutOfBounds { .. } | ProtocolError::InvalidOffset { .. }
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
