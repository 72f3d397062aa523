//! # Protocol Layer
//!
//! Everything above raw frames: message schemas, the registry resolving
//! opcodes to definitions, the schema codec, dispatch and per-frame handling.
//!
//! ## Components
//! - **Schema**: field specs, opcode maps, schema bundles
//! - **Registry**: identifier resolution against a lazily loaded schema
//! - **Codec**: event parsing, serialization and length computation
//! - **Dispatcher**: named handlers returning a [`Verdict`](dispatcher::Verdict)
//! - **Pipeline**: decode, dispatch and re-encode for one frame
//! - **Session**: protocol version and keystream shared by a service
//! - **Redirect**: login handler keeping world traffic on the relay

pub mod codec;
pub mod dispatcher;
pub mod event;
pub mod pipeline;
pub mod redirect;
pub mod registry;
pub mod schema;
pub mod session;
pub mod version;
