//! # Transport Layer
//!
//! TCP relay: one listener per configured endpoint, one upstream connection
//! per accepted client, both directions framed with
//! [`FrameCodec`](crate::core::codec::FrameCodec) and handled by a
//! [`Pipeline`](crate::protocol::pipeline::Pipeline).
//!
//! Either side closing or failing ends the pairing; nothing is retried.

pub mod relay;
