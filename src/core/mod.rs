//! # Core Wire Components
//!
//! Low-level frame handling: byte cursors, the frame header, the XOR
//! obfuscation layer and the stream framer.
//!
//! ## Components
//! - **Stream**: bounds-checked readers and fixed-capacity writers
//! - **Packet**: the 6-byte frame header and decoded packet
//! - **Obfuscation**: keystream tables and per-direction counter rules
//! - **Codec**: Tokio codec cutting byte streams into frames
//!
//! ## Wire Format
//! ```text
//! [frameLength:u16 LE] [id:u16 LE] [reserved:u8] [obfuscationType:u8] [payload(frameLength-6)]
//! ```

pub mod codec;
pub mod obfuscation;
pub mod packet;
pub mod stream;
