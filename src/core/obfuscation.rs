//! # XOR Obfuscation Layer
//!
//! Frames with obfuscation type 1 carry a payload XORed byte-for-byte against a
//! 256-byte keystream table, indexed by `(byteIndex + counter) mod 256`.
//!
//! The counter is derived per direction:
//! - **from server**: low byte of the header `id` field
//! - **from client**: recovered by locating ciphertext bytes `4..8` in the table
//!   (the plaintext there is zero), counter = `matchIndex - 4`
//! - **to server**: first four plaintext payload bytes as a little-endian u32
//! - **to client**: `id mod 256`
//!
//! Keystream tables are versioned independently of the protocol schema and are
//! supplied by a [`KeystreamProvider`].

use crate::core::packet::{ObfuscationType, Packet, PacketHeader, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Size of every keystream table
pub const KEYSTREAM_LEN: usize = 256;

/// Offset of the known-zero plaintext window used for counter recovery
const RECOVERY_WINDOW_START: usize = 4;
const RECOVERY_WINDOW_LEN: usize = 4;

/// A 256-byte keystream table tagged with its table version
#[derive(Clone, PartialEq, Eq)]
pub struct KeystreamTable {
    version: u32,
    bytes: [u8; KEYSTREAM_LEN],
}

impl std::fmt::Debug for KeystreamTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystreamTable")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl KeystreamTable {
    pub fn new(version: u32, bytes: [u8; KEYSTREAM_LEN]) -> Self {
        Self { version, bytes }
    }

    /// Build a table from raw resource bytes, which must be exactly 256 long
    pub fn from_slice(version: u32, data: &[u8]) -> Result<Self> {
        let bytes: [u8; KEYSTREAM_LEN] =
            data.try_into().map_err(|_| ProtocolError::InvalidKeystream {
                version,
                len: data.len(),
            })?;
        Ok(Self { version, bytes })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8; KEYSTREAM_LEN] {
        &self.bytes
    }

    /// XOR `data` in place. Applying it twice with the same counter is the identity.
    pub fn apply(&self, data: &mut [u8], counter: u8) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.bytes[(i + counter as usize) & 0xFF];
        }
    }

    /// Recover the client counter from ciphertext bytes `4..8`.
    ///
    /// Non-wrapping table positions are searched first and the first match wins;
    /// windows that wrap past the end of the table are only tried afterwards.
    pub fn recover_counter(&self, ciphertext: &[u8]) -> Option<u8> {
        let window = ciphertext
            .get(RECOVERY_WINDOW_START..RECOVERY_WINDOW_START + RECOVERY_WINDOW_LEN)?;

        let found = self
            .bytes
            .windows(RECOVERY_WINDOW_LEN)
            .position(|candidate| candidate == window)
            .or_else(|| {
                (KEYSTREAM_LEN - RECOVERY_WINDOW_LEN + 1..KEYSTREAM_LEN).find(|&start| {
                    window
                        .iter()
                        .enumerate()
                        .all(|(i, b)| self.bytes[(start + i) & 0xFF] == *b)
                })
            })?;

        Some((found as u8).wrapping_sub(RECOVERY_WINDOW_START as u8))
    }
}

/// Supplies keystream tables by table version
pub trait KeystreamProvider: Send + Sync {
    fn load(&self, table_version: u32) -> Result<KeystreamTable>;
}

/// Reads `<directory>/<table_version>.xor`
#[derive(Debug, Clone)]
pub struct DirectoryKeystreamProvider {
    directory: PathBuf,
}

impl DirectoryKeystreamProvider {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path_for(&self, table_version: u32) -> PathBuf {
        self.directory.join(format!("{table_version}.xor"))
    }
}

impl KeystreamProvider for DirectoryKeystreamProvider {
    fn load(&self, table_version: u32) -> Result<KeystreamTable> {
        let path = self.path_for(table_version);
        let data = std::fs::read(&path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Could not read keystream table");
            ProtocolError::MissingKeystream(table_version)
        })?;
        debug!(path = %path.display(), table_version, "Loaded keystream table");
        KeystreamTable::from_slice(table_version, &data)
    }
}

/// In-memory tables, keyed by table version
#[derive(Debug, Clone, Default)]
pub struct StaticKeystreamProvider {
    tables: HashMap<u32, KeystreamTable>,
}

impl StaticKeystreamProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: KeystreamTable) -> Self {
        self.tables.insert(table.version(), table);
        self
    }
}

impl KeystreamProvider for StaticKeystreamProvider {
    fn load(&self, table_version: u32) -> Result<KeystreamTable> {
        self.tables
            .get(&table_version)
            .cloned()
            .ok_or(ProtocolError::MissingKeystream(table_version))
    }
}

/// How the counter of an inbound client frame was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterRecovery {
    /// Frame was not XOR-obfuscated
    NotObfuscated,
    /// Counter found in the keystream table
    Recovered(u8),
    /// No match; the caller-supplied fallback was used
    Fallback(u8),
}

fn split_frame(frame: &[u8]) -> Result<(PacketHeader, BytesMut)> {
    let header = PacketHeader::parse(frame)?;
    Ok((header, BytesMut::from(&frame[HEADER_SIZE..])))
}

fn packet(header: PacketHeader, payload: BytesMut) -> Packet {
    Packet {
        length: header.length,
        id: header.id,
        reserved: header.reserved,
        obfuscation: header.obfuscation,
        payload: payload.freeze(),
    }
}

fn require(table: Option<&KeystreamTable>) -> Result<&KeystreamTable> {
    table.ok_or(ProtocolError::NoKeystream)
}

/// Decode a frame received from the server
pub fn from_server(frame: &[u8], table: Option<&KeystreamTable>) -> Result<Packet> {
    let (header, mut payload) = split_frame(frame)?;
    if header.obfuscation == ObfuscationType::Xor {
        let counter = frame[2];
        require(table)?.apply(&mut payload, counter);
    }
    Ok(packet(header, payload))
}

/// Decode a frame received from the client, recovering its counter
pub fn from_client(
    frame: &[u8],
    table: Option<&KeystreamTable>,
    fallback_counter: u8,
) -> Result<(Packet, CounterRecovery)> {
    let (header, mut payload) = split_frame(frame)?;
    if header.obfuscation != ObfuscationType::Xor {
        return Ok((packet(header, payload), CounterRecovery::NotObfuscated));
    }

    let table = require(table)?;
    let recovery = match table.recover_counter(&payload) {
        Some(counter) => {
            debug!(counter, "Recovered client counter");
            CounterRecovery::Recovered(counter)
        }
        None => {
            warn!(
                fallback = fallback_counter,
                "Client counter not found in keystream table"
            );
            CounterRecovery::Fallback(fallback_counter)
        }
    };
    let counter = match recovery {
        CounterRecovery::Recovered(c) | CounterRecovery::Fallback(c) => c,
        CounterRecovery::NotObfuscated => 0,
    };
    table.apply(&mut payload, counter);
    Ok((packet(header, payload), recovery))
}

fn build_frame(
    payload: &[u8],
    obfuscation: ObfuscationType,
    id: u16,
    counter: u8,
    table: Option<&KeystreamTable>,
) -> Result<Bytes> {
    let total = payload.len() + HEADER_SIZE;
    if total > MAX_FRAME_SIZE {
        return Err(ProtocolError::OversizedFrame(total));
    }

    let mut buf = BytesMut::with_capacity(total);
    PacketHeader {
        length: total as u16,
        id,
        reserved: 0,
        obfuscation,
    }
    .write_to(&mut buf);
    buf.extend_from_slice(payload);

    if obfuscation == ObfuscationType::Xor {
        require(table)?.apply(&mut buf[HEADER_SIZE..], counter);
    }
    Ok(buf.freeze())
}

/// Frame a plaintext payload for the server
pub fn to_server(
    payload: &[u8],
    obfuscation: ObfuscationType,
    id: u16,
    table: Option<&KeystreamTable>,
) -> Result<Bytes> {
    let mut word = [0u8; 4];
    for (dst, src) in word.iter_mut().zip(payload) {
        *dst = *src;
    }
    let counter = u32::from_le_bytes(word) as u8;
    build_frame(payload, obfuscation, id, counter, table)
}

/// Frame a plaintext payload for the client
pub fn to_client(
    payload: &[u8],
    obfuscation: ObfuscationType,
    id: u16,
    table: Option<&KeystreamTable>,
) -> Result<Bytes> {
    build_frame(payload, obfuscation, id, id as u8, table)
}
