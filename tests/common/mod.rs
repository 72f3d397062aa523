//! Shared fixtures for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use packet_relay::core::obfuscation::{KeystreamTable, StaticKeystreamProvider, KEYSTREAM_LEN};
use packet_relay::core::packet::HEADER_SIZE;
use packet_relay::core::stream::{utf16_len, Writer};
use packet_relay::protocol::dispatcher::Dispatcher;
use packet_relay::protocol::pipeline::Pipeline;
use packet_relay::protocol::registry::ProtocolRegistry;
use packet_relay::protocol::schema::{FieldSpec, OpcodeMap, Primitive, SchemaSet};
use packet_relay::protocol::session::SessionContext;
use packet_relay::protocol::version::{VERSION_CHECK_RESPONSE, VERSION_STRING_OFFSET};
use std::sync::Arc;

pub const VERSION: u32 = 100;

pub const C_CHECK_VERSION: u16 = 1;
pub const S_CHECK_VERSION: u16 = 2;
pub const S_SERVER_LIST: u16 = 21;
pub const S_SELECT_WORLD: u16 = 22;
pub const C_PING: u16 = 23;

/// Same schema in bundle form, for file-based loading
pub const SCHEMA_TOML: &str = r#"
[maps.100]
C_CHECK_VERSION = 1
S_CHECK_VERSION = 2
S_SERVER_LIST = 21
S_SELECT_WORLD = 22
C_PING = 23

[[messages]]
name = "S_CHECK_VERSION"
version = 1
fields = [
    { name = "a", type = "uint32" },
    { name = "b", type = "uint32" },
    { name = "c", type = "uint32" },
    { name = "d", type = "uint16" },
    { name = "version", type = "string" },
]

[[messages]]
name = "S_SERVER_LIST"
version = 1
fields = [
    { name = "servers", type = "count" },
    { name = "servers", type = "offset" },
    { name = "servers", type = "array", fields = [
        { name = "name", type = "offset" },
        { name = "id", type = "uint32" },
        { name = "name", type = "string" },
    ] },
]

[[messages]]
name = "S_SELECT_WORLD"
version = 1
fields = [
    { name = "worldIP1", type = "offset" },
    { name = "worldIP2", type = "offset" },
    { name = "worldIP1", type = "string" },
    { name = "worldIP2", type = "string" },
]

[[messages]]
name = "C_PING"
version = 1
fields = [
    { name = "seq", type = "uint32" },
    { name = "zero", type = "uint32" },
]
"#;

fn p(name: &str, kind: Primitive) -> FieldSpec {
    FieldSpec::primitive(name, kind)
}

pub fn schema() -> SchemaSet {
    let map = OpcodeMap::new()
        .with(C_CHECK_VERSION, "C_CHECK_VERSION")
        .with(S_CHECK_VERSION, "S_CHECK_VERSION")
        .with(S_SERVER_LIST, "S_SERVER_LIST")
        .with(S_SELECT_WORLD, "S_SELECT_WORLD")
        .with(C_PING, "C_PING");

    SchemaSet::new()
        .with_map(VERSION, map)
        .with_definition(
            "S_CHECK_VERSION",
            1,
            vec![
                p("a", Primitive::UInt32),
                p("b", Primitive::UInt32),
                p("c", Primitive::UInt32),
                p("d", Primitive::UInt16),
                p("version", Primitive::String),
            ],
        )
        .with_definition(
            "S_SERVER_LIST",
            1,
            vec![
                p("servers", Primitive::Count),
                p("servers", Primitive::Offset),
                FieldSpec::array(
                    "servers",
                    vec![
                        p("name", Primitive::Offset),
                        p("id", Primitive::UInt32),
                        p("name", Primitive::String),
                    ],
                ),
            ],
        )
        .with_definition(
            "S_SELECT_WORLD",
            1,
            vec![
                p("worldIP1", Primitive::Offset),
                p("worldIP2", Primitive::Offset),
                p("worldIP1", Primitive::String),
                p("worldIP2", Primitive::String),
            ],
        )
        .with_definition(
            "C_PING",
            1,
            vec![p("seq", Primitive::UInt32), p("zero", Primitive::UInt32)],
        )
}

/// Table whose 4-byte windows are all distinct
pub fn table() -> KeystreamTable {
    let mut bytes = [0u8; KEYSTREAM_LEN];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = i as u8;
    }
    KeystreamTable::new(VERSION, bytes)
}

pub fn registry() -> Arc<ProtocolRegistry> {
    Arc::new(ProtocolRegistry::from_schema(schema()))
}

pub fn session() -> Arc<SessionContext> {
    Arc::new(SessionContext::new(Arc::new(
        StaticKeystreamProvider::new().with_table(table()),
    )))
}

pub fn pipeline(dispatcher: Dispatcher) -> Pipeline {
    Pipeline::new(registry(), session(), Arc::new(dispatcher))
}

/// Plain frame with the given id and payload
pub fn frame(id: u16, obfuscation: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + HEADER_SIZE) as u16;
    let mut out = Vec::with_capacity(len as usize);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&[0, obfuscation]);
    out.extend_from_slice(payload);
    out
}

/// Plaintext version-check response announcing `text`
pub fn version_response(text: &str) -> Bytes {
    let total = HEADER_SIZE + VERSION_STRING_OFFSET + utf16_len(text);
    let mut w = Writer::new(total);
    w.uint16(total as u16).unwrap();
    w.uint16(VERSION_CHECK_RESPONSE).unwrap();
    w.skip((2 + VERSION_STRING_OFFSET) as isize);
    w.string(text).unwrap();
    Bytes::from(w.into_inner())
}

/// Plaintext C_PING payload: counter word followed by the zero window
pub fn ping_payload(seq: u32) -> Vec<u8> {
    let mut payload = seq.to_le_bytes().to_vec();
    payload.extend_from_slice(&[0, 0, 0, 0]);
    payload
}
