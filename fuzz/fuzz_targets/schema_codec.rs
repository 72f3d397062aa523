#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_relay::protocol::registry::{Identifier, ProtocolRegistry, SchemaVersion};
use packet_relay::protocol::schema::{FieldSpec, OpcodeMap, Primitive, SchemaSet};
use std::sync::OnceLock;

fn p(name: &str, kind: Primitive) -> FieldSpec {
    FieldSpec::primitive(name, kind)
}

fn registry() -> &'static ProtocolRegistry {
    static REGISTRY: OnceLock<ProtocolRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let schema = SchemaSet::new()
            .with_map(1, OpcodeMap::new().with(10, "S_FUZZ"))
            .with_definition(
                "S_FUZZ",
                1,
                vec![
                    p("name", Primitive::Offset),
                    p("items", Primitive::Count),
                    p("items", Primitive::Offset),
                    p("blob", Primitive::Count),
                    p("blob", Primitive::Offset),
                    p("id", Primitive::UInt64),
                    FieldSpec::object(
                        "pos",
                        vec![p("x", Primitive::Float), p("y", Primitive::Float)],
                    ),
                    FieldSpec::array(
                        "items",
                        vec![
                            p("label", Primitive::Offset),
                            p("value", Primitive::Int32),
                            p("label", Primitive::String),
                        ],
                    ),
                    p("name", Primitive::String),
                    p("blob", Primitive::Bytes),
                ],
            );
        ProtocolRegistry::from_schema(schema)
    })
}

fuzz_target!(|data: &[u8]| {
    // anything that parses must serialize again
    let mut frame = vec![0u8; 6];
    frame.extend_from_slice(data);
    let registry = registry();
    let parsed = registry.parse_frame(1, Identifier::Opcode(10), SchemaVersion::Latest, &frame);
    if let Ok(event) = parsed {
        let _ = registry.write(1, Identifier::Opcode(10), SchemaVersion::Latest, &event);
    }
});
