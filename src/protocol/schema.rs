//! # Message Schemas
//!
//! In-memory shapes of the opcode maps and message definitions consumed by the
//! [`ProtocolRegistry`](crate::protocol::registry::ProtocolRegistry).
//!
//! A [`MessageDefinition`] is an ordered list of [`FieldSpec`]s; field order is
//! wire order. `count` and `offset` meta-fields share the name of the field they
//! describe and never appear in decoded events.
//!
//! [`SchemaBundle`] is the serde form of the same shapes, so a schema that was
//! converted ahead of time can be shipped as TOML:
//!
//! ```toml
//! [maps.123456]
//! C_CHECK_VERSION = 1
//! S_CHECK_VERSION = 2
//!
//! [[messages]]
//! name = "S_CHECK_VERSION"
//! version = 1
//! fields = [{ name = "ok", type = "bool" }]
//! ```

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Primitive wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Bytes,
    String,
    /// u16 element count of the sibling array or byte run with the same name
    Count,
    /// u16 frame position of the sibling field with the same name
    Offset,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Byte => "byte",
            Primitive::Int16 => "int16",
            Primitive::UInt16 => "uint16",
            Primitive::Int32 => "int32",
            Primitive::UInt32 => "uint32",
            Primitive::Int64 => "int64",
            Primitive::UInt64 => "uint64",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Bytes => "bytes",
            Primitive::String => "string",
            Primitive::Count => "count",
            Primitive::Offset => "offset",
        }
    }

    /// Serialized width, or `None` for variable-length types
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Primitive::Bool | Primitive::Byte => Some(1),
            Primitive::Int16 | Primitive::UInt16 | Primitive::Count | Primitive::Offset => Some(2),
            Primitive::Int32 | Primitive::UInt32 | Primitive::Float => Some(4),
            Primitive::Int64 | Primitive::UInt64 | Primitive::Double => Some(8),
            Primitive::Bytes | Primitive::String => None,
        }
    }

    pub fn is_meta(self) -> bool {
        matches!(self, Primitive::Count | Primitive::Offset)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Primitive {
    type Err = ProtocolError;

    fn from_str(tag: &str) -> Result<Self> {
        Ok(match tag {
            "bool" => Primitive::Bool,
            "byte" => Primitive::Byte,
            "int16" => Primitive::Int16,
            "uint16" => Primitive::UInt16,
            "int32" => Primitive::Int32,
            "uint32" => Primitive::UInt32,
            "int64" => Primitive::Int64,
            "uint64" => Primitive::UInt64,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "bytes" => Primitive::Bytes,
            "string" => Primitive::String,
            "count" => Primitive::Count,
            "offset" => Primitive::Offset,
            other => return Err(ProtocolError::UnknownFieldType(other.to_string())),
        })
    }
}

/// Type of one field: a primitive or a nested field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Primitive(Primitive),
    /// Fixed embedded struct
    Object(Vec<FieldSpec>),
    /// Repeated struct; repeat count comes from the `count` field of the same name
    Array(Vec<FieldSpec>),
}

impl TypeTag {
    /// Build a tag from its textual name. `object` and `array` take `fields`.
    pub fn from_tag(tag: &str, fields: Vec<FieldSpec>) -> Result<Self> {
        match tag {
            "object" => Ok(TypeTag::Object(fields)),
            "array" => Ok(TypeTag::Array(fields)),
            other => other.parse().map(TypeTag::Primitive),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Primitive(p) => p.name(),
            TypeTag::Object(_) => "object",
            TypeTag::Array(_) => "array",
        }
    }
}

/// One named field of a message definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub struct FieldSpec {
    pub name: String,
    pub kind: TypeTag,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: TypeTag) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn primitive(name: impl Into<String>, kind: Primitive) -> Self {
        Self::new(name, TypeTag::Primitive(kind))
    }

    pub fn object(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self::new(name, TypeTag::Object(fields))
    }

    pub fn array(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self::new(name, TypeTag::Array(fields))
    }
}

/// Serde representation of a field: `{ name, type, fields? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<RawField>,
}

impl TryFrom<RawField> for FieldSpec {
    type Error = ProtocolError;

    fn try_from(raw: RawField) -> Result<Self> {
        let fields = raw
            .fields
            .into_iter()
            .map(FieldSpec::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(FieldSpec::new(raw.name, TypeTag::from_tag(&raw.kind, fields)?))
    }
}

impl From<FieldSpec> for RawField {
    fn from(spec: FieldSpec) -> Self {
        let kind = spec.kind.name().to_string();
        let fields = match spec.kind {
            TypeTag::Object(fields) | TypeTag::Array(fields) => {
                fields.into_iter().map(RawField::from).collect()
            }
            TypeTag::Primitive(_) => Vec::new(),
        };
        RawField {
            name: spec.name,
            kind,
            fields,
        }
    }
}

/// Field layout of one (message name, schema version) pair
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageDefinition {
    fields: Vec<FieldSpec>,
}

impl MessageDefinition {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

impl From<Vec<FieldSpec>> for MessageDefinition {
    fn from(fields: Vec<FieldSpec>) -> Self {
        Self::new(fields)
    }
}

/// Bidirectional opcode <-> message name mapping for one protocol version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpcodeMap {
    by_code: HashMap<u16, String>,
    by_name: HashMap<String, u16>,
}

impl OpcodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, opcode: u16, name: impl Into<String>) {
        let name = name.into();
        if let Some(previous) = self.by_code.insert(opcode, name.clone()) {
            if previous != name {
                warn!(opcode, %previous, %name, "Opcode remapped");
                self.by_name.remove(&previous);
            }
        }
        self.by_name.insert(name, opcode);
    }

    pub fn with(mut self, opcode: u16, name: impl Into<String>) -> Self {
        self.insert(opcode, name);
        self
    }

    pub fn name(&self, opcode: u16) -> Option<&str> {
        self.by_code.get(&opcode).map(String::as_str)
    }

    pub fn opcode(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(u16, S)> for OpcodeMap {
    fn from_iter<I: IntoIterator<Item = (u16, S)>>(iter: I) -> Self {
        let mut map = OpcodeMap::new();
        for (opcode, name) in iter {
            map.insert(opcode, name);
        }
        map
    }
}

/// Every opcode map and message definition known to the relay
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    pub(crate) maps: HashMap<u32, OpcodeMap>,
    pub(crate) messages: HashMap<String, BTreeMap<u32, Arc<MessageDefinition>>>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_map(&mut self, protocol_version: u32, map: OpcodeMap) {
        self.maps.insert(protocol_version, map);
    }

    pub fn insert_definition(
        &mut self,
        name: impl Into<String>,
        schema_version: u32,
        definition: impl Into<MessageDefinition>,
    ) {
        self.messages
            .entry(name.into())
            .or_default()
            .insert(schema_version, Arc::new(definition.into()));
    }

    pub fn with_map(mut self, protocol_version: u32, map: OpcodeMap) -> Self {
        self.insert_map(protocol_version, map);
        self
    }

    pub fn with_definition(
        mut self,
        name: impl Into<String>,
        schema_version: u32,
        definition: impl Into<MessageDefinition>,
    ) -> Self {
        self.insert_definition(name, schema_version, definition);
        self
    }

    /// Log map entries without a definition and definitions without a mapping
    pub fn report_gaps(&self) -> usize {
        let mut gaps = 0;
        for (version, map) in &self.maps {
            for name in map.names() {
                if !self.messages.contains_key(name) {
                    warn!(protocol_version = version, name, "Mapped message has no definition");
                    gaps += 1;
                }
            }
        }
        for name in self.messages.keys() {
            if !self.maps.values().any(|map| map.opcode(name).is_some()) {
                warn!(name = %name, "Unmapped message definition");
                gaps += 1;
            }
        }
        gaps
    }
}

/// Supplies the parsed schema, once, when the registry first needs it
pub trait SchemaProvider: Send + Sync {
    fn load(&self) -> Result<SchemaSet>;
}

impl SchemaProvider for SchemaSet {
    fn load(&self) -> Result<SchemaSet> {
        Ok(self.clone())
    }
}

/// Serde form of a [`SchemaSet`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// protocol version -> message name -> opcode
    #[serde(default)]
    pub maps: BTreeMap<String, BTreeMap<String, u16>>,

    #[serde(default)]
    pub messages: Vec<MessageEntry>,
}

/// One message definition inside a [`SchemaBundle`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntry {
    pub name: String,
    pub version: u32,
    pub fields: Vec<FieldSpec>,
}

impl SchemaBundle {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            // unknown field types surface through serde as plain messages
            ProtocolError::SchemaError(format!("Failed to parse schema bundle: {e}"))
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProtocolError::SchemaError(format!(
                "Failed to read schema bundle {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn to_set(&self) -> Result<SchemaSet> {
        let mut set = SchemaSet::new();
        for (version, names) in &self.maps {
            let version: u32 = version.parse().map_err(|_| {
                ProtocolError::SchemaError(format!("Invalid protocol version key \"{version}\""))
            })?;
            let map = names
                .iter()
                .map(|(name, opcode)| (*opcode, name.clone()))
                .collect();
            set.insert_map(version, map);
        }
        for entry in &self.messages {
            set.insert_definition(entry.name.clone(), entry.version, entry.fields.clone());
        }
        Ok(set)
    }
}

impl SchemaProvider for SchemaBundle {
    fn load(&self) -> Result<SchemaSet> {
        self.to_set()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_primitive_from_str() {
        assert_eq!("uint16".parse::<Primitive>().unwrap(), Primitive::UInt16);
        assert_eq!("offset".parse::<Primitive>().unwrap(), Primitive::Offset);
        assert!(matches!(
            "vec3".parse::<Primitive>(),
            Err(ProtocolError::UnknownFieldType(t)) if t == "vec3"
        ));
    }

    #[test]
    fn test_opcode_map_bidirectional() {
        let map: OpcodeMap = [(1u16, "C_CHECK_VERSION"), (2, "S_CHECK_VERSION")]
            .into_iter()
            .collect();
        assert_eq!(map.name(2), Some("S_CHECK_VERSION"));
        assert_eq!(map.opcode("C_CHECK_VERSION"), Some(1));
        assert_eq!(map.name(3), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_opcode_remap_drops_stale_name() {
        let map = OpcodeMap::new().with(5, "OLD").with(5, "NEW");
        assert_eq!(map.name(5), Some("NEW"));
        assert_eq!(map.opcode("OLD"), None);
    }

    #[test]
    fn test_bundle_from_toml() {
        let bundle = SchemaBundle::from_toml(
            r#"
            [maps.31]
            S_SERVER_LIST = 100

            [[messages]]
            name = "S_SERVER_LIST"
            version = 2
            fields = [
                { name = "servers", type = "count" },
                { name = "servers", type = "array", fields = [
                    { name = "id", type = "uint32" },
                    { name = "name", type = "string" },
                ] },
            ]
            "#,
        )
        .unwrap();

        let set = bundle.to_set().unwrap();
        assert_eq!(set.maps[&31].opcode("S_SERVER_LIST"), Some(100));
        let def = &set.messages["S_SERVER_LIST"][&2];
        assert_eq!(def.fields().len(), 2);
        match &def.fields()[1].kind {
            TypeTag::Array(fields) => {
                assert_eq!(fields[1], FieldSpec::primitive("name", Primitive::String));
            }
            other => panic!("expected array, got {other:?}"),
        }
        assert_eq!(set.report_gaps(), 0);
    }

    #[test]
    fn test_bundle_rejects_unknown_type() {
        let result = SchemaBundle::from_toml(
            r#"
            [[messages]]
            name = "S_BAD"
            version = 1
            fields = [{ name = "pos", type = "vec3" }]
            "#,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("vec3"), "{err}");
    }

    #[test]
    fn test_report_gaps_counts_both_sides() {
        let set = SchemaSet::new()
            .with_map(1, OpcodeMap::new().with(10, "S_MAPPED_ONLY"))
            .with_definition("S_DEFINED_ONLY", 1, Vec::new());
        assert_eq!(set.report_gaps(), 2);
    }
}
