//! # Protocol Registry
//!
//! Owns every opcode map (keyed by protocol version) and every message
//! definition (keyed by name, then schema version), and resolves identifiers
//! against them.
//!
//! The schema is pulled from a [`SchemaProvider`] the first time it is needed
//! and cached for the lifetime of the registry. The registry is immutable after
//! loading, so one instance is shared by every connection behind an `Arc`.

use crate::error::{ProtocolError, Result};
use crate::protocol::schema::{FieldSpec, MessageDefinition, OpcodeMap, SchemaProvider, SchemaSet};
use crate::utils::metrics::Timer;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// What a caller names a message by
#[derive(Debug, Clone, Copy)]
pub enum Identifier<'a> {
    /// Message name, looked up in the version's opcode map
    Name(&'a str),
    /// Raw opcode from a frame header
    Opcode(u16),
    /// An already-resolved field list; no lookup happens
    Definition(&'a [FieldSpec]),
}

impl<'a> From<&'a str> for Identifier<'a> {
    fn from(name: &'a str) -> Self {
        Identifier::Name(name)
    }
}

impl From<u16> for Identifier<'_> {
    fn from(opcode: u16) -> Self {
        Identifier::Opcode(opcode)
    }
}

/// Which schema version of a message to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaVersion {
    /// Highest registered version
    #[default]
    Latest,
    Exact(u32),
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::Latest => f.write_str("*"),
            SchemaVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Result of [`ProtocolRegistry::resolve_identifier`]
#[derive(Debug, Clone)]
pub struct Resolved {
    pub name: String,
    pub opcode: Option<u16>,
    /// `None` when resolved from a bare definition
    pub schema_version: Option<u32>,
    pub definition: Arc<MessageDefinition>,
}

impl Resolved {
    /// `NAME<version>` for log and error messages
    pub fn display_name(&self) -> String {
        match self.schema_version {
            Some(v) => format!("{}<{v}>", self.name),
            None => self.name.clone(),
        }
    }
}

/// Name used for definitions resolved without a lookup
pub const ANONYMOUS_DEFINITION: &str = "<Object>";

/// Registry of opcode maps and message definitions
pub struct ProtocolRegistry {
    provider: Box<dyn SchemaProvider>,
    schema: OnceCell<SchemaSet>,
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl ProtocolRegistry {
    /// Registry that loads lazily from `provider`
    pub fn new<P: SchemaProvider + 'static>(provider: P) -> Self {
        Self {
            provider: Box::new(provider),
            schema: OnceCell::new(),
        }
    }

    /// Registry over an already-parsed schema
    pub fn from_schema(schema: SchemaSet) -> Self {
        schema.report_gaps();
        Self {
            provider: Box::new(SchemaSet::new()),
            schema: OnceCell::with_value(schema),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.schema.get().is_some()
    }

    /// Load the schema now if it has not been loaded yet
    pub fn load(&self) -> Result<()> {
        self.schema().map(|_| ())
    }

    fn schema(&self) -> Result<&SchemaSet> {
        self.schema.get_or_try_init(|| {
            let _timer = Timer::start("schema_load");
            let set = self.provider.load()?;
            let gaps = set.report_gaps();
            info!(
                maps = set.maps.len(),
                messages = set.messages.len(),
                gaps,
                "Protocol schema loaded"
            );
            Ok(set)
        })
    }

    /// Opcode map for one protocol version
    pub fn map(&self, protocol_version: u32) -> Result<&OpcodeMap> {
        self.schema()?
            .maps
            .get(&protocol_version)
            .ok_or(ProtocolError::UnknownProtocolVersion(protocol_version))
    }

    pub fn has_protocol_version(&self, protocol_version: u32) -> bool {
        self.map(protocol_version).is_ok()
    }

    /// Message name for an opcode, `None` when the opcode is unmapped
    pub fn message_name(&self, protocol_version: u32, opcode: u16) -> Result<Option<&str>> {
        Ok(self.map(protocol_version)?.name(opcode))
    }

    /// Resolve an identifier to its name, opcode, schema version and definition
    pub fn resolve_identifier(
        &self,
        protocol_version: u32,
        identifier: Identifier<'_>,
        schema_version: SchemaVersion,
    ) -> Result<Resolved> {
        let schema = self.schema()?;

        let (name, opcode) = match identifier {
            Identifier::Definition(fields) => {
                return Ok(Resolved {
                    name: ANONYMOUS_DEFINITION.to_string(),
                    opcode: None,
                    schema_version: None,
                    definition: Arc::new(MessageDefinition::new(fields.to_vec())),
                });
            }
            Identifier::Name(name) => {
                let map = self.map(protocol_version)?;
                let opcode = map.opcode(name);
                if opcode.is_none() {
                    warn!(name, protocol_version, "Opcode not known for message");
                }
                (name.to_string(), opcode)
            }
            Identifier::Opcode(opcode) => {
                let map = self.map(protocol_version)?;
                let name = map.name(opcode).ok_or(ProtocolError::UnknownOpcode {
                    protocol_version,
                    opcode,
                })?;
                (name.to_string(), Some(opcode))
            }
        };

        let no_definition = || ProtocolError::NoDefinition {
            name: name.clone(),
            schema_version: schema_version.to_string(),
        };

        let versions = schema.messages.get(&name).ok_or_else(no_definition)?;
        let (version, definition) = match schema_version {
            SchemaVersion::Latest => versions.iter().next_back(),
            SchemaVersion::Exact(v) => versions.get_key_value(&v),
        }
        .ok_or_else(no_definition)?;

        Ok(Resolved {
            name: name.clone(),
            opcode,
            schema_version: Some(*version),
            definition: Arc::clone(definition),
        })
    }
}
