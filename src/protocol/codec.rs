//! # Schema Codec
//!
//! Parses payloads into [`Event`]s and serializes events back to frames by
//! walking a [`MessageDefinition`] in declared order.
//!
//! Meta-fields are tracked per message (and per array element) by dotted field
//! path:
//! - `count`: u16 element count of the array or byte run sharing its path
//! - `offset`: u16 frame position where the field sharing its path starts
//!
//! When writing, both are emitted as zero placeholders and backpatched once the
//! real value is known. Offsets are frame-absolute (the 6-byte header counts),
//! so the parser reads from the full frame starting at [`HEADER_SIZE`].

use crate::core::packet::{ObfuscationType, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::core::stream::{utf16_len, Reader, Writer};
use crate::error::{ProtocolError, Result};
use crate::protocol::event::{Event, Value};
use crate::protocol::registry::{
    Identifier, ProtocolRegistry, SchemaVersion, ANONYMOUS_DEFINITION,
};
use crate::protocol::schema::{FieldSpec, Primitive, TypeTag};
use std::collections::HashMap;
use tracing::warn;

/// Deepest nesting of objects and arrays the codec will follow
pub const MAX_NESTING_DEPTH: usize = 16;

fn join(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

fn enter(depth: usize) -> Result<usize> {
    let next = depth + 1;
    if next > MAX_NESTING_DEPTH {
        return Err(ProtocolError::RecursionLimit(MAX_NESTING_DEPTH));
    }
    Ok(next)
}

/// Path of element `index` of the array at `path`
fn element(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

fn field_error(
    message: &str,
    path: &str,
    kind: &str,
    value: Option<&Value>,
    source: ProtocolError,
) -> ProtocolError {
    ProtocolError::FieldWrite {
        message: message.to_string(),
        path: path.to_string(),
        kind: kind.to_string(),
        value: match value {
            Some(v) => format!("{v:?}"),
            None => "<missing>".to_string(),
        },
        source: Box::new(source),
    }
}

fn mismatch(kind: &TypeTag, value: &Value) -> ProtocolError {
    ProtocolError::ValueMismatch {
        expected: kind.name().to_string(),
        found: value.kind().to_string(),
    }
}

/// Serialized length of `data` under `fields`, header excluded
pub fn get_length(fields: &[FieldSpec], data: &Event) -> Result<usize> {
    Measure {
        display: ANONYMOUS_DEFINITION,
    }
    .length_at(fields, data, "", 0)
}

/// Length pass; wrong-typed values are reported against `display`
struct Measure<'d> {
    display: &'d str,
}

impl Measure<'_> {
    fn length_at(
        &self,
        fields: &[FieldSpec],
        data: &Event,
        base: &str,
        depth: usize,
    ) -> Result<usize> {
        let mut length = 0;
        for field in fields {
            let path = join(base, &field.name);
            let value = data.get(&field.name);
            let wrong_type = |other: &Value| {
                let source = mismatch(&field.kind, other);
                field_error(self.display, &path, field.kind.name(), value, source)
            };

            length += match &field.kind {
                TypeTag::Array(sub) => match value {
                    None => 0,
                    Some(Value::Array(items)) => {
                        let depth = enter(depth)?;
                        let mut sum = 0;
                        for (index, item) in items.iter().enumerate() {
                            sum += self.length_at(sub, item, &element(&path, index), depth)?;
                        }
                        sum
                    }
                    Some(other) => return Err(wrong_type(other)),
                },
                TypeTag::Object(sub) => match value {
                    None => self.length_at(sub, &Event::new(), &path, enter(depth)?)?,
                    Some(Value::Object(inner)) => self.length_at(sub, inner, &path, enter(depth)?)?,
                    Some(other) => return Err(wrong_type(other)),
                },
                TypeTag::Primitive(Primitive::Bytes) => match value {
                    None => 0,
                    Some(Value::Bytes(run)) => run.len(),
                    Some(other) => return Err(wrong_type(other)),
                },
                TypeTag::Primitive(Primitive::String) => match value {
                    None => utf16_len(""),
                    Some(Value::String(s)) => utf16_len(s),
                    Some(other) => return Err(wrong_type(other)),
                },
                TypeTag::Primitive(kind) => kind.fixed_size().unwrap_or(0),
            };
        }
        Ok(length)
    }
}

/// Per-message (or per-array-element) meta-field bookkeeping while parsing
#[derive(Default)]
struct ParseScope {
    counts: HashMap<String, u16>,
    offsets: HashMap<String, u16>,
}

struct Parser<'r, 'a> {
    reader: &'r mut Reader<'a>,
    display: String,
}

impl Parser<'_, '_> {
    fn parse_fields(&mut self, fields: &[FieldSpec], base: &str, depth: usize) -> Result<Event> {
        let mut scope = ParseScope::default();
        let mut data = Event::new();
        for field in fields {
            self.parse_field(field, &mut data, base, &mut scope, depth)?;
        }
        Ok(data)
    }

    fn parse_field(
        &mut self,
        field: &FieldSpec,
        data: &mut Event,
        base: &str,
        scope: &mut ParseScope,
        depth: usize,
    ) -> Result<()> {
        let path = join(base, &field.name);

        match &field.kind {
            TypeTag::Object(sub) => {
                let depth = enter(depth)?;
                let mut inner = Event::new();
                for f in sub {
                    self.parse_field(f, &mut inner, &path, scope, depth)?;
                }
                data.insert(field.name.clone(), Value::Object(inner));
            }
            TypeTag::Array(sub) => {
                let depth = enter(depth)?;
                let count = scope.counts.get(&path).copied().unwrap_or(0);
                let mut items = Vec::with_capacity(count as usize);
                for index in 0..count as usize {
                    items.push(self.parse_fields(sub, &element(&path, index), depth)?);
                }
                data.insert(field.name.clone(), Value::Array(items));
            }
            TypeTag::Primitive(Primitive::Count) => {
                let count = self.reader.uint16()?;
                scope.counts.insert(path, count);
            }
            TypeTag::Primitive(Primitive::Offset) => {
                let offset = self.reader.uint16()?;
                scope.offsets.insert(path, offset);
            }
            TypeTag::Primitive(kind) => {
                let count = scope.counts.get(&path).copied();
                if let Some(&offset) = scope.offsets.get(&path) {
                    let empty_run = *kind == Primitive::Bytes && count.unwrap_or(0) == 0;
                    if !empty_run {
                        self.check_offset(&path, offset, scope)?;
                    }
                }
                let value = read_primitive(self.reader, *kind, count)?;
                data.insert(field.name.clone(), value);
            }
        }
        Ok(())
    }

    fn check_offset(&mut self, path: &str, offset: u16, scope: &ParseScope) -> Result<()> {
        let header_end = (2 + scope.offsets.len() + scope.counts.len()) * 2;
        if (offset as usize) < header_end {
            return Err(ProtocolError::InvalidOffset {
                path: format!("{}.{path}", self.display),
                offset,
                position: self.reader.position(),
            });
        }
        if self.reader.position() != offset as usize {
            warn!(
                name = %self.display,
                path,
                position = self.reader.position(),
                expected = offset,
                "Offset mismatch"
            );
            self.reader.seek(offset as usize);
        }
        Ok(())
    }
}

fn read_primitive(reader: &mut Reader<'_>, kind: Primitive, count: Option<u16>) -> Result<Value> {
    Ok(match kind {
        Primitive::Bool => Value::Bool(reader.bool()?),
        Primitive::Byte => Value::Byte(reader.byte()?),
        Primitive::Int16 => Value::Int16(reader.int16()?),
        Primitive::UInt16 => Value::UInt16(reader.uint16()?),
        Primitive::Int32 => Value::Int32(reader.int32()?),
        Primitive::UInt32 => Value::UInt32(reader.uint32()?),
        Primitive::Int64 => Value::Int64(reader.int64()?),
        Primitive::UInt64 => Value::UInt64(reader.uint64()?),
        Primitive::Float => Value::Float(reader.float()?),
        Primitive::Double => Value::Double(reader.double()?),
        Primitive::String => Value::String(reader.string()?),
        Primitive::Bytes => match count {
            Some(n) => Value::Bytes(reader.bytes(n as usize)?),
            None => Value::Bytes(reader.rest()),
        },
        Primitive::Count | Primitive::Offset => Value::UInt16(reader.uint16()?),
    })
}

/// Per-message (or per-array-element) placeholder positions while writing
#[derive(Default)]
struct WriteScope {
    counts: HashMap<String, usize>,
    offsets: HashMap<String, usize>,
}

struct Serializer<'w> {
    writer: &'w mut Writer,
    display: String,
}

fn to_u16(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| ProtocolError::OversizedFrame(value))
}

impl Serializer<'_> {
    fn write_fields(
        &mut self,
        fields: &[FieldSpec],
        data: &Event,
        base: &str,
        depth: usize,
    ) -> Result<()> {
        let mut scope = WriteScope::default();
        for field in fields {
            self.write_field(field, data, base, &mut scope, depth)?;
        }
        Ok(())
    }

    fn write_field(
        &mut self,
        field: &FieldSpec,
        data: &Event,
        base: &str,
        scope: &mut WriteScope,
        depth: usize,
    ) -> Result<()> {
        let path = join(base, &field.name);
        let value = data.get(&field.name);

        match &field.kind {
            TypeTag::Object(sub) => {
                let depth = enter(depth)?;
                let empty = Event::new();
                let inner = match value {
                    None => &empty,
                    Some(Value::Object(inner)) => inner,
                    Some(other) => {
                        let source = mismatch(&field.kind, other);
                        return Err(self.error(&path, &field.kind, value, source));
                    }
                };
                for f in sub {
                    self.write_field(f, inner, &path, scope, depth)?;
                }
            }
            TypeTag::Array(sub) => {
                let depth = enter(depth)?;
                let items = match value {
                    None => return Ok(()),
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        let source = mismatch(&field.kind, other);
                        return Err(self.error(&path, &field.kind, value, source));
                    }
                };
                if items.is_empty() {
                    return Ok(());
                }
                if let Some(&at) = scope.counts.get(&path) {
                    self.writer.backpatch_u16(at, to_u16(items.len())?)?;
                }
                if let Some(&at) = scope.offsets.get(&path) {
                    let here = to_u16(self.writer.position())?;
                    self.writer.backpatch_u16(at, here)?;
                }
                for (index, item) in items.iter().enumerate() {
                    self.write_fields(sub, item, &element(&path, index), depth)?;
                }
            }
            TypeTag::Primitive(Primitive::Count) => {
                scope.counts.insert(path, self.writer.position());
                self.writer.uint16(0)?;
            }
            TypeTag::Primitive(Primitive::Offset) => {
                scope.offsets.insert(path, self.writer.position());
                self.writer.uint16(0)?;
            }
            TypeTag::Primitive(kind) => {
                if *kind == Primitive::Bytes {
                    if let (Some(&at), Some(Value::Bytes(run))) = (scope.counts.get(&path), value) {
                        self.writer.backpatch_u16(at, to_u16(run.len())?)?;
                    }
                }
                if let Some(&at) = scope.offsets.get(&path) {
                    let here = to_u16(self.writer.position())?;
                    self.writer.backpatch_u16(at, here)?;
                }
                write_primitive(self.writer, *kind, value)
                    .map_err(|e| self.error(&path, &field.kind, value, e))?;
            }
        }
        Ok(())
    }

    fn error(
        &self,
        path: &str,
        kind: &TypeTag,
        value: Option<&Value>,
        source: ProtocolError,
    ) -> ProtocolError {
        field_error(&self.display, path, kind.name(), value, source)
    }
}

fn write_primitive(writer: &mut Writer, kind: Primitive, value: Option<&Value>) -> Result<()> {
    let Some(value) = value else {
        return match kind {
            Primitive::String => writer.string(""),
            Primitive::Bytes => Ok(()),
            other => writer.bytes(&[0u8; 8][..other.fixed_size().unwrap_or(0)]),
        };
    };

    match kind {
        Primitive::Bool => writer.bool(value.to_int::<i128>(kind)? != 0),
        Primitive::Byte => writer.byte(value.to_int(kind)?),
        Primitive::Int16 => writer.int16(value.to_int(kind)?),
        Primitive::UInt16 | Primitive::Count | Primitive::Offset => {
            writer.uint16(value.to_int(kind)?)
        }
        Primitive::Int32 => writer.int32(value.to_int(kind)?),
        Primitive::UInt32 => writer.uint32(value.to_int(kind)?),
        Primitive::Int64 => writer.int64(value.to_int(kind)?),
        Primitive::UInt64 => writer.uint64(value.to_int(kind)?),
        Primitive::Float => writer.float(value.to_float(kind)? as f32),
        Primitive::Double => writer.double(value.to_float(kind)?),
        Primitive::String => writer.string(value.to_str(kind)?),
        Primitive::Bytes => writer.bytes(value.to_bytes(kind)?),
    }
}

impl ProtocolRegistry {
    /// Serialized length of `data` for a resolved message, header excluded
    pub fn get_length(&self, fields: &[FieldSpec], data: &Event) -> Result<usize> {
        get_length(fields, data)
    }

    /// Parse one message.
    ///
    /// `reader` must be positioned at the first payload byte of a full,
    /// de-obfuscated frame (normally [`HEADER_SIZE`]).
    pub fn parse(
        &self,
        protocol_version: u32,
        identifier: Identifier<'_>,
        schema_version: SchemaVersion,
        reader: &mut Reader<'_>,
    ) -> Result<Event> {
        let resolved = self.resolve_identifier(protocol_version, identifier, schema_version)?;
        let mut parser = Parser {
            reader,
            display: resolved.display_name(),
        };
        parser.parse_fields(resolved.definition.fields(), "", 0)
    }

    /// Parse the payload of a full plaintext frame
    pub fn parse_frame(
        &self,
        protocol_version: u32,
        identifier: Identifier<'_>,
        schema_version: SchemaVersion,
        frame: &[u8],
    ) -> Result<Event> {
        let mut reader = Reader::at(frame, HEADER_SIZE);
        self.parse(protocol_version, identifier, schema_version, &mut reader)
    }

    /// Serialize one message into a complete plaintext frame, header included
    pub fn write(
        &self,
        protocol_version: u32,
        identifier: Identifier<'_>,
        schema_version: SchemaVersion,
        data: &Event,
    ) -> Result<Vec<u8>> {
        let resolved = self.resolve_identifier(protocol_version, identifier, schema_version)?;
        let display = resolved.display_name();
        let opcode = resolved
            .opcode
            .ok_or_else(|| ProtocolError::MissingOpcode(display.clone()))?;

        let fields = resolved.definition.fields();
        let measure = Measure { display: &display };
        let total = HEADER_SIZE + measure.length_at(fields, data, "", 0)?;
        if total > MAX_FRAME_SIZE {
            return Err(ProtocolError::OversizedFrame(total));
        }

        let mut writer = Writer::new(total);
        writer.uint16(total as u16)?;
        writer.uint16(opcode)?;
        writer.byte(0)?;
        writer.byte(ObfuscationType::Plain.as_byte())?;

        let mut serializer = Serializer {
            writer: &mut writer,
            display,
        };
        serializer.write_fields(fields, data, "", 0)?;
        Ok(writer.into_inner())
    }

    /// Serialize one message into a caller-supplied writer, without a header
    pub fn write_into(
        &self,
        protocol_version: u32,
        identifier: Identifier<'_>,
        schema_version: SchemaVersion,
        data: &Event,
        writer: &mut Writer,
    ) -> Result<()> {
        let resolved = self.resolve_identifier(protocol_version, identifier, schema_version)?;
        let mut serializer = Serializer {
            writer,
            display: resolved.display_name(),
        };
        serializer.write_fields(resolved.definition.fields(), data, "", 0)
    }
}
