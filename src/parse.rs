//! Record-stream parser: grammar + byte reader in, ordered records out.
//!
//! Parsing is deterministic and bounded. The loop walks records end to end
//! from the start offset until EOF, the byte limit, or the record limit. On
//! the first field or record failure the stream halts: the failed record is
//! appended with its `error` set (and no field tree), one error string is
//! recorded, and `parse_stopped_at` points at the failed record's start.
//! Recovery is not attempted.

use std::collections::HashMap;

use byteorder::ByteOrder;
use thiserror::Error;
use tracing::{debug, trace};

use crate::clock::monotonic_millis;
use crate::expr::{self, ExprError};
use crate::grammar::{
    format_discriminator, normalize_hex_literal, Dispatch, Endian, FieldDef, FieldType, Grammar,
    LengthSpec, TypeDef, ValidateRule,
};
use crate::reader::ByteRead;

/// Failure while decoding a single field or record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("short read for field `{field}`: need {need} bytes, got {got}")]
    ShortRead { field: String, need: u64, got: u64 },
    #[error("record at {offset:#x} would overrun parse boundary {stop:#x}")]
    BoundaryOverrun { offset: u64, stop: u64 },
    #[error("zero-length record")]
    ZeroLengthRecord,
    #[error("no dispatch case for discriminator {0}")]
    NoDispatch(String),
    #[error("validation failed for field `{field}`: expected {expected}, got {got}")]
    ValidationFailed {
        field: String,
        expected: String,
        got: String,
    },
    #[error("length of field `{field}`: {source}")]
    Length { field: String, source: ExprError },
    #[error("field `{field}` has no endianness")]
    NoEndian { field: String },
    #[error("unknown type `{0}`")]
    UnknownType(String),
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(u64),
    Bytes(Vec<u8>),
    /// `bytes` fields with an `encoding`, decoded with replacement.
    Text(String),
    /// Nested record: the named type's fields in declaration order.
    Record(Vec<ParsedField>),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&[ParsedField]> {
        match self {
            FieldValue::Record(fields) => Some(fields),
            _ => None,
        }
    }
}

/// One parsed field with its location and raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedField {
    pub name: String,
    pub value: FieldValue,
    pub offset: u64,
    pub size: u64,
    /// Raw bytes as read. Empty for nested records.
    pub raw_bytes: Vec<u8>,
    /// Color propagated from the field definition.
    pub color: Option<String>,
}

impl ParsedField {
    pub fn is_leaf(&self) -> bool {
        !matches!(self.value, FieldValue::Record(_))
    }
}

/// One parsed record. Records with `error` set carry no field tree and are
/// excluded from span and coverage generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub offset: u64,
    pub size: u64,
    pub type_name: String,
    pub fields: Vec<ParsedField>,
    /// Discriminator literal at the field's byte width, e.g. `0x0065`.
    pub type_discriminator: Option<String>,
    pub error: Option<String>,
}

impl ParsedRecord {
    /// First field with the given name. First-wins matches the length
    /// reference scope rule.
    pub fn field(&self, name: &str) -> Option<&ParsedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Immutable result of a parse run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    /// Records in byte order. The last one may carry an error.
    pub records: Vec<ParsedRecord>,
    pub errors: Vec<String>,
    pub file_path: String,
    pub grammar_format: String,
    pub total_bytes_parsed: u64,
    /// Offset where parsing halted: after the last clean record, or at the
    /// start of the failed one.
    pub parse_stopped_at: u64,
    pub timestamp_ms: u64,
    /// Number of error-free records.
    pub record_count: usize,
}

impl ParseResult {
    /// Records without errors, in byte order.
    pub fn clean_records(&self) -> impl Iterator<Item = &ParsedRecord> {
        self.records.iter().filter(|r| r.error.is_none())
    }
}

/// Bounds for a parse run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub offset: u64,
    pub byte_limit: Option<u64>,
    pub record_limit: Option<usize>,
}

/// Parse a byte stream with a validated grammar. Pure: identical inputs give
/// identical results modulo the timestamp.
pub fn parse_binary(
    grammar: &Grammar,
    reader: &dyn ByteRead,
    file_path: &str,
    opts: &ParseOptions,
) -> ParseResult {
    RecordParser::new(grammar).parse(reader, file_path, opts)
}

/// Parser for record streams described by a [`Grammar`].
pub struct RecordParser<'g> {
    grammar: &'g Grammar,
}

/// Tentatively parsed discriminator preamble, reused by the target type so
/// the same bytes are not read twice.
struct Preamble {
    type_name: String,
    fields: Vec<ParsedField>,
    end: u64,
}

/// Field values visible to length references and validations. Bindings are
/// first-wins: re-binding an existing name is a no-op.
#[derive(Default)]
struct Scope {
    values: HashMap<String, i64>,
}

impl Scope {
    fn bind(&mut self, name: &str, value: u64) {
        self.values
            .entry(name.to_string())
            .or_insert(value as i64);
    }

    fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }
}

impl<'g> RecordParser<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        RecordParser { grammar }
    }

    pub fn parse(
        &self,
        reader: &dyn ByteRead,
        file_path: &str,
        opts: &ParseOptions,
    ) -> ParseResult {
        let file_size = reader.size();
        let stop = match opts.byte_limit {
            Some(limit) => opts.offset.saturating_add(limit).min(file_size),
            None => file_size,
        };

        let mut records: Vec<ParsedRecord> = Vec::new();
        let mut errors = Vec::new();
        let mut offset = opts.offset;
        let mut clean_count = 0usize;

        while offset < stop {
            if let Some(limit) = opts.record_limit {
                if clean_count >= limit {
                    break;
                }
            }
            let record = self.parse_record(reader, offset, stop);
            match &record.error {
                None => {
                    trace!(
                        offset,
                        size = record.size,
                        type_name = %record.type_name,
                        "parsed record"
                    );
                    offset = record.end();
                    clean_count += 1;
                    records.push(record);
                }
                Some(message) => {
                    debug!(offset, error = %message, "record parse failed; halting stream");
                    errors.push(format!("parse error at {offset:#x}: {message}"));
                    records.push(record);
                    break;
                }
            }
        }

        ParseResult {
            total_bytes_parsed: offset - opts.offset,
            parse_stopped_at: offset,
            records,
            errors,
            file_path: file_path.to_string(),
            grammar_format: self.grammar.format.as_str().to_string(),
            timestamp_ms: monotonic_millis(),
            record_count: clean_count,
        }
    }

    /// Parse one record at `record_start`. Failures are captured on the
    /// returned record, never propagated.
    pub fn parse_record(&self, reader: &dyn ByteRead, record_start: u64, stop: u64) -> ParsedRecord {
        let (type_name, discriminator, preamble) = match self.dispatch(reader, record_start) {
            Ok(dispatched) => dispatched,
            Err(e) => {
                return failed_record(record_start, "unknown".to_string(), None, e);
            }
        };

        let type_def = match self.grammar.type_def(&type_name) {
            Some(type_def) => type_def,
            None => {
                return failed_record(
                    record_start,
                    type_name.clone(),
                    discriminator,
                    FieldError::UnknownType(type_name),
                );
            }
        };

        let mut scope = Scope::default();
        match self.parse_type(reader, record_start, type_def, preamble.as_ref(), &mut scope) {
            Ok((fields, end)) => {
                let size = end - record_start;
                if size == 0 {
                    return failed_record(
                        record_start,
                        type_name,
                        discriminator,
                        FieldError::ZeroLengthRecord,
                    );
                }
                if end > stop {
                    return failed_record(
                        record_start,
                        type_name,
                        discriminator,
                        FieldError::BoundaryOverrun {
                            offset: record_start,
                            stop,
                        },
                    );
                }
                ParsedRecord {
                    offset: record_start,
                    size,
                    type_name,
                    fields,
                    type_discriminator: discriminator,
                    error: None,
                }
            }
            Err(e) => failed_record(record_start, type_name, discriminator, e),
        }
    }

    /// Select the target type for the record at `record_start`. For switch
    /// dispatch this tentatively parses the discriminator preamble.
    fn dispatch(
        &self,
        reader: &dyn ByteRead,
        record_start: u64,
    ) -> Result<(String, Option<String>, Option<Preamble>), FieldError> {
        let (expr, cases, default) = match &self.grammar.dispatch {
            Dispatch::UseType(name) => return Ok((name.clone(), None, None)),
            Dispatch::Switch {
                expr,
                cases,
                default,
            } => (expr, cases, default),
        };

        let (container, field_name) = expr
            .split_once('.')
            .ok_or_else(|| FieldError::NoDispatch(expr.clone()))?;
        let container_def = self
            .grammar
            .type_def(container)
            .ok_or_else(|| FieldError::UnknownType(container.to_string()))?;

        let mut scope = Scope::default();
        let (fields, end) = self.parse_type(reader, record_start, container_def, None, &mut scope)?;
        let disc_field = fields
            .iter()
            .find(|f| f.name == field_name)
            .ok_or_else(|| FieldError::NoDispatch(expr.clone()))?;
        let value = disc_field
            .value
            .as_int()
            .ok_or_else(|| FieldError::NoDispatch(expr.clone()))?;

        let discriminator = format_discriminator(value, disc_field.size);
        let canonical = normalize_hex_literal(&discriminator)
            .map_err(|_| FieldError::NoDispatch(discriminator.clone()))?;
        let target = match cases.get(&canonical) {
            Some(target) => target.clone(),
            None => match default {
                Some(default) => default.clone(),
                None => return Err(FieldError::NoDispatch(discriminator)),
            },
        };

        Ok((
            target,
            Some(discriminator),
            Some(Preamble {
                type_name: container.to_string(),
                fields,
                end,
            }),
        ))
    }

    /// Parse all fields of a type starting at `offset`. When the first field
    /// is the already-parsed discriminator preamble at the same offset, its
    /// fields are reused instead of re-reading the bytes.
    fn parse_type(
        &self,
        reader: &dyn ByteRead,
        offset: u64,
        type_def: &TypeDef,
        preamble: Option<&Preamble>,
        scope: &mut Scope,
    ) -> Result<(Vec<ParsedField>, u64), FieldError> {
        let mut fields = Vec::with_capacity(type_def.fields.len());
        let mut cursor = offset;

        for (index, field_def) in type_def.fields.iter().enumerate() {
            let reused = match (index, preamble, &field_def.ty) {
                (0, Some(pre), FieldType::Named(name)) if *name == pre.type_name => {
                    let nested = ParsedField {
                        name: field_def.name.clone(),
                        value: FieldValue::Record(pre.fields.clone()),
                        offset,
                        size: pre.end - offset,
                        raw_bytes: Vec::new(),
                        color: field_def.color.clone(),
                    };
                    Some(nested)
                }
                _ => None,
            };
            let parsed = match reused {
                Some(parsed) => parsed,
                None => self.parse_field(reader, cursor, field_def, scope)?,
            };

            match &parsed.value {
                FieldValue::Int(v) => scope.bind(&parsed.name, *v),
                FieldValue::Record(nested) => bind_leaves(nested, scope),
                _ => {}
            }
            cursor += parsed.size;
            fields.push(parsed);
        }

        Ok((fields, cursor))
    }

    fn parse_field(
        &self,
        reader: &dyn ByteRead,
        offset: u64,
        field_def: &FieldDef,
        scope: &mut Scope,
    ) -> Result<ParsedField, FieldError> {
        match &field_def.ty {
            FieldType::U8 => {
                let data = self.read_exact(reader, offset, 1, &field_def.name)?;
                let value = data[0] as u64;
                self.check_validation(field_def, FieldValue::Int(value), &data, scope)?;
                Ok(ParsedField {
                    name: field_def.name.clone(),
                    value: FieldValue::Int(value),
                    offset,
                    size: 1,
                    raw_bytes: data,
                    color: field_def.color.clone(),
                })
            }
            FieldType::U16 | FieldType::U32 => {
                let size = if field_def.ty == FieldType::U16 { 2 } else { 4 };
                let data = self.read_exact(reader, offset, size, &field_def.name)?;
                let endian = field_def
                    .effective_endian(self.grammar)
                    .ok_or_else(|| FieldError::NoEndian {
                        field: field_def.name.clone(),
                    })?;
                let value = decode_uint(&data, endian);
                self.check_validation(field_def, FieldValue::Int(value), &data, scope)?;
                Ok(ParsedField {
                    name: field_def.name.clone(),
                    value: FieldValue::Int(value),
                    offset,
                    size,
                    raw_bytes: data,
                    color: field_def.color.clone(),
                })
            }
            FieldType::Bytes => {
                let length = self.resolve_length(field_def, scope)?;
                let data = self.read_exact(reader, offset, length, &field_def.name)?;
                let value = match field_def.encoding.as_deref().and_then(|enc| decode_text(&data, enc))
                {
                    Some(text) => FieldValue::Text(text),
                    None => FieldValue::Bytes(data.clone()),
                };
                self.check_validation(field_def, value.clone(), &data, scope)?;
                Ok(ParsedField {
                    name: field_def.name.clone(),
                    value,
                    offset,
                    size: length,
                    raw_bytes: data,
                    color: field_def.color.clone(),
                })
            }
            FieldType::Named(type_name) => {
                let nested_def = self
                    .grammar
                    .type_def(type_name)
                    .ok_or_else(|| FieldError::UnknownType(type_name.clone()))?;
                let mut nested_scope = Scope::default();
                let (nested_fields, end) =
                    self.parse_type(reader, offset, nested_def, None, &mut nested_scope)?;
                Ok(ParsedField {
                    name: field_def.name.clone(),
                    value: FieldValue::Record(nested_fields),
                    offset,
                    size: end - offset,
                    raw_bytes: Vec::new(),
                    color: field_def.color.clone(),
                })
            }
        }
    }

    fn read_exact(
        &self,
        reader: &dyn ByteRead,
        offset: u64,
        length: u64,
        field: &str,
    ) -> Result<Vec<u8>, FieldError> {
        let want = usize::try_from(length).map_err(|_| FieldError::ShortRead {
            field: field.to_string(),
            need: length,
            got: 0,
        })?;
        let data = reader.read(offset, want);
        if (data.len() as u64) < length {
            return Err(FieldError::ShortRead {
                field: field.to_string(),
                need: length,
                got: data.len() as u64,
            });
        }
        Ok(data.to_vec())
    }

    fn resolve_length(&self, field_def: &FieldDef, scope: &Scope) -> Result<u64, FieldError> {
        let length = match &field_def.length {
            LengthSpec::Static(n) => *n as i64,
            LengthSpec::Field(target) => scope.get(target).ok_or_else(|| FieldError::Length {
                field: field_def.name.clone(),
                source: ExprError::UnknownIdentifier(target.clone()),
            })?,
            LengthSpec::Expr(src) => {
                expr::evaluate(src, &scope.values).map_err(|e| FieldError::Length {
                    field: field_def.name.clone(),
                    source: e,
                })?
            }
            LengthSpec::None => {
                return Err(FieldError::Length {
                    field: field_def.name.clone(),
                    source: ExprError::ParseFailure("bytes field has no length".into()),
                })
            }
        };
        if length < 0 {
            return Err(FieldError::Length {
                field: field_def.name.clone(),
                source: ExprError::InvalidResult(length),
            });
        }
        Ok(length as u64)
    }

    fn check_validation(
        &self,
        field_def: &FieldDef,
        value: FieldValue,
        raw: &[u8],
        scope: &Scope,
    ) -> Result<(), FieldError> {
        let rule = match &field_def.validate {
            Some(rule) => rule,
            None => return Ok(()),
        };
        let fail = |expected: String, got: String| FieldError::ValidationFailed {
            field: field_def.name.clone(),
            expected,
            got,
        };
        match rule {
            ValidateRule::Equals(literal) => match value.as_int() {
                Some(v) if v as i64 == *literal => Ok(()),
                Some(v) => Err(fail(literal.to_string(), v.to_string())),
                None => Err(fail(literal.to_string(), "non-integer value".to_string())),
            },
            ValidateRule::EqualsField(target) => {
                let expected = scope.get(target).ok_or_else(|| {
                    fail(format!("value of `{target}`"), "unbound field".to_string())
                })?;
                match value.as_int() {
                    Some(v) if v as i64 == expected => Ok(()),
                    Some(v) => Err(fail(expected.to_string(), v.to_string())),
                    None => Err(fail(expected.to_string(), "non-integer value".to_string())),
                }
            }
            ValidateRule::AllBytes(byte) => {
                if raw.iter().all(|b| b == byte) {
                    Ok(())
                } else {
                    Err(fail(
                        format!("all bytes {byte:#04x}"),
                        "mixed bytes".to_string(),
                    ))
                }
            }
        }
    }
}

/// Bind every integer leaf of a nested field tree into the enclosing scope by
/// its unqualified name, first binding wins.
fn bind_leaves(fields: &[ParsedField], scope: &mut Scope) {
    for field in fields {
        match &field.value {
            FieldValue::Int(v) => scope.bind(&field.name, *v),
            FieldValue::Record(nested) => bind_leaves(nested, scope),
            _ => {}
        }
    }
}

fn decode_uint(data: &[u8], endian: Endian) -> u64 {
    match (data.len(), endian) {
        (2, Endian::Little) => byteorder::LittleEndian::read_u16(data) as u64,
        (2, Endian::Big) => byteorder::BigEndian::read_u16(data) as u64,
        (4, Endian::Little) => byteorder::LittleEndian::read_u32(data) as u64,
        (4, Endian::Big) => byteorder::BigEndian::read_u32(data) as u64,
        (1, _) => data.first().copied().unwrap_or(0) as u64,
        _ => 0,
    }
}

/// Decode bytes as text with replacement for invalid sequences. Returns
/// `None` for encodings this core does not know; the field then keeps its
/// raw bytes value.
pub(crate) fn decode_text(data: &[u8], encoding: &str) -> Option<String> {
    match encoding.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" | "us-ascii" => {
            Some(String::from_utf8_lossy(data).into_owned())
        }
        "latin-1" | "latin1" | "iso-8859-1" => {
            Some(data.iter().map(|&b| b as char).collect())
        }
        _ => None,
    }
}

fn failed_record(
    offset: u64,
    type_name: String,
    type_discriminator: Option<String>,
    error: FieldError,
) -> ParsedRecord {
    ParsedRecord {
        offset,
        size: 0,
        type_name,
        fields: Vec::new(),
        type_discriminator,
        error: Some(error.to_string()),
    }
}
