//! Registry-driven field decoding: render a record's payload as text.
//!
//! The decoder never fails hard; every outcome is a [`DecodedValue`] with a
//! success flag and an enumerated reason on failure.

use byteorder::ByteOrder;

use crate::grammar::{normalize_hex_literal, DecoderKind, Dispatch, Endian, Grammar};
use crate::parse::{decode_text, FieldValue, ParsedField, ParsedRecord};

/// Result of decoding one field. Always returned, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    pub success: bool,
    pub value: Option<String>,
    /// Decoder that ran (or would have run): `string`, `u16`, `u32`, `hex`,
    /// `packed_date_v1`, or `none`.
    pub decoder_type: String,
    pub field_path: String,
    pub error: Option<String>,
}

impl DecodedValue {
    fn ok(value: String, decoder_type: &str, field_path: &str) -> DecodedValue {
        DecodedValue {
            success: true,
            value: Some(value),
            decoder_type: decoder_type.to_string(),
            field_path: field_path.to_string(),
            error: None,
        }
    }

    fn fail(decoder_type: &str, field_path: &str, error: String) -> DecodedValue {
        DecodedValue {
            success: false,
            value: None,
            decoder_type: decoder_type.to_string(),
            field_path: field_path.to_string(),
            error: Some(error),
        }
    }
}

/// Decode a field of `record`.
///
/// With `field_name` the named field is rendered directly from its parsed
/// value. Without it the record's discriminator selects a registry entry,
/// which names the decoder and the target field.
pub fn decode_field(
    record: &ParsedRecord,
    grammar: &Grammar,
    field_name: Option<&str>,
) -> DecodedValue {
    if let Some(name) = field_name {
        return decode_named_field(record, name);
    }

    let discriminator = match discriminator_of(record, grammar) {
        Some(discriminator) => discriminator,
        None => {
            return DecodedValue::fail(
                "none",
                "",
                "record carries no type discriminator".to_string(),
            )
        }
    };
    let canonical = match normalize_hex_literal(&discriminator) {
        Ok(canonical) => canonical,
        Err(e) => return DecodedValue::fail("none", "", e),
    };
    let entry = match grammar.registry.get(&canonical) {
        Some(entry) => entry,
        None => {
            return DecodedValue::fail(
                "none",
                "",
                format!("no registry entry for discriminator {canonical}"),
            )
        }
    };

    let target = match select_target(record, entry.field.as_deref(), &entry.decoder) {
        Some(target) => target,
        None => {
            return DecodedValue::fail(
                entry.decoder.as_str(),
                entry.field.as_deref().unwrap_or(""),
                "no field in record matches the registry entry".to_string(),
            )
        }
    };

    apply_decoder(&entry.decoder, target, grammar)
}

/// Direct rendering of a named field, bypassing the registry.
fn decode_named_field(record: &ParsedRecord, name: &str) -> DecodedValue {
    let field = match record.field(name) {
        Some(field) => field,
        None => {
            return DecodedValue::fail("none", name, format!("field `{name}` not found in record"))
        }
    };
    match &field.value {
        FieldValue::Text(text) => DecodedValue::ok(text.clone(), "string", name),
        FieldValue::Bytes(bytes) => {
            DecodedValue::ok(String::from_utf8_lossy(bytes).into_owned(), "string", name)
        }
        FieldValue::Int(v) => DecodedValue::ok(v.to_string(), "u32", name),
        FieldValue::Record(_) => DecodedValue::fail(
            "none",
            name,
            format!("field `{name}` is a nested record"),
        ),
    }
}

/// Extract the discriminator literal for this record, formatted the way the
/// registry keys are.
fn discriminator_of(record: &ParsedRecord, grammar: &Grammar) -> Option<String> {
    if let Some(discriminator) = &record.type_discriminator {
        return Some(discriminator.clone());
    }
    // Re-derive from the dispatch expression when the record predates the
    // switch (e.g. synthesized records).
    let expr = match &grammar.dispatch {
        Dispatch::Switch { expr, .. } => expr,
        Dispatch::UseType(_) => return None,
    };
    let (_, field_name) = expr.split_once('.')?;
    for field in &record.fields {
        if let FieldValue::Record(nested) = &field.value {
            if let Some(leaf) = nested.iter().find(|f| f.name == field_name) {
                let value = leaf.value.as_int()?;
                return Some(crate::grammar::format_discriminator(value, leaf.size));
            }
        }
    }
    None
}

/// Pick the field to decode: the entry's explicit choice, else the first
/// field whose shape fits the decoder.
fn select_target<'r>(
    record: &'r ParsedRecord,
    explicit: Option<&str>,
    decoder: &DecoderKind,
) -> Option<&'r ParsedField> {
    if let Some(name) = explicit {
        return record.field(name);
    }
    match decoder {
        DecoderKind::String { .. } | DecoderKind::Hex | DecoderKind::PackedDateV1 => record
            .fields
            .iter()
            .find(|f| matches!(f.value, FieldValue::Bytes(_) | FieldValue::Text(_))),
        DecoderKind::U16 { .. } => record
            .fields
            .iter()
            .find(|f| matches!(f.value, FieldValue::Int(_)) && f.size == 2),
        DecoderKind::U32 { .. } => record
            .fields
            .iter()
            .find(|f| matches!(f.value, FieldValue::Int(_)) && f.size == 4),
    }
}

fn apply_decoder(decoder: &DecoderKind, field: &ParsedField, grammar: &Grammar) -> DecodedValue {
    let path = field.name.as_str();
    match decoder {
        DecoderKind::String { encoding } => {
            if let FieldValue::Text(text) = &field.value {
                return DecodedValue::ok(text.clone(), "string", path);
            }
            let encoding = encoding.as_deref().unwrap_or("ascii");
            match decode_text(&field.raw_bytes, encoding) {
                Some(text) => DecodedValue::ok(text, "string", path),
                None => DecodedValue::fail(
                    "string",
                    path,
                    format!("unsupported encoding `{encoding}`"),
                ),
            }
        }
        DecoderKind::U16 { endian } => decode_int(field, 2, "u16", *endian, grammar),
        DecoderKind::U32 { endian } => decode_int(field, 4, "u32", *endian, grammar),
        DecoderKind::Hex => {
            let hex: String = field
                .raw_bytes
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            DecodedValue::ok(hex, "hex", path)
        }
        DecoderKind::PackedDateV1 => decode_packed_date(field),
    }
}

fn decode_int(
    field: &ParsedField,
    size: usize,
    kind: &str,
    endian: Option<Endian>,
    grammar: &Grammar,
) -> DecodedValue {
    let path = field.name.as_str();
    if let FieldValue::Int(v) = &field.value {
        return DecodedValue::ok(v.to_string(), kind, path);
    }
    let raw = &field.raw_bytes;
    if raw.len() < size {
        return DecodedValue::fail(
            kind,
            path,
            format!("insufficient bytes for {kind}: need {size}, got {}", raw.len()),
        );
    }
    let endian = match endian.or(grammar.endian_default) {
        Some(endian) => endian,
        None => return DecodedValue::fail(kind, path, "no endianness for decoder".to_string()),
    };
    let value: u64 = match (size, endian) {
        (2, Endian::Little) => byteorder::LittleEndian::read_u16(&raw[..2]) as u64,
        (2, Endian::Big) => byteorder::BigEndian::read_u16(&raw[..2]) as u64,
        (4, Endian::Little) => byteorder::LittleEndian::read_u32(&raw[..4]) as u64,
        (4, Endian::Big) => byteorder::BigEndian::read_u32(&raw[..4]) as u64,
        _ => 0,
    };
    DecodedValue::ok(value.to_string(), kind, path)
}

/// Four-byte packed date: `[day<<3 | flags, month<<1 | reserved, year_lo,
/// year_hi]`. The reserved bit must be clear and the fields in range.
fn decode_packed_date(field: &ParsedField) -> DecodedValue {
    let path = field.name.as_str();
    let raw = &field.raw_bytes;
    if raw.len() < 4 {
        return DecodedValue::fail(
            "packed_date_v1",
            path,
            format!("insufficient bytes for packed date: need 4, got {}", raw.len()),
        );
    }
    let (b0, b1, year_lo, year_hi) = (raw[0], raw[1], raw[2], raw[3]);
    let day = (b0 >> 3) as u32;
    let month = (b1 >> 1) as u32;
    let year = year_lo as u32 | ((year_hi as u32) << 8);
    if b1 & 0x01 != 0 || !(1..=12).contains(&month) || !(1..=31).contains(&day) || year == 0 {
        return DecodedValue::fail(
            "packed_date_v1",
            path,
            "invalid packed date encoding".to_string(),
        );
    }
    DecodedValue::ok(format!("{year:04}-{month:02}-{day:02}"), "packed_date_v1", path)
}
