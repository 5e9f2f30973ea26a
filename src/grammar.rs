//! Grammar model for record-stream formats.
//!
//! A [`Grammar`] is the validated, immutable AST produced by
//! [`crate::lint::lint_grammar`]. It is never constructed from raw text
//! directly; the linter owns the document-to-AST translation and enforces the
//! invariants the parser relies on (known type references, resolvable length
//! references, determinable endianness).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Byte order for multi-byte integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

/// Top-level container format. Only sequential record streams are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    RecordStream,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::RecordStream => "record_stream",
        }
    }
}

/// Outer framing of the stream. Extension point; only `until_eof` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    UntilEof,
}

/// How the parser selects a [`TypeDef`] for each record.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Every record parses as the named type.
    UseType(String),
    /// A discriminator preamble selects the type per record.
    Switch {
        /// Dotted path `TypeName.field_name` naming the discriminator field.
        expr: String,
        /// Normalized hex literal to target type name, in declaration order.
        cases: IndexMap<String, String>,
        /// Fallback when no case matches. Absent means unmatched
        /// discriminators fail the record.
        default: Option<String>,
    },
}

/// Field type: a primitive or a reference to another [`TypeDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    U32,
    Bytes,
    Named(String),
}

impl FieldType {
    pub fn from_name(name: &str) -> FieldType {
        match name {
            "u8" => FieldType::U8,
            "u16" => FieldType::U16,
            "u32" => FieldType::U32,
            "bytes" => FieldType::Bytes,
            other => FieldType::Named(other.to_string()),
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Named(_))
    }

    /// Fixed size of integer primitives. `bytes` and named types are dynamic.
    pub fn primitive_size(&self) -> Option<u64> {
        match self {
            FieldType::U8 => Some(1),
            FieldType::U16 => Some(2),
            FieldType::U32 => Some(4),
            _ => None,
        }
    }
}

/// Length resolution for `bytes` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LengthSpec {
    /// Integer primitives carry their own size.
    None,
    Static(u64),
    /// Reference to a previously parsed field at the record scope.
    Field(String),
    /// Arithmetic expression over previously parsed field values.
    Expr(String),
}

/// Per-field validation applied during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateRule {
    Equals(i64),
    EqualsField(String),
    AllBytes(u8),
}

/// One field of a record type, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    /// Endian override; falls back to [`Grammar::endian_default`].
    pub endian: Option<Endian>,
    pub length: LengthSpec,
    /// Text encoding for `bytes` fields; decoded with replacement.
    pub encoding: Option<String>,
    pub validate: Option<ValidateRule>,
    /// Normalized color (`#rrggbb`), propagated onto parsed fields.
    pub color: Option<String>,
}

impl FieldDef {
    /// Field-effective endianness: the override wins, then the grammar
    /// default. `None` only for grammars built outside the linter.
    pub fn effective_endian(&self, grammar: &Grammar) -> Option<Endian> {
        self.endian.or(grammar.endian_default)
    }
}

/// A named record type: ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl TypeDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// How a registry entry renders its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderKind {
    String { encoding: Option<String> },
    U16 { endian: Option<Endian> },
    U32 { endian: Option<Endian> },
    Hex,
    PackedDateV1,
}

impl DecoderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderKind::String { .. } => "string",
            DecoderKind::U16 { .. } => "u16",
            DecoderKind::U32 { .. } => "u32",
            DecoderKind::Hex => "hex",
            DecoderKind::PackedDateV1 => "packed_date_v1",
        }
    }
}

/// Semantic annotation attached to a discriminator literal.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    /// Human label; defaults to the discriminator literal.
    pub label: String,
    pub decoder: DecoderKind,
    /// Explicit target field; otherwise the decoder picks one by shape.
    pub field: Option<String>,
}

/// Complete validated grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct Grammar {
    pub format: Format,
    pub endian_default: Option<Endian>,
    pub framing: Framing,
    pub types: IndexMap<String, TypeDef>,
    pub dispatch: Dispatch,
    /// Normalized discriminator literal to entry, in declaration order.
    pub registry: IndexMap<String, RegistryEntry>,
}

impl Grammar {
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }
}

/// Named colors accepted by field definitions, with their hex values.
const NAMED_COLORS: &[(&str, &str)] = &[
    ("black", "#000000"),
    ("white", "#ffffff"),
    ("gray", "#808080"),
    ("grey", "#808080"),
    ("red", "#ff0000"),
    ("green", "#008000"),
    ("blue", "#0000ff"),
    ("yellow", "#ffff00"),
    ("cyan", "#00ffff"),
    ("magenta", "#ff00ff"),
    ("purple", "#800080"),
    ("orange", "#ffa500"),
    ("pink", "#ffc0cb"),
    ("brown", "#a52a2a"),
];

/// Normalize a color to lowercase `#rrggbb`.
///
/// Accepts a named color, `#rgb`, or `#rrggbb`. Normalization is idempotent.
pub fn normalize_color(color: &str) -> Result<String, String> {
    let trimmed = color.trim();
    let lower = trimmed.to_ascii_lowercase();

    if let Some((_, hex)) = NAMED_COLORS.iter().find(|(name, _)| *name == lower) {
        return Ok((*hex).to_string());
    }

    if let Some(hex) = lower.strip_prefix('#') {
        if hex.len() == 3 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            let mut out = String::with_capacity(7);
            out.push('#');
            for c in hex.chars() {
                out.push(c);
                out.push(c);
            }
            return Ok(out);
        }
        if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(lower);
        }
    }

    Err(format!(
        "invalid color `{trimmed}`: use a named color or hex #rgb/#rrggbb"
    ))
}

/// Normalize a discriminator literal to its canonical form: `0x` followed by
/// uppercase hex, zero-padded to the smallest even digit count that fits the
/// value. All case and registry lookups normalize both sides through this
/// function, so `0x65` and `0x0065` address the same entry. Idempotent.
pub fn normalize_hex_literal(literal: &str) -> Result<String, String> {
    let trimmed = literal.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| format!("discriminator `{trimmed}` must be a 0x-prefixed hex literal"))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("discriminator `{trimmed}` is not valid hex"));
    }
    let value = u64::from_str_radix(digits, 16)
        .map_err(|_| format!("discriminator `{trimmed}` does not fit in 64 bits"))?;
    Ok(format_hex_literal(value))
}

fn format_hex_literal(value: u64) -> String {
    let hex = format!("{value:X}");
    let width = if hex.len() % 2 == 0 { hex.len() } else { hex.len() + 1 };
    format!("0x{hex:0>width$}")
}

/// Format a discriminator value at a field's byte width, e.g. a `u16` value
/// of `0x65` becomes `0x0065`. This is the form stored on parsed records;
/// lookups re-normalize it to the canonical width.
pub fn format_discriminator(value: u64, byte_size: u64) -> String {
    let width = (byte_size.max(1) as usize) * 2;
    format!("0x{value:0width$X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_normalization() {
        assert_eq!(normalize_color("red"), Ok("#ff0000".to_string()));
        assert_eq!(normalize_color("RED"), Ok("#ff0000".to_string()));
        assert_eq!(normalize_color("#AbC"), Ok("#aabbcc".to_string()));
        assert_eq!(normalize_color("#A1B2C3"), Ok("#a1b2c3".to_string()));
        assert!(normalize_color("#12345").is_err());
        assert!(normalize_color("chartreuse-ish").is_err());
    }

    #[test]
    fn color_normalization_is_idempotent() {
        for input in ["red", "#abc", "#a1b2c3", "GREY"] {
            let once = normalize_color(input).expect("valid color");
            assert_eq!(normalize_color(&once), Ok(once.clone()));
        }
    }

    #[test]
    fn hex_literal_canonical_width() {
        assert_eq!(normalize_hex_literal("0x65"), Ok("0x65".to_string()));
        assert_eq!(normalize_hex_literal("0x0065"), Ok("0x65".to_string()));
        assert_eq!(normalize_hex_literal("0x4e54"), Ok("0x4E54".to_string()));
        assert_eq!(normalize_hex_literal("0xFFF"), Ok("0x0FFF".to_string()));
        assert!(normalize_hex_literal("4e54").is_err());
        assert!(normalize_hex_literal("0xZZ").is_err());
    }

    #[test]
    fn hex_literal_normalization_is_idempotent() {
        for input in ["0x65", "0x0065", "0xABCDEF", "0x1"] {
            let once = normalize_hex_literal(input).expect("valid literal");
            assert_eq!(normalize_hex_literal(&once), Ok(once.clone()));
        }
    }

    #[test]
    fn discriminator_field_width() {
        assert_eq!(format_discriminator(0x65, 2), "0x0065");
        assert_eq!(format_discriminator(0x65, 1), "0x65");
        assert_eq!(format_discriminator(0x4E54, 2), "0x4E54");
    }
}
