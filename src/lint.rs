//! Grammar validation: raw YAML document in, validated AST out.
//!
//! [`lint_grammar`] parses the text form, runs the structural and referential
//! checks in order, and returns `(grammar?, errors, warnings)`. A grammar is
//! valid iff `errors` is empty; the AST is only materialized for valid input.
//! Checks short-circuit stage by stage: referential checks do not run on a
//! document that failed structural ones.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::expr::{Expr, ExprError};
use crate::grammar::{
    normalize_color, normalize_hex_literal, DecoderKind, Dispatch, Endian, FieldDef, FieldType,
    Format, Framing, Grammar, LengthSpec, RegistryEntry, TypeDef, ValidateRule,
};

/// Fatal grammar fault. Any of these prevents AST materialization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LintError {
    #[error("yaml: {0}")]
    Yaml(String),
    #[error("unsupported format: {0}")]
    InvalidFormat(String),
    #[error("invalid endian `{0}`: expected `little` or `big`")]
    InvalidEndian(String),
    #[error("invalid framing: {0}")]
    InvalidFraming(String),
    #[error("grammar defines no types")]
    NoTypes,
    #[error("type `{0}` has no fields")]
    EmptyType(String),
    #[error("type `{type_name}`: field {index} has no name")]
    UnnamedField { type_name: String, index: usize },
    #[error("type `{type_name}`: field `{field}` has no type")]
    MissingFieldType { type_name: String, field: String },
    #[error("type `{type_name}`: field `{field}` references unknown type `{referenced}`")]
    UnknownType {
        type_name: String,
        field: String,
        referenced: String,
    },
    #[error("type `{0}` is recursively nested")]
    RecursiveType(String),
    #[error("type `{type_name}`: field `{field}`: {detail}")]
    InvalidLength {
        type_name: String,
        field: String,
        detail: String,
    },
    #[error("type `{type_name}`: field `{field}`: length references `{target}` which is not a previously parsed integer field")]
    UnresolvedLengthRef {
        type_name: String,
        field: String,
        target: String,
    },
    #[error("type `{type_name}`: field `{field}`: {source}")]
    InvalidExpr {
        type_name: String,
        field: String,
        source: ExprError,
    },
    #[error("type `{type_name}`: field `{field}` has no endianness (set `endian` on the field or a grammar default)")]
    MissingEndian { type_name: String, field: String },
    #[error("type `{type_name}`: field `{field}`: {detail}")]
    InvalidColor {
        type_name: String,
        field: String,
        detail: String,
    },
    #[error("type `{type_name}`: field `{field}`: {detail}")]
    InvalidValidate {
        type_name: String,
        field: String,
        detail: String,
    },
    #[error("record dispatch: {0}")]
    InvalidDispatch(String),
    #[error("{0}")]
    InvalidDiscriminator(String),
    #[error("discriminator `{0}` appears more than once after normalization")]
    DuplicateDiscriminator(String),
    #[error("registry `{key}`: unknown decoder kind `{kind}`")]
    UnknownDecoder { key: String, kind: String },
}

/// Non-fatal grammar quality finding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LintWarning {
    #[error("type `{0}` is not reachable from record dispatch")]
    UnusedType(String),
    #[error("record switch has no cases; every record will use the default type")]
    EmptyDispatchCases,
    #[error("registry key `{0}` matches no dispatch case")]
    OrphanRegistryKey(String),
    #[error("type `{type_name}`: `{name}` is bound more than once; length references resolve to the first binding")]
    ShadowedLengthRef { type_name: String, name: String },
}

/// Result of a lint pass. Content-immutable once returned.
#[derive(Debug, Clone)]
pub struct LintOutcome {
    pub grammar: Option<Grammar>,
    pub errors: Vec<LintError>,
    pub warnings: Vec<LintWarning>,
}

impl LintOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_strings(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    pub fn warning_strings(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }

    fn failed(errors: Vec<LintError>) -> LintOutcome {
        LintOutcome {
            grammar: None,
            errors,
            warnings: Vec::new(),
        }
    }
}

// Raw document shapes, straight out of serde_yaml. The sugar the text form
// allows (a `length` that is an int, a field name, or an expression) lives
// here and is resolved into [`LengthSpec`] during validation.

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    format: Option<String>,
    endian: Option<String>,
    framing: Option<RawFraming>,
    #[serde(default)]
    types: IndexMap<String, RawTypeDef>,
    record: Option<RawRecord>,
    #[serde(default)]
    registry: IndexMap<String, RawRegistryEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFraming {
    repeat: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTypeDef {
    #[serde(default)]
    fields: Vec<RawFieldDef>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFieldDef {
    name: Option<String>,
    #[serde(rename = "type")]
    ty: Option<String>,
    endian: Option<String>,
    length: Option<RawLength>,
    length_field: Option<String>,
    length_expr: Option<String>,
    encoding: Option<String>,
    validate: Option<RawValidate>,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLength {
    Int(i64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawValidate {
    equals: Option<i64>,
    equals_field: Option<String>,
    all_bytes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRecord {
    #[serde(rename = "use")]
    use_type: Option<String>,
    switch: Option<RawSwitch>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSwitch {
    expr: Option<String>,
    #[serde(default)]
    cases: IndexMap<String, String>,
    default: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRegistryEntry {
    name: Option<String>,
    decode: Option<RawDecode>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct RawDecode {
    #[serde(rename = "as")]
    as_type: Option<String>,
    encoding: Option<String>,
    endian: Option<String>,
    field: Option<String>,
}

fn parse_endian(value: &str) -> Result<Endian, LintError> {
    match value {
        "little" => Ok(Endian::Little),
        "big" => Ok(Endian::Big),
        other => Err(LintError::InvalidEndian(other.to_string())),
    }
}

/// Validate grammar text and build the AST.
pub fn lint_grammar(text: &str) -> LintOutcome {
    let raw: RawDocument = match serde_yaml::from_str(text) {
        Ok(raw) => raw,
        Err(e) => return LintOutcome::failed(vec![LintError::Yaml(e.to_string())]),
    };

    // Stage 1: top-level format.
    match raw.format.as_deref() {
        Some("record_stream") => {}
        Some(other) => {
            return LintOutcome::failed(vec![LintError::InvalidFormat(other.to_string())])
        }
        None => {
            return LintOutcome::failed(vec![LintError::InvalidFormat(
                "missing `format` key".to_string(),
            )])
        }
    }

    // Stage 2: default endianness and framing.
    let endian_default = match raw.endian.as_deref() {
        Some(value) => match parse_endian(value) {
            Ok(endian) => Some(endian),
            Err(e) => return LintOutcome::failed(vec![e]),
        },
        None => None,
    };
    if let Some(framing) = &raw.framing {
        match framing.repeat.as_deref() {
            None | Some("until_eof") => {}
            Some(other) => {
                return LintOutcome::failed(vec![LintError::InvalidFraming(format!(
                    "unsupported repeat `{other}`"
                ))])
            }
        }
    }

    if raw.types.is_empty() {
        return LintOutcome::failed(vec![LintError::NoTypes]);
    }
    let type_names: HashSet<&str> = raw.types.keys().map(String::as_str).collect();

    // Stages 3-7: per-field structural checks, building typed definitions.
    let mut errors = Vec::new();
    let mut types: IndexMap<String, TypeDef> = IndexMap::with_capacity(raw.types.len());
    for (type_name, raw_type) in &raw.types {
        if raw_type.fields.is_empty() {
            errors.push(LintError::EmptyType(type_name.clone()));
            continue;
        }
        let mut fields = Vec::with_capacity(raw_type.fields.len());
        for (index, raw_field) in raw_type.fields.iter().enumerate() {
            match build_field(type_name, index, raw_field, &type_names, endian_default) {
                Ok(field) => fields.push(field),
                Err(mut field_errors) => errors.append(&mut field_errors),
            }
        }
        types.insert(
            type_name.clone(),
            TypeDef {
                name: type_name.clone(),
                fields,
            },
        );
    }
    if !errors.is_empty() {
        return LintOutcome::failed(errors);
    }

    if let Some(cycle) = find_type_cycle(&types) {
        return LintOutcome::failed(vec![LintError::RecursiveType(cycle)]);
    }

    // Referential checks: length references resolve within the record scope.
    let mut warnings = Vec::new();
    check_length_refs(&types, &mut errors, &mut warnings);
    if !errors.is_empty() {
        return LintOutcome::failed(errors);
    }

    // Record dispatch.
    let dispatch = match build_dispatch(&raw, &types) {
        Ok(dispatch) => dispatch,
        Err(e) => return LintOutcome::failed(vec![e]),
    };

    // Stage 8: registry literals and decoder kinds.
    let registry = match build_registry(&raw) {
        Ok(registry) => registry,
        Err(registry_errors) => return LintOutcome::failed(registry_errors),
    };

    let grammar = Grammar {
        format: Format::RecordStream,
        endian_default,
        framing: Framing::UntilEof,
        types,
        dispatch,
        registry,
    };

    collect_warnings(&grammar, &mut warnings);

    LintOutcome {
        grammar: Some(grammar),
        errors: Vec::new(),
        warnings,
    }
}

fn build_field(
    type_name: &str,
    index: usize,
    raw: &RawFieldDef,
    type_names: &HashSet<&str>,
    endian_default: Option<Endian>,
) -> Result<FieldDef, Vec<LintError>> {
    let mut errors = Vec::new();

    let name = match raw.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(vec![LintError::UnnamedField {
                type_name: type_name.to_string(),
                index,
            }])
        }
    };

    let ty = match raw.ty.as_deref() {
        Some(ty) if !ty.is_empty() => FieldType::from_name(ty),
        _ => {
            return Err(vec![LintError::MissingFieldType {
                type_name: type_name.to_string(),
                field: name,
            }])
        }
    };
    if let FieldType::Named(referenced) = &ty {
        if !type_names.contains(referenced.as_str()) {
            errors.push(LintError::UnknownType {
                type_name: type_name.to_string(),
                field: name.clone(),
                referenced: referenced.clone(),
            });
        }
    }

    let endian = match raw.endian.as_deref() {
        Some(value) => match parse_endian(value) {
            Ok(endian) => Some(endian),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        None => None,
    };
    if matches!(ty, FieldType::U16 | FieldType::U32) && endian.is_none() && endian_default.is_none()
    {
        errors.push(LintError::MissingEndian {
            type_name: type_name.to_string(),
            field: name.clone(),
        });
    }

    let length = match resolve_length(raw) {
        Ok(length) => length,
        Err(detail) => {
            errors.push(LintError::InvalidLength {
                type_name: type_name.to_string(),
                field: name.clone(),
                detail,
            });
            LengthSpec::None
        }
    };
    if ty == FieldType::Bytes && length == LengthSpec::None {
        errors.push(LintError::InvalidLength {
            type_name: type_name.to_string(),
            field: name.clone(),
            detail: "bytes fields need exactly one of length, length_field, or length_expr"
                .to_string(),
        });
    }
    if let LengthSpec::Expr(src) = &length {
        if let Err(e) = Expr::parse(src) {
            errors.push(LintError::InvalidExpr {
                type_name: type_name.to_string(),
                field: name.clone(),
                source: e,
            });
        }
    }

    let validate = match &raw.validate {
        Some(raw_validate) => match resolve_validate(raw_validate) {
            Ok(rule) => Some(rule),
            Err(detail) => {
                errors.push(LintError::InvalidValidate {
                    type_name: type_name.to_string(),
                    field: name.clone(),
                    detail,
                });
                None
            }
        },
        None => None,
    };

    let color = match raw.color.as_deref() {
        Some(color) => match normalize_color(color) {
            Ok(normalized) => Some(normalized),
            Err(detail) => {
                errors.push(LintError::InvalidColor {
                    type_name: type_name.to_string(),
                    field: name.clone(),
                    detail,
                });
                None
            }
        },
        None => None,
    };

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(FieldDef {
        name,
        ty,
        endian,
        length,
        encoding: raw.encoding.clone(),
        validate,
        color,
    })
}

/// Resolve the length sugar: explicit `length_field`/`length_expr` win, then
/// an integer `length` is static, a string `length` with operator characters
/// is an expression, and any other string is a field reference.
fn resolve_length(raw: &RawFieldDef) -> Result<LengthSpec, String> {
    let mut specs = Vec::new();
    if let Some(field) = &raw.length_field {
        specs.push(LengthSpec::Field(field.clone()));
    }
    if let Some(expr) = &raw.length_expr {
        specs.push(LengthSpec::Expr(expr.clone()));
    }
    if let Some(length) = &raw.length {
        match length {
            RawLength::Int(n) => {
                if *n < 0 {
                    return Err(format!("static length {n} is negative"));
                }
                specs.push(LengthSpec::Static(*n as u64));
            }
            RawLength::Text(text) => {
                if text.chars().any(|c| "+-*/()".contains(c)) {
                    specs.push(LengthSpec::Expr(text.clone()));
                } else {
                    specs.push(LengthSpec::Field(text.clone()));
                }
            }
        }
    }
    match specs.len() {
        0 => Ok(LengthSpec::None),
        1 => Ok(specs.remove(0)),
        n => Err(format!("{n} length specifications; exactly one is allowed")),
    }
}

fn resolve_validate(raw: &RawValidate) -> Result<ValidateRule, String> {
    let mut rules = Vec::new();
    if let Some(literal) = raw.equals {
        rules.push(ValidateRule::Equals(literal));
    }
    if let Some(field) = &raw.equals_field {
        rules.push(ValidateRule::EqualsField(field.clone()));
    }
    if let Some(byte) = raw.all_bytes {
        let byte =
            u8::try_from(byte).map_err(|_| format!("all_bytes value {byte} is not a byte"))?;
        rules.push(ValidateRule::AllBytes(byte));
    }
    match rules.len() {
        1 => Ok(rules.remove(0)),
        0 => Err("validate block has no rule".to_string()),
        n => Err(format!("validate block has {n} rules; exactly one is allowed")),
    }
}

/// Detect nested type cycles; the parser recurses over nested types and must
/// never see one.
fn find_type_cycle(types: &IndexMap<String, TypeDef>) -> Option<String> {
    fn visit(
        types: &IndexMap<String, TypeDef>,
        name: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Option<String> {
        if done.contains(name) {
            return None;
        }
        if stack.iter().any(|s| s == name) {
            return Some(name.to_string());
        }
        stack.push(name.to_string());
        if let Some(type_def) = types.get(name) {
            for field in &type_def.fields {
                if let FieldType::Named(nested) = &field.ty {
                    if let Some(cycle) = visit(types, nested, stack, done) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        done.insert(name.to_string());
        None
    }

    let mut done = HashSet::new();
    for name in types.keys() {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(types, name, &mut stack, &mut done) {
            return Some(cycle);
        }
    }
    None
}

/// Check that every `length_field` and every `length_expr` identifier refers
/// to an integer field already parsed at that record scope: an earlier field
/// of the same type, or an integer leaf of an earlier nested type. Bindings
/// are first-wins; later re-bindings are flagged as shadowing.
fn check_length_refs(
    types: &IndexMap<String, TypeDef>,
    errors: &mut Vec<LintError>,
    warnings: &mut Vec<LintWarning>,
) {
    for (type_name, type_def) in types {
        let mut visible: HashSet<String> = HashSet::new();
        for field in &type_def.fields {
            match &field.length {
                LengthSpec::Field(target) => {
                    if !visible.contains(target) {
                        errors.push(LintError::UnresolvedLengthRef {
                            type_name: type_name.clone(),
                            field: field.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
                LengthSpec::Expr(src) => {
                    if let Ok(expr) = Expr::parse(src) {
                        for ident in expr.idents() {
                            if !visible.contains(ident) {
                                errors.push(LintError::UnresolvedLengthRef {
                                    type_name: type_name.clone(),
                                    field: field.name.clone(),
                                    target: ident.to_string(),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
            bind_field_names(types, type_name, field, &mut visible, warnings);
        }
    }
}

fn bind_field_names(
    types: &IndexMap<String, TypeDef>,
    scope_type: &str,
    field: &FieldDef,
    visible: &mut HashSet<String>,
    warnings: &mut Vec<LintWarning>,
) {
    match &field.ty {
        FieldType::U8 | FieldType::U16 | FieldType::U32 => {
            if !visible.insert(field.name.clone()) {
                warnings.push(LintWarning::ShadowedLengthRef {
                    type_name: scope_type.to_string(),
                    name: field.name.clone(),
                });
            }
        }
        FieldType::Bytes => {}
        FieldType::Named(nested) => {
            if let Some(nested_def) = types.get(nested) {
                for nested_field in &nested_def.fields {
                    bind_field_names(types, scope_type, nested_field, visible, warnings);
                }
            }
        }
    }
}

fn build_dispatch(
    raw: &RawDocument,
    types: &IndexMap<String, TypeDef>,
) -> Result<Dispatch, LintError> {
    let record = match &raw.record {
        Some(record) => record,
        // No `record` key: every record is the first declared type.
        None => {
            let first = types.keys().next().ok_or(LintError::NoTypes)?;
            return Ok(Dispatch::UseType(first.clone()));
        }
    };

    match (&record.use_type, &record.switch) {
        (Some(_), Some(_)) => Err(LintError::InvalidDispatch(
            "`use` and `switch` are mutually exclusive".to_string(),
        )),
        (Some(use_type), None) => {
            if !types.contains_key(use_type) {
                return Err(LintError::InvalidDispatch(format!(
                    "`use` references unknown type `{use_type}`"
                )));
            }
            Ok(Dispatch::UseType(use_type.clone()))
        }
        (None, Some(switch)) => build_switch(switch, types),
        (None, None) => Err(LintError::InvalidDispatch(
            "record block needs `use` or `switch`".to_string(),
        )),
    }
}

fn build_switch(raw: &RawSwitch, types: &IndexMap<String, TypeDef>) -> Result<Dispatch, LintError> {
    let expr = raw
        .expr
        .as_deref()
        .ok_or_else(|| LintError::InvalidDispatch("switch needs an `expr`".to_string()))?;
    let (container, field_name) = expr.split_once('.').ok_or_else(|| {
        LintError::InvalidDispatch(format!(
            "switch expr `{expr}` must be a dotted `Type.field` path"
        ))
    })?;
    let container_def = types.get(container).ok_or_else(|| {
        LintError::InvalidDispatch(format!("switch expr references unknown type `{container}`"))
    })?;
    let disc_field = container_def.field(field_name).ok_or_else(|| {
        LintError::InvalidDispatch(format!(
            "switch expr references unknown field `{container}.{field_name}`"
        ))
    })?;
    if disc_field.ty.primitive_size().is_none() {
        return Err(LintError::InvalidDispatch(format!(
            "switch discriminator `{container}.{field_name}` must be an integer field"
        )));
    }

    let mut cases = IndexMap::with_capacity(raw.cases.len());
    for (literal, target) in &raw.cases {
        let normalized = normalize_hex_literal(literal).map_err(LintError::InvalidDiscriminator)?;
        if !types.contains_key(target) {
            return Err(LintError::InvalidDispatch(format!(
                "case {literal} references unknown type `{target}`"
            )));
        }
        if cases.insert(normalized.clone(), target.clone()).is_some() {
            return Err(LintError::DuplicateDiscriminator(normalized));
        }
    }

    let default = match raw.default.as_deref() {
        Some("") | None => None,
        Some(default) => {
            if !types.contains_key(default) {
                return Err(LintError::InvalidDispatch(format!(
                    "default references unknown type `{default}`"
                )));
            }
            Some(default.to_string())
        }
    };

    Ok(Dispatch::Switch {
        expr: expr.to_string(),
        cases,
        default,
    })
}

fn build_registry(raw: &RawDocument) -> Result<IndexMap<String, RegistryEntry>, Vec<LintError>> {
    let mut errors = Vec::new();
    let mut registry = IndexMap::with_capacity(raw.registry.len());
    for (literal, raw_entry) in &raw.registry {
        let normalized = match normalize_hex_literal(literal) {
            Ok(normalized) => normalized,
            Err(detail) => {
                errors.push(LintError::InvalidDiscriminator(detail));
                continue;
            }
        };
        let decode = raw_entry.decode.clone().unwrap_or_default();
        let endian = match decode.endian.as_deref() {
            Some(value) => match parse_endian(value) {
                Ok(endian) => Some(endian),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => None,
        };
        let decoder = match decode.as_type.as_deref().unwrap_or("hex") {
            "string" => DecoderKind::String {
                encoding: decode.encoding.clone(),
            },
            "u16" => DecoderKind::U16 { endian },
            "u32" => DecoderKind::U32 { endian },
            "hex" => DecoderKind::Hex,
            "packed_date_v1" => DecoderKind::PackedDateV1,
            other => {
                errors.push(LintError::UnknownDecoder {
                    key: literal.clone(),
                    kind: other.to_string(),
                });
                continue;
            }
        };
        let entry = RegistryEntry {
            label: raw_entry.name.clone().unwrap_or_else(|| normalized.clone()),
            decoder,
            field: decode.field.clone(),
        };
        if registry.insert(normalized.clone(), entry).is_some() {
            errors.push(LintError::DuplicateDiscriminator(normalized));
        }
    }
    if errors.is_empty() {
        Ok(registry)
    } else {
        Err(errors)
    }
}

fn collect_warnings(grammar: &Grammar, warnings: &mut Vec<LintWarning>) {
    // Reachability from the dispatch roots through nested type references.
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: Vec<&str> = Vec::new();
    match &grammar.dispatch {
        Dispatch::UseType(name) => queue.push(name),
        Dispatch::Switch {
            expr,
            cases,
            default,
        } => {
            if let Some((container, _)) = expr.split_once('.') {
                queue.push(container);
            }
            queue.extend(cases.values().map(String::as_str));
            if let Some(default) = default {
                queue.push(default);
            }
            if cases.is_empty() {
                warnings.push(LintWarning::EmptyDispatchCases);
            }
        }
    }
    while let Some(name) = queue.pop() {
        if !reachable.insert(name) {
            continue;
        }
        if let Some(type_def) = grammar.types.get(name) {
            for field in &type_def.fields {
                if let FieldType::Named(nested) = &field.ty {
                    queue.push(nested);
                }
            }
        }
    }
    for name in grammar.types.keys() {
        if !reachable.contains(name.as_str()) {
            warnings.push(LintWarning::UnusedType(name.clone()));
        }
    }

    if let Dispatch::Switch { cases, .. } = &grammar.dispatch {
        for key in grammar.registry.keys() {
            if !cases.contains_key(key) {
                warnings.push(LintWarning::OrphanRegistryKey(key.clone()));
            }
        }
    }
}
