//! Patch algebra: typed, path-addressed edits against a grammar document.
//!
//! Ops validate structurally on their own and apply to the grammar's
//! serialized form (the YAML mapping tree), never to the typed AST. The
//! store re-lints the applied text to rebuild the AST, which keeps ops
//! simple while preserving every AST invariant. Application is atomic: the
//! first failing op discards the working copy.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::grammar::FieldType;

/// One step of a path into the grammar tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSeg {
    fn from(key: &str) -> Self {
        PathSeg::Key(key.to_string())
    }
}

impl From<usize> for PathSeg {
    fn from(index: usize) -> Self {
        PathSeg::Index(index)
    }
}

/// Render a path the way findings report it: `types.Header.fields[0]`.
pub fn path_to_string(path: &[PathSeg]) -> String {
    let mut out = String::new();
    for (i, seg) in path.iter().enumerate() {
        match seg {
            PathSeg::Key(key) if i == 0 => out.push_str(key),
            PathSeg::Key(key) => {
                out.push('.');
                out.push_str(key);
            }
            PathSeg::Index(index) => {
                out.push_str(&format!("[{index}]"));
            }
        }
    }
    out
}

/// Structural patch failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("invalid path `{0}`")]
    InvalidPath(String),
    #[error("unknown path `{0}`")]
    UnknownPath(String),
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("`{0}` already exists")]
    DuplicateKey(String),
    #[error("{0}")]
    Malformed(String),
}

/// A single validated edit operation. All paths address the serialized form.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Insert a field into a type's field list. `index == -1` appends.
    InsertField {
        path: Vec<PathSeg>,
        index: i64,
        field_def: Mapping,
    },
    /// Overwrite recognized keys of an existing field.
    UpdateField { path: Vec<PathSeg>, updates: Mapping },
    DeleteField { path: Vec<PathSeg> },
    /// Add a new type; the name must be free.
    AddType { path: Vec<PathSeg>, type_def: Mapping },
    UpdateType { path: Vec<PathSeg>, updates: Mapping },
    /// Add a registry entry; the discriminator must be free.
    AddRegistryEntry { path: Vec<PathSeg>, entry: Mapping },
}

/// Field keys an `UpdateField` may overwrite.
const FIELD_KEYS: &[&str] = &[
    "name",
    "type",
    "endian",
    "length",
    "length_field",
    "length_expr",
    "encoding",
    "validate",
    "color",
];

impl PatchOp {
    pub fn insert_field(type_name: &str, index: i64, field_def: Mapping) -> PatchOp {
        PatchOp::InsertField {
            path: vec!["types".into(), type_name.into()],
            index,
            field_def,
        }
    }

    pub fn update_field(type_name: &str, field_index: usize, updates: Mapping) -> PatchOp {
        PatchOp::UpdateField {
            path: vec![
                "types".into(),
                type_name.into(),
                "fields".into(),
                field_index.into(),
            ],
            updates,
        }
    }

    pub fn delete_field(type_name: &str, field_index: usize) -> PatchOp {
        PatchOp::DeleteField {
            path: vec![
                "types".into(),
                type_name.into(),
                "fields".into(),
                field_index.into(),
            ],
        }
    }

    pub fn add_type(type_name: &str, type_def: Mapping) -> PatchOp {
        PatchOp::AddType {
            path: vec!["types".into(), type_name.into()],
            type_def,
        }
    }

    pub fn update_type(type_name: &str, updates: Mapping) -> PatchOp {
        PatchOp::UpdateType {
            path: vec!["types".into(), type_name.into()],
            updates,
        }
    }

    pub fn add_registry_entry(discriminator: &str, entry: Mapping) -> PatchOp {
        PatchOp::AddRegistryEntry {
            path: vec!["registry".into(), discriminator.into()],
            entry,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            PatchOp::InsertField { .. } => "insert_field",
            PatchOp::UpdateField { .. } => "update_field",
            PatchOp::DeleteField { .. } => "delete_field",
            PatchOp::AddType { .. } => "add_type",
            PatchOp::UpdateType { .. } => "update_type",
            PatchOp::AddRegistryEntry { .. } => "add_registry_entry",
        }
    }

    pub fn path(&self) -> &[PathSeg] {
        match self {
            PatchOp::InsertField { path, .. }
            | PatchOp::UpdateField { path, .. }
            | PatchOp::DeleteField { path }
            | PatchOp::AddType { path, .. }
            | PatchOp::UpdateType { path, .. }
            | PatchOp::AddRegistryEntry { path, .. } => path,
        }
    }

    /// Structural validation; needs no grammar.
    pub fn validate(&self) -> Result<(), PatchError> {
        match self {
            PatchOp::InsertField {
                path,
                index,
                field_def,
            } => {
                expect_named_child(path, "types")?;
                if *index < -1 {
                    return Err(PatchError::Malformed(format!(
                        "insert index {index} (use -1 to append)"
                    )));
                }
                if field_def.is_empty() {
                    return Err(PatchError::Malformed("field_def is empty".to_string()));
                }
                for key in ["name", "type"] {
                    if !field_def.contains_key(key) {
                        return Err(PatchError::Malformed(format!("field_def missing `{key}`")));
                    }
                }
                Ok(())
            }
            PatchOp::UpdateField { path, updates } => {
                expect_field_path(path)?;
                if updates.is_empty() {
                    return Err(PatchError::Malformed("updates is empty".to_string()));
                }
                for key in updates.keys() {
                    let recognized = key
                        .as_str()
                        .is_some_and(|k| FIELD_KEYS.contains(&k));
                    if !recognized {
                        return Err(PatchError::Malformed(format!(
                            "unrecognized field key {key:?}"
                        )));
                    }
                }
                Ok(())
            }
            PatchOp::DeleteField { path } => expect_field_path(path),
            PatchOp::AddType { path, type_def } => {
                expect_named_child(path, "types")?;
                match type_def.get("fields") {
                    Some(Value::Sequence(_)) => Ok(()),
                    Some(_) => Err(PatchError::Malformed(
                        "type_def `fields` must be a list".to_string(),
                    )),
                    None => Err(PatchError::Malformed(
                        "type_def missing `fields`".to_string(),
                    )),
                }
            }
            PatchOp::UpdateType { path, updates } => {
                expect_named_child(path, "types")?;
                if updates.is_empty() {
                    return Err(PatchError::Malformed("updates is empty".to_string()));
                }
                Ok(())
            }
            PatchOp::AddRegistryEntry { path, entry } => {
                expect_named_child(path, "registry")?;
                if entry.is_empty() {
                    return Err(PatchError::Malformed("entry is empty".to_string()));
                }
                Ok(())
            }
        }
    }
}

fn expect_named_child(path: &[PathSeg], root: &str) -> Result<(), PatchError> {
    match path {
        [PathSeg::Key(head), PathSeg::Key(_)] if head == root => Ok(()),
        _ => Err(PatchError::InvalidPath(format!(
            "{} (expected ('{root}', name))",
            path_to_string(path)
        ))),
    }
}

fn expect_field_path(path: &[PathSeg]) -> Result<(), PatchError> {
    match path {
        [PathSeg::Key(root), PathSeg::Key(_), PathSeg::Key(fields), PathSeg::Index(_)]
            if root == "types" && fields == "fields" =>
        {
            Ok(())
        }
        _ => Err(PatchError::InvalidPath(format!(
            "{} (expected ('types', name, 'fields', index))",
            path_to_string(path)
        ))),
    }
}

/// Ordered edit operations applied atomically, plus a description for the
/// audit trail. An empty patch is valid and produces a child identical to
/// its parent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub ops: Vec<PatchOp>,
    pub description: String,
}

impl Patch {
    pub fn new(ops: Vec<PatchOp>, description: impl Into<String>) -> Patch {
        Patch {
            ops,
            description: description.into(),
        }
    }

    /// Validate every op; returns all findings, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .ops
            .iter()
            .enumerate()
            .filter_map(|(i, op)| {
                op.validate()
                    .err()
                    .map(|e| format!("op {i} ({}): {e}", op.op_name()))
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Application failure: which op failed and why.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("op {op_index}: {source}")]
pub struct PatchFailure {
    pub op_index: usize,
    pub source: PatchError,
}

/// Apply a patch to the serialized grammar form, returning a new tree.
///
/// The input is untouched; on failure the partially patched copy is
/// discarded. The caller is expected to re-lint the result.
pub fn apply_to_value(doc: &Value, patch: &Patch) -> Result<Value, PatchFailure> {
    let mut working = doc.clone();
    for (op_index, op) in patch.ops.iter().enumerate() {
        apply_op(&mut working, op).map_err(|source| PatchFailure { op_index, source })?;
    }
    Ok(working)
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    op.validate()?;
    match op {
        PatchOp::InsertField {
            path,
            index,
            field_def,
        } => {
            let type_name = key_at(path, 1)?;
            check_field_type(doc, field_def)?;
            let fields = fields_of(doc, &type_name)?;
            let len = fields.len();
            let at = if *index < 0 {
                len
            } else {
                let at = *index as usize;
                if at > len {
                    return Err(PatchError::IndexOutOfRange { index: *index, len });
                }
                at
            };
            fields.insert(at, Value::Mapping(field_def.clone()));
            Ok(())
        }
        PatchOp::UpdateField { path, updates } => {
            let type_name = key_at(path, 1)?;
            let index = index_at(path, 3)?;
            let fields = fields_of(doc, &type_name)?;
            let len = fields.len();
            let field = fields
                .get_mut(index)
                .ok_or(PatchError::IndexOutOfRange {
                    index: index as i64,
                    len,
                })?;
            let mapping = field.as_mapping_mut().ok_or_else(|| {
                PatchError::Malformed(format!("field {index} of `{type_name}` is not a mapping"))
            })?;
            for (key, value) in updates {
                mapping.insert(key.clone(), value.clone());
            }
            Ok(())
        }
        PatchOp::DeleteField { path } => {
            let type_name = key_at(path, 1)?;
            let index = index_at(path, 3)?;
            let fields = fields_of(doc, &type_name)?;
            if index >= fields.len() {
                return Err(PatchError::IndexOutOfRange {
                    index: index as i64,
                    len: fields.len(),
                });
            }
            fields.remove(index);
            Ok(())
        }
        PatchOp::AddType { path, type_def } => {
            let type_name = key_at(path, 1)?;
            let types = mapping_entry(doc, "types")?;
            let key = Value::from(type_name.as_str());
            if types.contains_key(&key) {
                return Err(PatchError::DuplicateKey(format!("types.{type_name}")));
            }
            types.insert(key, Value::Mapping(type_def.clone()));
            Ok(())
        }
        PatchOp::UpdateType { path, updates } => {
            let type_name = key_at(path, 1)?;
            let types = mapping_entry(doc, "types")?;
            let entry = types
                .get_mut(type_name.as_str())
                .ok_or_else(|| PatchError::UnknownPath(format!("types.{type_name}")))?;
            let mapping = entry.as_mapping_mut().ok_or_else(|| {
                PatchError::Malformed(format!("type `{type_name}` is not a mapping"))
            })?;
            for (key, value) in updates {
                mapping.insert(key.clone(), value.clone());
            }
            Ok(())
        }
        PatchOp::AddRegistryEntry { path, entry } => {
            let discriminator = key_at(path, 1)?;
            let registry = mapping_entry(doc, "registry")?;
            let key = Value::from(discriminator.as_str());
            if registry.contains_key(&key) {
                return Err(PatchError::DuplicateKey(format!(
                    "registry.{discriminator}"
                )));
            }
            registry.insert(key, Value::Mapping(entry.clone()));
            Ok(())
        }
    }
}

fn key_at(path: &[PathSeg], at: usize) -> Result<String, PatchError> {
    match path.get(at) {
        Some(PathSeg::Key(key)) => Ok(key.clone()),
        _ => Err(PatchError::InvalidPath(path_to_string(path))),
    }
}

fn index_at(path: &[PathSeg], at: usize) -> Result<usize, PatchError> {
    match path.get(at) {
        Some(PathSeg::Index(index)) => Ok(*index),
        _ => Err(PatchError::InvalidPath(path_to_string(path))),
    }
}

/// The document's mapping under `key`, created empty when absent.
fn mapping_entry<'d>(doc: &'d mut Value, key: &str) -> Result<&'d mut Mapping, PatchError> {
    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| PatchError::Malformed("grammar document is not a mapping".to_string()))?;
    let entry = root
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    entry
        .as_mapping_mut()
        .ok_or_else(|| PatchError::Malformed(format!("`{key}` is not a mapping")))
}

/// Mutable field list of a type; the type must exist.
fn fields_of<'d>(doc: &'d mut Value, type_name: &str) -> Result<&'d mut Vec<Value>, PatchError> {
    let types = mapping_entry(doc, "types")?;
    let type_def = types
        .get_mut(type_name)
        .ok_or_else(|| PatchError::UnknownPath(format!("types.{type_name}")))?;
    let mapping = type_def
        .as_mapping_mut()
        .ok_or_else(|| PatchError::Malformed(format!("type `{type_name}` is not a mapping")))?;
    let fields = mapping
        .entry(Value::from("fields"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    match fields {
        Value::Sequence(seq) => Ok(seq),
        _ => Err(PatchError::Malformed(format!(
            "`types.{type_name}.fields` is not a list"
        ))),
    }
}

/// An inserted field's type must resolve: a primitive or a type already in
/// the document.
fn check_field_type(doc: &Value, field_def: &Mapping) -> Result<(), PatchError> {
    let ty = field_def
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| PatchError::Malformed("field_def `type` must be a string".to_string()))?;
    if FieldType::from_name(ty).is_primitive() {
        return Ok(());
    }
    let known = doc
        .get("types")
        .and_then(Value::as_mapping)
        .is_some_and(|types| types.contains_key(ty));
    if known {
        Ok(())
    } else {
        Err(PatchError::Malformed(format!(
            "field type `{ty}` is neither a primitive nor a defined type"
        )))
    }
}
