//! Version store and patch algebra: atomic application, lineage, drafts.

use bingram::{
    parse_binary, score_run, Patch, PatchOp, ParseOptions, PathSeg, SliceReader, SpecStore,
};
use serde_yaml::Mapping;

const BASELINE: &str = r#"
format: record_stream
endian: little
framing: {repeat: until_eof}
types:
  R:
    fields:
      - {name: t, type: u16}
      - {name: n, type: u8}
      - {name: p, type: bytes, length: n}
record: {use: R}
"#;

fn mapping(yaml: &str) -> Mapping {
    serde_yaml::from_str(yaml).expect("mapping literal")
}

#[test]
fn create_initial_stores_a_valid_root() {
    let mut store = SpecStore::new();
    let id = store.create_initial(BASELINE, false).expect("valid grammar");
    let version = store.get(&id).expect("stored version");
    assert!(version.lint_valid);
    assert!(version.grammar.is_some());
    assert!(version.parent_id.is_none());
    assert!(version.patch_applied.is_none());
    assert_eq!(store.roots(), &[id]);
}

#[test]
fn create_initial_rejects_invalid_text_by_default() {
    let mut store = SpecStore::new();
    let errors = store
        .create_initial("format: record_stream\n", false)
        .expect_err("no types");
    assert!(!errors.is_empty());
    assert!(store.is_empty());

    // At the caller's option the broken version is still recorded.
    let id = store
        .create_initial("format: record_stream\n", true)
        .expect("stored despite lint failure");
    let version = store.get(&id).expect("stored version");
    assert!(!version.lint_valid);
    assert!(version.grammar.is_none());
    assert!(!version.lint_errors.is_empty());
}

#[test]
fn insert_field_produces_a_new_lint_valid_version() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");

    let patch = Patch::new(
        vec![PatchOp::insert_field("R", -1, mapping("{name: extra, type: u8}"))],
        "append trailing byte",
    );
    let result = store.apply_patch(&v0, &patch);
    assert!(result.success, "errors: {:?}", result.errors);

    let v1 = result.new_version_id.expect("new id");
    let version = store.get(&v1).expect("v1");
    assert!(version.lint_valid);
    assert_eq!(version.parent_id.as_deref(), Some(v0.as_str()));
    assert!(version.patch_applied.is_some());
    let fields = &version.grammar.as_ref().expect("ast").types["R"].fields;
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[3].name, "extra");
}

#[test]
fn patched_grammar_shifts_parsing_and_zeroes_the_score() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let patch = Patch::new(
        vec![PatchOp::insert_field("R", -1, mapping("{name: extra, type: u8}"))],
        "append trailing byte",
    );
    let v1 = store
        .apply_patch(&v0, &patch)
        .new_version_id
        .expect("v1");

    // The S1 input no longer tiles: record 1 absorbs the old record 2's
    // first byte and record 2 dies on a short read.
    let bytes = [0x01, 0x00, 0x03, 0x41, 0x42, 0x43, 0x02, 0x00, 0x00];
    let version = store.get(&v1).expect("v1");
    let grammar = version.grammar.as_ref().expect("ast");
    let result = parse_binary(
        grammar,
        &SliceReader::new(&bytes),
        "test.bin",
        &ParseOptions::default(),
    );
    assert_eq!(result.record_count, 1);
    assert_eq!(result.records[0].size, 7);
    assert_eq!(result.errors.len(), 1);

    let artifact = bingram::create_run_artifact(
        None,
        &v1,
        result,
        "test.bin",
        bytes.len() as u64,
        Some(grammar),
    );
    let score = score_run(&artifact, None);
    assert!(!score.passed_hard_gates);
    assert_eq!(score.total_score, 0.0);
    assert_eq!(score.failed_gates, vec!["no_safety_violations".to_string()]);
}

#[test]
fn apply_patch_is_atomic_on_structural_failure() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let before: Vec<String> = store.version_ids().map(str::to_string).collect();

    // First op is fine, second collides with an existing type.
    let patch = Patch::new(
        vec![
            PatchOp::insert_field("R", 0, mapping("{name: lead, type: u8}")),
            PatchOp::add_type("R", mapping("{fields: [{name: x, type: u8}]}")),
        ],
        "conflicting edit",
    );
    let result = store.apply_patch(&v0, &patch);
    assert!(!result.success);
    assert_eq!(result.rejected_ops, vec![1]);
    assert!(result.errors[0].contains("already exists"), "{:?}", result.errors);

    let after: Vec<String> = store.version_ids().map(str::to_string).collect();
    assert_eq!(before, after, "failed patch must leave the store unchanged");
}

#[test]
fn apply_patch_rolls_back_on_lint_failure() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");

    // Deleting `n` leaves `p`'s length reference dangling; the post-apply
    // lint pass must reject the patch.
    let patch = Patch::new(vec![PatchOp::delete_field("R", 1)], "drop length field");
    let result = store.apply_patch(&v0, &patch);
    assert!(!result.success);
    assert!(
        result.errors.iter().any(|e| e.contains("lint failed")),
        "errors: {:?}",
        result.errors
    );
    assert_eq!(store.len(), 1);
}

#[test]
fn empty_patch_clones_the_parent() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let result = store.apply_patch(&v0, &Patch::default());
    assert!(result.success, "errors: {:?}", result.errors);
    let v1 = result.new_version_id.expect("v1");
    let parent = store.get(&v0).expect("v0");
    let child = store.get(&v1).expect("v1");
    assert_eq!(parent.spec_text, child.spec_text);
    assert!(child.lint_valid);
}

#[test]
fn unknown_parent_fails_cleanly() {
    let mut store = SpecStore::new();
    let result = store.apply_patch("missing", &Patch::default());
    assert!(!result.success);
    assert!(result.errors[0].contains("not found"));
}

#[test]
fn op_validation_catches_malformed_ops() {
    let empty_def = PatchOp::insert_field("R", -1, Mapping::new());
    assert!(empty_def.validate().is_err());

    let missing_type = PatchOp::insert_field("R", -1, mapping("{name: x}"));
    assert!(missing_type.validate().is_err());

    let bad_path = PatchOp::AddType {
        path: vec![PathSeg::Key("registry".into()), PathSeg::Key("X".into())],
        type_def: mapping("{fields: []}"),
    };
    assert!(bad_path.validate().is_err());

    let unrecognized_key = PatchOp::update_field("R", 0, mapping("{shape: round}"));
    assert!(unrecognized_key.validate().is_err());

    let patch = Patch::new(vec![empty_def], "broken");
    let errors = patch.validate().expect_err("invalid op");
    assert!(errors[0].starts_with("op 0 (insert_field)"), "{:?}", errors);
}

#[test]
fn field_index_out_of_range_is_rejected() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let patch = Patch::new(
        vec![PatchOp::update_field("R", 99, mapping("{type: u8}"))],
        "out of range",
    );
    let result = store.apply_patch(&v0, &patch);
    assert!(!result.success);
    assert!(result.errors[0].contains("out of range"), "{:?}", result.errors);
}

#[test]
fn inserted_field_type_must_resolve() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let patch = Patch::new(
        vec![PatchOp::insert_field("R", -1, mapping("{name: w, type: Widget}"))],
        "dangling type",
    );
    let result = store.apply_patch(&v0, &patch);
    assert!(!result.success);
    assert!(
        result.errors[0].contains("neither a primitive nor a defined type"),
        "{:?}",
        result.errors
    );
}

#[test]
fn add_type_and_registry_entry_roundtrip_through_lint() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let patch = Patch::new(
        vec![
            PatchOp::add_type("Extra", mapping("{fields: [{name: tag, type: u8}]}")),
            PatchOp::add_registry_entry("0x0001", mapping("{name: Tagged, decode: {as: hex}}")),
        ],
        "grow the grammar",
    );
    let result = store.apply_patch(&v0, &patch);
    assert!(result.success, "errors: {:?}", result.errors);
    let v1 = result.new_version_id.expect("v1");
    let grammar = store.get(&v1).and_then(|v| v.grammar.as_ref()).expect("ast");
    assert!(grammar.types.contains_key("Extra"));
    // Registry keys are stored in canonical hex form.
    assert!(grammar.registry.contains_key("0x01"));

    let duplicate = Patch::new(
        vec![PatchOp::add_registry_entry("0x0001", mapping("{name: Dup}"))],
        "duplicate key",
    );
    let result = store.apply_patch(&v1, &duplicate);
    assert!(!result.success);
}

#[test]
fn lineage_walks_from_root_to_leaf() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let p1 = Patch::new(
        vec![PatchOp::insert_field("R", -1, mapping("{name: a, type: u8}"))],
        "a",
    );
    let v1 = store.apply_patch(&v0, &p1).new_version_id.expect("v1");
    let p2 = Patch::new(
        vec![PatchOp::insert_field("R", -1, mapping("{name: b, type: u8}"))],
        "b",
    );
    let v2 = store.apply_patch(&v1, &p2).new_version_id.expect("v2");

    assert_eq!(store.lineage(&v2), vec![v0.clone(), v1.clone(), v2.clone()]);
    assert_eq!(store.lineage(&v0), vec![v0.clone()]);
    assert!(store.lineage("missing").is_empty());
    assert_eq!(store.roots(), &[v0]);
}

#[test]
fn diff_specs_reports_line_changes() {
    let mut store = SpecStore::new();
    let v0 = store.create_initial(BASELINE, false).expect("v0");
    let p1 = Patch::new(
        vec![PatchOp::insert_field("R", -1, mapping("{name: extra, type: u8}"))],
        "extra",
    );
    let v1 = store.apply_patch(&v0, &p1).new_version_id.expect("v1");
    let p2 = Patch::new(
        vec![PatchOp::insert_field("R", -1, mapping("{name: extra2, type: u8}"))],
        "extra2",
    );
    let v2 = store.apply_patch(&v1, &p2).new_version_id.expect("v2");

    let diff = store.diff_specs(&v1, &v2).expect("both versions exist");
    assert!(
        diff.changes
            .iter()
            .any(|line| line.starts_with("+ ") && line.contains("extra2")),
        "changes: {:?}",
        diff.changes
    );
    assert!(store.diff_specs(&v1, "missing").is_none());
}

#[test]
fn working_draft_lifecycle() {
    let mut store = SpecStore::new();
    assert!(!store.has_working_draft());
    assert!(store.commit_working_draft().is_err());

    store.set_working_text("format: record_stream\n");
    assert!(store.has_working_draft());
    assert!(!store.validate_working_draft().is_valid());

    store.set_working_text(BASELINE);
    assert!(store.validate_working_draft().is_valid());
    let id = store.commit_working_draft().expect("valid draft");
    assert!(store.get(&id).is_some());
    // The draft text itself is untouched by the commit.
    assert_eq!(store.working_text(), BASELINE);
}
