//! Append-only store of grammar versions.
//!
//! Every committed grammar is an immutable [`SpecVersion`] with a parent
//! link; patches apply atomically against the parent's serialized form and
//! re-lint before a child version is appended. Nothing is ever deleted or
//! rewritten. The store also holds one mutable working draft: raw text that
//! has not yet become a version.
//!
//! The store is single-writer: share it across threads only behind external
//! serialization.

use indexmap::IndexMap;
use tracing::debug;
use uuid::Uuid;

use crate::clock::monotonic_millis;
use crate::grammar::Grammar;
use crate::lint::{lint_grammar, LintOutcome};
use crate::patch::{apply_to_value, Patch};

/// Immutable snapshot of a grammar at a point in time.
#[derive(Debug, Clone)]
pub struct SpecVersion {
    pub id: String,
    pub parent_id: Option<String>,
    pub created_at_ms: u64,
    pub spec_text: String,
    /// Validated AST; absent when the version was stored despite lint
    /// failure.
    pub grammar: Option<Grammar>,
    /// Patch that produced this version from its parent.
    pub patch_applied: Option<Patch>,
    pub lint_valid: bool,
    pub lint_errors: Vec<String>,
    pub lint_warnings: Vec<String>,
}

/// Result of attempting to apply a patch.
#[derive(Debug, Clone, Default)]
pub struct PatchResult {
    pub success: bool,
    pub new_version_id: Option<String>,
    pub errors: Vec<String>,
    /// Indices of ops rejected during application.
    pub rejected_ops: Vec<usize>,
}

impl PatchResult {
    fn failure(errors: Vec<String>) -> PatchResult {
        PatchResult {
            success: false,
            new_version_id: None,
            errors,
            rejected_ops: Vec::new(),
        }
    }
}

/// Line-level textual diff between two versions.
#[derive(Debug, Clone)]
pub struct SpecDiff {
    pub version_a_id: String,
    pub version_b_id: String,
    /// Changed lines, prefixed `- ` (only in A) or `+ ` (only in B), in
    /// document order.
    pub changes: Vec<String>,
}

/// In-memory version graph plus the shared working draft.
#[derive(Debug, Default)]
pub struct SpecStore {
    versions: IndexMap<String, SpecVersion>,
    roots: Vec<String>,
    working_text: String,
    draft_lint: Option<LintOutcome>,
}

impl SpecStore {
    pub fn new() -> SpecStore {
        SpecStore::default()
    }

    /// Commit grammar text as a new root version.
    ///
    /// By default a lint failure stores nothing and returns the errors;
    /// with `store_invalid` the version is kept with `lint_valid = false`.
    pub fn create_initial(
        &mut self,
        spec_text: &str,
        store_invalid: bool,
    ) -> Result<String, Vec<String>> {
        let lint = lint_grammar(spec_text);
        if !lint.is_valid() && !store_invalid {
            return Err(lint.error_strings());
        }
        let id = self.fresh_id();
        debug!(id = %id, valid = lint.is_valid(), "storing initial version");
        let version = SpecVersion {
            id: id.clone(),
            parent_id: None,
            created_at_ms: monotonic_millis(),
            spec_text: spec_text.to_string(),
            lint_valid: lint.is_valid(),
            lint_errors: lint.error_strings(),
            lint_warnings: lint.warning_strings(),
            grammar: lint.grammar,
            patch_applied: None,
        };
        self.versions.insert(id.clone(), version);
        self.roots.push(id.clone());
        Ok(id)
    }

    pub fn get(&self, version_id: &str) -> Option<&SpecVersion> {
        self.versions.get(version_id)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Root version ids, in creation order.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// All version ids, in creation order.
    pub fn version_ids(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// Apply a patch to `parent_id`, producing a new version on success.
    ///
    /// Atomic: structural failure, serialization failure, or a lint failure
    /// of the patched text all leave the store unchanged.
    pub fn apply_patch(&mut self, parent_id: &str, patch: &Patch) -> PatchResult {
        let parent = match self.versions.get(parent_id) {
            Some(parent) => parent,
            None => {
                return PatchResult::failure(vec![format!(
                    "parent version {parent_id} not found"
                )])
            }
        };

        if let Err(errors) = patch.validate() {
            return PatchResult::failure(errors);
        }

        let doc: serde_yaml::Value = match serde_yaml::from_str(&parent.spec_text) {
            Ok(doc) => doc,
            Err(e) => return PatchResult::failure(vec![format!("parent text unreadable: {e}")]),
        };
        let patched = match apply_to_value(&doc, patch) {
            Ok(patched) => patched,
            Err(failure) => {
                return PatchResult {
                    success: false,
                    new_version_id: None,
                    errors: vec![failure.to_string()],
                    rejected_ops: vec![failure.op_index],
                }
            }
        };
        // Re-dump only when something changed: an empty or no-op patch keeps
        // the parent's text byte for byte.
        let new_text = if patched == doc {
            parent.spec_text.clone()
        } else {
            match serde_yaml::to_string(&patched) {
                Ok(text) => text,
                Err(e) => return PatchResult::failure(vec![format!("serialization failed: {e}")]),
            }
        };

        let lint = lint_grammar(&new_text);
        if !lint.is_valid() {
            return PatchResult::failure(
                lint.error_strings()
                    .into_iter()
                    .map(|e| format!("lint failed: {e}"))
                    .collect(),
            );
        }

        let id = self.fresh_id();
        debug!(id = %id, parent = %parent_id, ops = patch.ops.len(), "patched version stored");
        let version = SpecVersion {
            id: id.clone(),
            parent_id: Some(parent_id.to_string()),
            created_at_ms: monotonic_millis(),
            spec_text: new_text,
            lint_valid: true,
            lint_errors: Vec::new(),
            lint_warnings: lint.warning_strings(),
            grammar: lint.grammar,
            patch_applied: Some(patch.clone()),
        };
        self.versions.insert(id.clone(), version);
        PatchResult {
            success: true,
            new_version_id: Some(id),
            errors: Vec::new(),
            rejected_ops: Vec::new(),
        }
    }

    /// Version ids from the root down to `version_id`.
    pub fn lineage(&self, version_id: &str) -> Vec<String> {
        let mut lineage = Vec::new();
        let mut current = self.versions.get(version_id);
        while let Some(version) = current {
            lineage.push(version.id.clone());
            current = version
                .parent_id
                .as_deref()
                .and_then(|parent| self.versions.get(parent));
        }
        lineage.reverse();
        lineage
    }

    /// Line-level textual diff from version A to version B.
    pub fn diff_specs(&self, version_a_id: &str, version_b_id: &str) -> Option<SpecDiff> {
        let a = self.versions.get(version_a_id)?;
        let b = self.versions.get(version_b_id)?;
        Some(SpecDiff {
            version_a_id: version_a_id.to_string(),
            version_b_id: version_b_id.to_string(),
            changes: line_diff(&a.spec_text, &b.spec_text),
        })
    }

    // Working draft: one shared raw-text buffer, not yet a version.

    pub fn working_text(&self) -> &str {
        &self.working_text
    }

    /// Replace the working draft, invalidating its cached validation.
    pub fn set_working_text(&mut self, text: impl Into<String>) {
        self.working_text = text.into();
        self.draft_lint = None;
    }

    pub fn has_working_draft(&self) -> bool {
        !self.working_text.trim().is_empty()
    }

    /// Lint the working draft, caching the outcome until the text changes.
    pub fn validate_working_draft(&mut self) -> &LintOutcome {
        let text = &self.working_text;
        self.draft_lint.get_or_insert_with(|| lint_grammar(text))
    }

    /// Commit the working draft as a new root version.
    pub fn commit_working_draft(&mut self) -> Result<String, Vec<String>> {
        if !self.has_working_draft() {
            return Err(vec!["working draft is empty".to_string()]);
        }
        let text = self.working_text.clone();
        self.create_initial(&text, false)
    }

    fn fresh_id(&self) -> String {
        loop {
            let id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
            if !self.versions.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Minimal line diff: longest-common-subsequence walk emitting `- `/`+ `
/// lines. Quadratic, fine for grammar-sized documents.
fn line_diff(a: &str, b: &str) -> Vec<String> {
    let a_lines: Vec<&str> = a.lines().collect();
    let b_lines: Vec<&str> = b.lines().collect();
    let (n, m) = (a_lines.len(), b_lines.len());

    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a_lines[i] == b_lines[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut changes = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a_lines[i] == b_lines[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            changes.push(format!("- {}", a_lines[i]));
            i += 1;
        } else {
            changes.push(format!("+ {}", b_lines[j]));
            j += 1;
        }
    }
    changes.extend(a_lines[i..].iter().map(|line| format!("- {line}")));
    changes.extend(b_lines[j..].iter().map(|line| format!("+ {line}")));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_diff_marks_changes_in_order() {
        let a = "one\ntwo\nthree\n";
        let b = "one\n2\nthree\nfour\n";
        assert_eq!(line_diff(a, b), vec!["- two", "+ 2", "+ four"]);
    }

    #[test]
    fn line_diff_identical_is_empty() {
        assert!(line_diff("x\ny\n", "x\ny\n").is_empty());
    }
}
