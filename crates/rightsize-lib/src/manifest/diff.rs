//! Unified diffs of manifest edits for review before writing

use similar::TextDiff;

/// Lines of unchanged context around each change
pub const DIFF_CONTEXT: usize = 3;

/// Unified diff of `original` against `updated`, labelled with `path`
pub fn generate_diff(path: &str, original: &str, updated: &str) -> String {
    let diff = TextDiff::from_lines(original, updated);
    diff.unified_diff()
        .context_radius(DIFF_CONTEXT)
        .header(path, &format!("{path} (updated)"))
        .to_string()
}
