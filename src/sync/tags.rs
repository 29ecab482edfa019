//! Writing identity tags and parse-error annotations back into feature files.
//!
//! All edits are computed on an immutable line array by pure functions and
//! only then written to disk, atomically and only when the text changed.

use crate::models::format_tag;
use crate::parser::ParseError;
use crate::{Error, Result};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use tempfile::NamedTempFile;
use tracing::debug;

static ID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@id:\d+$").expect("valid id tag pattern"));

/// Prefix of the comment lines describing parse errors.
pub const ERROR_PREFIX: &str = "# error: ";

/// Request to write `@id:<id>` directly above the `Scenario:` on `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInsertion {
    /// 1-based line of the `Scenario:` keyword
    pub line: usize,
    pub id: i64,
}

impl TagInsertion {
    pub fn new(line: usize, id: i64) -> Self {
        Self { line, id }
    }
}

/// A single edit against a line array (0-based indices).
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinePatch {
    ReplaceAt(usize, String),
    InsertBefore(usize, String),
}

impl LinePatch {
    fn apply(&self, lines: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(lines.len() + 1);
        match self {
            LinePatch::ReplaceAt(index, line) => {
                out.extend_from_slice(&lines[..*index]);
                out.push(line.clone());
                out.extend_from_slice(&lines[index + 1..]);
            }
            LinePatch::InsertBefore(index, line) => {
                out.extend_from_slice(&lines[..*index]);
                out.push(line.clone());
                out.extend_from_slice(&lines[*index..]);
            }
        }
        out
    }
}

fn leading_whitespace(line: &str) -> &str {
    let end = line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(line.len());
    &line[..end]
}

/// A line made only of `@tags`.
fn is_tag_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace().peekable();
    tokens.peek().is_some() && tokens.all(|token| token.starts_with('@'))
}

/// Patches writing the tag for `insertion`, in application order.
///
/// An old `@id:` directly above the scenario is dropped. When it shares its
/// line with other tags, those stay on that line and the new tag goes below.
fn patches_for(lines: &[String], insertion: TagInsertion) -> Vec<LinePatch> {
    let Some(index) = insertion.line.checked_sub(1) else {
        return Vec::new();
    };
    let Some(scenario_line) = lines.get(index) else {
        return Vec::new();
    };
    let tag_line = format!(
        "{}{}",
        leading_whitespace(scenario_line),
        format_tag(insertion.id)
    );

    let above = index.checked_sub(1).map(|i| lines[i].as_str());
    let Some(above) = above.filter(|line| is_tag_line(line)) else {
        return vec![LinePatch::InsertBefore(index, tag_line)];
    };
    let (ids, others): (Vec<&str>, Vec<&str>) = above
        .split_whitespace()
        .partition(|token| ID_TOKEN.is_match(token));

    if ids.is_empty() {
        vec![LinePatch::InsertBefore(index, tag_line)]
    } else if others.is_empty() {
        vec![LinePatch::ReplaceAt(index - 1, tag_line)]
    } else {
        let kept = format!("{}{}", leading_whitespace(above), others.join(" "));
        vec![
            LinePatch::ReplaceAt(index - 1, kept),
            LinePatch::InsertBefore(index, tag_line),
        ]
    }
}

/// Apply tag insertions to `text`, bottom to top so earlier line numbers
/// stay valid. Lines outside the text are ignored.
pub fn apply_tags(text: &str, insertions: &[TagInsertion]) -> String {
    let mut ordered = insertions.to_vec();
    ordered.sort_by(|a, b| b.line.cmp(&a.line));

    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    for insertion in ordered {
        for patch in patches_for(&lines, insertion) {
            lines = patch.apply(&lines);
        }
    }
    lines.join("\n")
}

/// Text with any leading block of `# error: ` lines removed.
pub fn strip_error_annotation(text: &str) -> &str {
    let mut rest = text;
    while rest.starts_with(ERROR_PREFIX) {
        rest = match rest.find('\n') {
            Some(end) => &rest[end + 1..],
            None => "",
        };
    }
    rest
}

/// Prepend one `# error: <message> (line <n>)` line per error to `body`.
///
/// `body` must already be free of a previous annotation block so that line
/// numbers refer to the file without annotations.
pub fn annotate_errors(body: &str, errors: &[ParseError]) -> String {
    let mut out = String::new();
    for error in errors {
        out.push_str(ERROR_PREFIX);
        out.push_str(&error.to_string());
        out.push('\n');
    }
    out.push_str(body);
    out
}

/// Read `path`, apply tag insertions and write it back if anything changed.
/// Returns whether the file was rewritten.
pub fn write_tags(path: &Path, insertions: &[TagInsertion]) -> Result<bool> {
    if insertions.is_empty() {
        return Ok(false);
    }
    let original = fs::read_to_string(path).map_err(|e| Error::file_op(path, e))?;
    let updated = apply_tags(&original, insertions);
    write_if_changed(path, &original, &updated)
}

/// Atomically replace `path` with `updated` unless it equals `original`.
pub fn write_if_changed(path: &Path, original: &str, updated: &str) -> Result<bool> {
    if original == updated {
        return Ok(false);
    }
    write_atomic(path, updated)?;
    debug!(path = %path.display(), "rewrote feature file");
    Ok(true)
}

/// Write through a temporary file in the same directory, then rename over
/// the target so readers never observe a partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::file_op(path, e))?;
    temp.write_all(contents.as_bytes())
        .map_err(|e| Error::file_op(path, e))?;
    temp.persist(path).map_err(|e| Error::file_op(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insert_tag_copies_indentation() {
        let text = "Feature: Login\n\n  Scenario: User logs in\n    Given a user\n";
        let result = apply_tags(text, &[TagInsertion::new(3, 1)]);
        assert_eq!(
            result,
            "Feature: Login\n\n  @id:1\n  Scenario: User logs in\n    Given a user\n"
        );
    }

    #[test]
    fn test_replace_existing_tag_line() {
        let text = "Feature: Login\n\t@id:99\n\tScenario: A\n";
        let result = apply_tags(text, &[TagInsertion::new(3, 4)]);
        assert_eq!(result, "Feature: Login\n\t@id:4\n\tScenario: A\n");
    }

    #[test]
    fn test_other_tags_above_are_kept() {
        let text = "Feature: Login\n  @smoke\n  Scenario: A\n";
        let result = apply_tags(text, &[TagInsertion::new(3, 2)]);
        assert_eq!(result, "Feature: Login\n  @smoke\n  @id:2\n  Scenario: A\n");
    }

    #[test]
    fn test_stale_id_is_dropped_from_mixed_tag_line() {
        let text = "Feature: Login\n  @smoke @id:99\n  Scenario: A\n";
        let result = apply_tags(text, &[TagInsertion::new(3, 1)]);
        assert_eq!(result, "Feature: Login\n  @smoke\n  @id:1\n  Scenario: A\n");

        let text = "Feature: Login\n  @id:7 @id:8\n  Scenario: A\n";
        let result = apply_tags(text, &[TagInsertion::new(3, 1)]);
        assert_eq!(result, "Feature: Login\n  @id:1\n  Scenario: A\n");
    }

    #[test]
    fn test_mixed_tag_lines_bottom_up() {
        let text = "Feature: F\n  @a @id:5\n  Scenario: A\n  @b @id:6 @c\n  Scenario: B\n";
        let result = apply_tags(text, &[TagInsertion::new(3, 1), TagInsertion::new(5, 2)]);
        assert_eq!(
            result,
            "Feature: F\n  @a\n  @id:1\n  Scenario: A\n  @b @c\n  @id:2\n  Scenario: B\n"
        );
    }

    #[test]
    fn test_tag_line_detection() {
        assert!(is_tag_line("  @smoke @id:3"));
        assert!(!is_tag_line(""));
        assert!(!is_tag_line("  # @id:3"));
        assert!(!is_tag_line("    Given @id:3 exists"));
    }

    #[test]
    fn test_multiple_insertions_bottom_up() {
        let text = "Feature: F\n  Scenario: A\n    Given a\n  Scenario: B\n    Given b";
        let result = apply_tags(text, &[TagInsertion::new(2, 1), TagInsertion::new(4, 2)]);
        assert_eq!(
            result,
            "Feature: F\n  @id:1\n  Scenario: A\n    Given a\n  @id:2\n  Scenario: B\n    Given b"
        );
    }

    #[test]
    fn test_out_of_range_insertions_are_ignored() {
        let text = "Feature: F\n";
        assert_eq!(apply_tags(text, &[TagInsertion::new(0, 1)]), text);
        assert_eq!(apply_tags(text, &[TagInsertion::new(40, 1)]), text);
    }

    #[test]
    fn test_annotation_round_trip() {
        let body = "Feature: F\n  Rule: r\n";
        let errors = vec![ParseError::new(2, "Rule is not supported")];
        let annotated = annotate_errors(body, &errors);
        assert_eq!(
            annotated,
            "# error: Rule is not supported (line 2)\nFeature: F\n  Rule: r\n"
        );
        assert_eq!(strip_error_annotation(&annotated), body);
        assert_eq!(
            annotate_errors(strip_error_annotation(&annotated), &errors),
            annotated
        );
    }

    #[test]
    fn test_strip_leaves_other_comments() {
        let text = "# a note\n# error: x (line 1)\nFeature: F";
        assert_eq!(strip_error_annotation(text), text);
        assert_eq!(strip_error_annotation("# error: only"), "");
    }

    #[test]
    fn test_write_tags_only_when_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("login.ft");
        fs::write(&path, "Feature: F\n  @id:1\n  Scenario: A\n").unwrap();

        assert!(!write_tags(&path, &[TagInsertion::new(3, 1)]).unwrap());
        assert!(write_tags(&path, &[TagInsertion::new(3, 2)]).unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Feature: F\n  @id:2\n  Scenario: A\n"
        );

        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
