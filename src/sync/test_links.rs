//! Discovery of test functions that reference scenario identities.
//!
//! A test is linked to a scenario when a comment containing `@id:<n>` sits
//! directly above the start of the test, blank lines allowed in between:
//!
//! ```text
//! // @id:3 user logs in
//! #[test]
//! fn logs_in() { ... }
//! ```
//!
//! Consecutive line comments form one comment, so the marker may sit on any
//! of them. Comments are found with a small per-language tokenizer so that
//! markers inside string literals are never picked up.

use super::{SyncOptions, relative_path};
use crate::models::TestLink;
use crate::storage::Storage;
use crate::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@id:(\d+)").expect("valid marker pattern"));

/// An identity marker found inside a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedComment {
    pub id: i64,

    /// 1-based line of the marker
    pub line: usize,

    /// 1-based last line of the enclosing comment
    pub end_line: usize,
}

/// Per-language knowledge needed to link tests to scenarios.
pub trait TestDialect {
    /// Name used in configuration (`test-dialects`).
    fn name(&self) -> &'static str;

    /// Whether a file should be scanned with this dialect.
    fn accepts(&self, path: &Path) -> bool;

    /// Every identity marker found in a comment of `source`.
    fn tagged_comments(&self, source: &str) -> Vec<TaggedComment>;

    /// Whether `line` begins a test definition.
    fn starts_test(&self, line: &str) -> bool;

    /// Name of the test following the comment ending on `comment_end_line`.
    fn test_name(&self, source: &str, comment_end_line: usize) -> Option<String>;
}

/// Rust sources: `#[test]`-style attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustDialect;

impl TestDialect for RustDialect {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "rs")
    }

    fn tagged_comments(&self, source: &str) -> Vec<TaggedComment> {
        tagged_comments(
            source,
            Syntax {
                nested_blocks: true,
                rust_literals: true,
            },
        )
    }

    /// An attribute whose last path segment ends in `test`, such as
    /// `#[test]` or `#[tokio::test(flavor = "multi_thread")]`.
    fn starts_test(&self, line: &str) -> bool {
        let Some(attr) = line.trim_start().strip_prefix("#[") else {
            return false;
        };
        let path = attr
            .split(|c: char| c == '(' || c == ']' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        path.rsplit("::")
            .next()
            .is_some_and(|segment| segment.ends_with("test"))
    }

    fn test_name(&self, source: &str, comment_end_line: usize) -> Option<String> {
        let line = source
            .lines()
            .skip(comment_end_line)
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("#[") && !is_comment_line(line))?;

        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if word == "fn" {
                let name = words.next()?;
                let name = name.split(['(', '<']).next().unwrap_or_default();
                return (!name.is_empty()).then(|| name.to_string());
            }
        }
        None
    }
}

/// Go sources: `func TestXxx` in `_test.go` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoDialect;

impl TestDialect for GoDialect {
    fn name(&self) -> &'static str {
        "go"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with("_test.go"))
    }

    fn tagged_comments(&self, source: &str) -> Vec<TaggedComment> {
        tagged_comments(
            source,
            Syntax {
                nested_blocks: false,
                rust_literals: false,
            },
        )
    }

    fn starts_test(&self, line: &str) -> bool {
        line.trim_start().starts_with("func Test")
    }

    fn test_name(&self, source: &str, comment_end_line: usize) -> Option<String> {
        let line = source
            .lines()
            .skip(comment_end_line)
            .map(str::trim)
            .find(|line| !line.is_empty() && !is_comment_line(line))?;
        let name = line.strip_prefix("func ")?;
        let name = name.split('(').next().unwrap_or_default().trim();
        name.starts_with("Test").then(|| name.to_string())
    }
}

/// Look up a dialect by its configuration name.
pub fn dialect(name: &str) -> Option<Box<dyn TestDialect>> {
    match name {
        "rust" => Some(Box::new(RustDialect)),
        "go" => Some(Box::new(GoDialect)),
        _ => None,
    }
}

/// Resolve configured dialect names.
pub fn dialects(names: &[String]) -> Result<Vec<Box<dyn TestDialect>>> {
    names
        .iter()
        .map(|name| {
            dialect(name).ok_or_else(|| Error::Config(format!("unknown test dialect: {}", name)))
        })
        .collect()
}

/// Links declared in one source file.
pub fn scan_source(dialect: &dyn TestDialect, path: &str, source: &str) -> Vec<TestLink> {
    let lines: Vec<&str> = source.lines().collect();
    dialect
        .tagged_comments(source)
        .into_iter()
        .filter(|comment| {
            lines
                .iter()
                .skip(comment.end_line)
                .find(|line| !line.trim().is_empty())
                .is_some_and(|line| dialect.starts_test(line))
        })
        .map(|comment| TestLink {
            scenario_id: comment.id,
            file_path: path.to_string(),
            line_number: comment.line,
        })
        .collect()
}

/// Walk the project and collect links from every file a dialect accepts.
pub fn scan_tree(options: &SyncOptions) -> Result<Vec<TestLink>> {
    let dialects = dialects(&options.dialects)?;
    let features = options.features_path();
    let mut links = Vec::new();

    let walker = WalkDir::new(&options.root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry, &features, &options.ignore_dirs));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(dialect) = dialects.iter().find(|d| d.accepts(entry.path())) else {
            continue;
        };

        let bytes = fs::read(entry.path()).map_err(|e| Error::file_op(entry.path(), e))?;
        let source = String::from_utf8_lossy(&bytes);
        let path = relative_path(&options.root, entry.path());
        let found = scan_source(dialect.as_ref(), &path, &source);
        if !found.is_empty() {
            debug!(path = %path, dialect = dialect.name(), links = found.len(), "found test links");
        }
        links.extend(found);
    }

    Ok(links)
}

/// Rescan the project and replace all stored links. Returns the number of
/// links kept after dropping those pointing at unknown scenarios.
pub fn sync_test_links(storage: &mut Storage, options: &SyncOptions) -> Result<usize> {
    let links = scan_tree(options)?;
    let found = links.len();
    let stored = storage.replace_test_links(&links)?;
    if stored < found {
        info!(dropped = found - stored, "dropped links to unknown scenarios");
    }
    Ok(stored)
}

/// Name of the test a stored link points at, if it can still be resolved.
pub fn resolve_test_name(options: &SyncOptions, link: &TestLink) -> Result<Option<String>> {
    let dialects = dialects(&options.dialects)?;
    let path = options.root.join(&link.file_path);
    let Some(dialect) = dialects.iter().find(|d| d.accepts(&path)) else {
        return Ok(None);
    };
    let Ok(bytes) = fs::read(&path) else {
        return Ok(None);
    };
    let source = String::from_utf8_lossy(&bytes);
    Ok(dialect.test_name(&source, link.line_number))
}

fn is_skipped_dir(entry: &DirEntry, features: &Path, ignore_dirs: &[String]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == ".git" || entry.path() == features || ignore_dirs.iter().any(|dir| *dir == name)
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with("//") || line.starts_with("/*") || line.starts_with('*')
}

// === Comment tokenizer ===

#[derive(Debug, Clone, Copy)]
struct Syntax {
    /// `/* /* */ */` nests
    nested_blocks: bool,

    /// Raw strings `r#"..."#`, char literals vs lifetimes; otherwise Go
    /// backtick strings and runes
    rust_literals: bool,
}

/// Byte span of a comment.
#[derive(Debug, Clone, Copy)]
struct Comment {
    start: usize,
    end: usize,
    line_comment: bool,
}

fn tagged_comments(source: &str, syntax: Syntax) -> Vec<TaggedComment> {
    let starts = line_starts(source);
    let mut tagged = Vec::new();

    for group in group_line_comments(source, &comments(source, syntax)) {
        let Some(last) = group.last() else {
            continue;
        };
        let end_line = line_of(&starts, last.end.saturating_sub(1));
        for comment in &group {
            let text = &source[comment.start..comment.end];
            for captures in MARKER.captures_iter(text) {
                let (Some(whole), Some(digits)) = (captures.get(0), captures.get(1)) else {
                    continue;
                };
                let Ok(id) = digits.as_str().parse::<i64>() else {
                    continue;
                };
                tagged.push(TaggedComment {
                    id,
                    line: line_of(&starts, comment.start + whole.start()),
                    end_line,
                });
            }
        }
    }

    tagged
}

/// Merge runs of line comments on consecutive lines.
fn group_line_comments(source: &str, comments: &[Comment]) -> Vec<Vec<Comment>> {
    let mut groups: Vec<Vec<Comment>> = Vec::new();
    for comment in comments {
        let continues = groups.last().and_then(|g| g.last()).is_some_and(|prev| {
            let between = &source[prev.end..comment.start];
            prev.line_comment
                && comment.line_comment
                && between.trim().is_empty()
                && between.matches('\n').count() == 1
        });
        match groups.last_mut() {
            Some(group) if continues => group.push(*comment),
            _ => groups.push(vec![*comment]),
        }
    }
    groups
}

fn comments(source: &str, syntax: Syntax) -> Vec<Comment> {
    let bytes = source.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        match bytes[i] {
            b'/' if next == Some(b'/') => {
                let end = source[i..].find('\n').map_or(bytes.len(), |n| i + n);
                found.push(Comment {
                    start: i,
                    end,
                    line_comment: true,
                });
                i = end;
            }
            b'/' if next == Some(b'*') => {
                let end = block_comment_end(bytes, i + 2, syntax.nested_blocks);
                found.push(Comment {
                    start: i,
                    end,
                    line_comment: false,
                });
                i = end;
            }
            b'"' => i = quoted_end(bytes, i + 1, b'"'),
            b'`' if !syntax.rust_literals => {
                i = bytes[i + 1..]
                    .iter()
                    .position(|&b| b == b'`')
                    .map_or(bytes.len(), |n| i + n + 2);
            }
            b'\'' if syntax.rust_literals => i = rust_char_end(source, i),
            b'\'' => i = quoted_end(bytes, i + 1, b'\''),
            b'r' | b'b'
                if syntax.rust_literals && (i == 0 || !is_ident_byte(bytes[i - 1])) =>
            {
                i = raw_string_end(bytes, i).unwrap_or(i + 1);
            }
            _ => i += 1,
        }
    }

    found
}

fn block_comment_end(bytes: &[u8], mut i: usize, nested: bool) -> usize {
    let mut depth = 1;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            (b'/', b'*') if nested => {
                depth += 1;
                i += 2;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// End of a quoted literal whose body starts at `i`, honouring escapes.
fn quoted_end(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Skip a char literal starting at `i`, or just the quote of a lifetime.
fn rust_char_end(source: &str, i: usize) -> usize {
    let bytes = source.as_bytes();
    if bytes.get(i + 1) == Some(&b'\\') {
        return quoted_end(bytes, i + 1, b'\'');
    }
    match source[i + 1..].chars().next() {
        Some(c) if bytes.get(i + 1 + c.len_utf8()) == Some(&b'\'') => i + c.len_utf8() + 2,
        _ => i + 1,
    }
}

/// End of a raw string (`r"..."`, `br#"..."#`) starting at `i`, if one does.
fn raw_string_end(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i;
    if bytes[j] == b'b' {
        j += 1;
    }
    if bytes.get(j) != Some(&b'r') {
        return None;
    }
    j += 1;
    let hashes = bytes[j..].iter().take_while(|&&b| b == b'#').count();
    j += hashes;
    if bytes.get(j) != Some(&b'"') {
        return None;
    }
    j += 1;

    while j < bytes.len() {
        if bytes[j] == b'"'
            && bytes[j + 1..].iter().take(hashes).filter(|&&b| b == b'#').count() == hashes
        {
            return Some(j + 1 + hashes);
        }
        j += 1;
    }
    Some(bytes.len())
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// 1-based line containing byte `offset`.
fn line_of(starts: &[usize], offset: usize) -> usize {
    starts.partition_point(|&start| start <= offset)
}
