//! Flattening of a parsed [`Document`] into per-scenario records.

use super::ast::{Document, ParseError};
use super::token::{Keyword, LineToken, classify};
use crate::models::TAG_PREFIX;

/// Scenario records extracted from one feature file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    /// Feature name
    pub name: String,
    pub scenarios: Vec<ParsedScenario>,

    /// Raw text of the `Background:` block, if any
    pub background: Option<String>,

    pub errors: Vec<ParseError>,
}

impl ParsedFile {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Find the scenario whose identity tag carries `id`.
    pub fn scenario_by_id(&self, id: i64) -> Option<&ParsedScenario> {
        self.scenarios.iter().find(|s| s.tagged_id() == Some(id))
    }
}

/// A single scenario as found in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScenario {
    /// Title from the `Scenario:` line
    pub name: String,

    /// Value of the identity tag (`@id:<value>`), exactly as written
    pub id_tag: Option<String>,

    /// All other tags, in order
    pub other_tags: Vec<String>,

    /// Source text from the `Scenario:` line to the end of the scenario
    pub content: String,

    /// 1-based line of the `Scenario:` keyword
    pub line: usize,
}

impl ParsedScenario {
    /// The identity tag as a number; `None` when absent or not numeric.
    pub fn tagged_id(&self) -> Option<i64> {
        self.id_tag.as_deref()?.parse().ok()
    }
}

/// Extract per-scenario records from a parsed document.
pub fn transform(document: &Document, content: &[u8], errors: Vec<ParseError>) -> ParsedFile {
    let text = String::from_utf8_lossy(content);
    let lines: Vec<&str> = text.split('\n').collect();
    let feature = &document.feature;

    // Lines where a following block starts; a scenario's span never crosses one.
    let mut boundaries: Vec<usize> = feature.scenarios.iter().map(|s| s.line).collect();
    if let Some(background) = &feature.background {
        boundaries.push(background.line);
    }

    let scenarios = feature
        .scenarios
        .iter()
        .map(|definition| {
            let mut id_tag = None;
            let mut other_tags = Vec::new();
            for tag in &definition.tags {
                match tag.name.strip_prefix(TAG_PREFIX) {
                    Some(value) => id_tag = Some(value.to_string()),
                    None => other_tags.push(tag.name.clone()),
                }
            }

            let start = definition.line - 1;
            let next = boundaries
                .iter()
                .copied()
                .filter(|&line| line > definition.line)
                .min();
            let end = span_end(&lines, start, next);

            ParsedScenario {
                name: definition.name.clone(),
                id_tag,
                other_tags,
                content: lines[start..end].join("\n"),
                line: definition.line,
            }
        })
        .collect();

    let background = feature
        .background
        .as_ref()
        .map(|background| background_text(&lines, background.line - 1));

    ParsedFile {
        name: feature.header.name.clone(),
        scenarios,
        background,
        errors,
    }
}

/// Exclusive 0-based end of a scenario starting at `start`. `next_line` is
/// the 1-based line of the following block; the leading tags, comments and
/// blanks of that block are excluded, as are trailing blank lines.
fn span_end(lines: &[&str], start: usize, next_line: Option<usize>) -> usize {
    let mut end = match next_line {
        Some(line) => {
            let mut end = line - 1;
            while end > start
                && matches!(
                    classify(lines[end - 1]),
                    LineToken::Blank | LineToken::Comment | LineToken::Tags(_)
                )
            {
                end -= 1;
            }
            end
        }
        None => lines.len(),
    };
    while end > start && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    end.max((start + 1).min(lines.len()))
}

/// Text of the background block up to the next scenario-level keyword or
/// tag line.
fn background_text(lines: &[&str], start: usize) -> String {
    let mut end = start + 1;
    while end < lines.len() {
        match classify(lines[end]) {
            LineToken::Tags(_) => break,
            LineToken::Keyword(keyword, _) if keyword != Keyword::Feature && keyword != Keyword::Background => {
                break;
            }
            _ => end += 1,
        }
    }
    while end > start + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    lines[start..end.min(lines.len())].join("\n")
}
