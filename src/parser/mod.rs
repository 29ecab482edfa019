//! Parser for `.ft` feature files.
//!
//! Parsing happens in two layers:
//!
//! 1. [`parse`] turns raw bytes into a structural [`Document`]: feature
//!    header, optional background, and the ordered scenario definitions with
//!    their tags and line numbers. It never fails; unsupported constructs
//!    (`Scenario Outline:`, `Rule:`, `Examples:`) are reported as
//!    [`ParseError`]s and the rest of the file is still scanned.
//! 2. [`transform`] flattens that document into [`ParsedScenario`] records
//!    carrying the identity tag and the raw text span of each scenario.
//!
//! Doc strings (`"""`) and code fences are opaque: nothing inside them is
//! interpreted, so a feature file can quote another feature file.

pub mod ast;
pub mod extract;
pub mod token;

pub use ast::{Background, Document, Feature, FeatureHeader, ParseError, ScenarioDefinition, Step, Tag};
pub use extract::{ParsedFile, ParsedScenario, transform};
pub use token::{Fence, Keyword, LineToken, classify, parse_tags};

use std::path::Path;

/// Parse a feature file and return its document along with any parse errors.
pub fn parse(path: &str, content: &[u8]) -> (Document, Vec<ParseError>) {
    let text = String::from_utf8_lossy(content);
    let lines: Vec<&str> = text.split('\n').collect();

    let mut parser = Parser {
        lines: &lines,
        pos: 0,
        errors: Vec::new(),
    };
    let document = parser.parse_document(path);
    (document, parser.errors)
}

/// Parse and extract in one step.
pub fn parse_file(path: &str, content: &[u8]) -> ParsedFile {
    let (document, errors) = parse(path, content);
    transform(&document, content, errors)
}

/// Feature name derived from a path: the basename without its extension.
pub fn feature_name_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

struct Parser<'a> {
    lines: &'a [&'a str],
    pos: usize,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    fn token(&self, index: usize) -> LineToken<'a> {
        classify(self.lines[index])
    }

    fn at_end(&self) -> bool {
        self.pos >= self.lines.len()
    }

    fn parse_document(&mut self, path: &str) -> Document {
        let mut feature = Feature {
            header: self.parse_header(path),
            ..Default::default()
        };
        self.parse_body(&mut feature);
        Document { feature }
    }

    fn parse_header(&mut self, path: &str) -> FeatureHeader {
        while !self.at_end() && matches!(self.token(self.pos), LineToken::Blank | LineToken::Comment) {
            self.pos += 1;
        }

        let mut header = FeatureHeader::default();
        let tags_start = self.pos;
        while !self.at_end() {
            let LineToken::Tags(line) = self.token(self.pos) else {
                break;
            };
            header.tags.extend(parse_tags(line));
            self.pos += 1;
        }

        match (!self.at_end()).then(|| self.token(self.pos)) {
            Some(LineToken::Keyword(Keyword::Feature, title)) => {
                header.name = title.to_string();
                self.pos += 1;

                let start = self.pos;
                while !self.at_end()
                    && !matches!(self.token(self.pos), LineToken::Keyword(..) | LineToken::Tags(_))
                {
                    self.pos += 1;
                }
                let mut end = self.pos;
                while end > start && self.lines[end - 1].trim().is_empty() {
                    end -= 1;
                }
                if end > start {
                    header.description = Some(self.lines[start..end].join("\n"));
                }
            }
            _ => {
                // Without a Feature line, leading tags belong to the first block.
                self.pos = tags_start;
                header.tags.clear();
                header.name = feature_name_from_path(path);
            }
        }

        header
    }

    fn parse_body(&mut self, feature: &mut Feature) {
        let mut pending_tags: Vec<Tag> = Vec::new();

        while !self.at_end() {
            match self.token(self.pos) {
                LineToken::Fence(fence) => self.pos = self.skip_fence(self.pos, fence),
                LineToken::Tags(line) => {
                    pending_tags.extend(parse_tags(line));
                    self.pos += 1;
                }
                LineToken::Keyword(Keyword::Background, title) => {
                    pending_tags.clear();
                    let line = self.pos + 1;
                    self.pos += 1;
                    let steps = self.consume_block();
                    feature.background = Some(Background {
                        name: title.to_string(),
                        line,
                        steps,
                    });
                }
                LineToken::Keyword(Keyword::Scenario, title) => {
                    let line = self.pos + 1;
                    self.pos += 1;
                    let steps = self.consume_scenario_body();
                    feature.scenarios.push(ScenarioDefinition {
                        tags: std::mem::take(&mut pending_tags),
                        name: title.to_string(),
                        line,
                        steps,
                    });
                }
                LineToken::Keyword(keyword, _) => {
                    let line = self.pos + 1;
                    self.pos += 1;
                    if let Some(message) = keyword.unsupported() {
                        self.errors.push(ParseError::new(line, message));
                        pending_tags.clear();
                        self.consume_block();
                    }
                }
                LineToken::Blank | LineToken::Comment | LineToken::Step(..) | LineToken::Text => {
                    self.pos += 1;
                }
            }
        }
    }

    /// Advance past a background or rejected block: stops at the next
    /// keyword or tag line.
    fn consume_block(&mut self) -> Vec<Step> {
        let mut steps = Vec::new();
        while !self.at_end() {
            match self.token(self.pos) {
                LineToken::Fence(fence) => self.pos = self.skip_fence(self.pos, fence),
                LineToken::Keyword(..) | LineToken::Tags(_) => break,
                LineToken::Step(keyword, text) => {
                    steps.push(self.step(keyword, text));
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }
        steps
    }

    /// Advance past a scenario body. Tag lines only end the body when they
    /// lead into another block; otherwise they are plain content.
    fn consume_scenario_body(&mut self) -> Vec<Step> {
        let mut steps = Vec::new();
        while !self.at_end() {
            match self.token(self.pos) {
                LineToken::Fence(fence) => self.pos = self.skip_fence(self.pos, fence),
                LineToken::Keyword(keyword, _) if keyword.ends_scenario() => break,
                LineToken::Tags(_) if self.tag_precedes_keyword(self.pos) => break,
                LineToken::Step(keyword, text) => {
                    steps.push(self.step(keyword, text));
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }
        steps
    }

    fn step(&self, keyword: &str, text: &str) -> Step {
        Step {
            keyword: keyword.to_string(),
            text: text.to_string(),
            line: self.pos + 1,
        }
    }

    /// Look past blanks, comments and further tag lines to see whether the
    /// tag line at `index` belongs to a following block.
    fn tag_precedes_keyword(&self, index: usize) -> bool {
        for line in &self.lines[index + 1..] {
            match classify(line) {
                LineToken::Blank | LineToken::Comment | LineToken::Tags(_) => continue,
                LineToken::Keyword(keyword, _) => return keyword.ends_scenario(),
                _ => return false,
            }
        }
        false
    }

    /// Index of the line after the closing delimiter, or the end of input
    /// when the block is never closed.
    fn skip_fence(&self, open: usize, fence: Fence) -> usize {
        let delimiter = fence.delimiter();
        (open + 1..self.lines.len())
            .find(|&i| self.lines[i].trim() == delimiter)
            .map_or(self.lines.len(), |close| close + 1)
    }
}
