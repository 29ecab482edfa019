//! Line classification for feature files.
//!
//! Every source line maps to exactly one [`LineToken`]; the parser state
//! machine only ever looks at tokens, never at raw prefixes.

use super::ast::Tag;

/// Block-opening keywords recognised at the start of a trimmed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Feature,
    Background,
    Scenario,
    ScenarioOutline,
    Rule,
    Examples,
}

impl Keyword {
    const ALL: [Keyword; 6] = [
        Keyword::Feature,
        Keyword::Background,
        Keyword::ScenarioOutline,
        Keyword::Scenario,
        Keyword::Rule,
        Keyword::Examples,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Keyword::Feature => "Feature:",
            Keyword::Background => "Background:",
            Keyword::Scenario => "Scenario:",
            Keyword::ScenarioOutline => "Scenario Outline:",
            Keyword::Rule => "Rule:",
            Keyword::Examples => "Examples:",
        }
    }

    /// Error message for keywords that are rejected rather than parsed.
    pub fn unsupported(self) -> Option<&'static str> {
        match self {
            Keyword::ScenarioOutline => Some("Scenario Outline is not supported"),
            Keyword::Rule => Some("Rule is not supported"),
            Keyword::Examples => Some("Examples is not supported"),
            _ => None,
        }
    }

    /// Whether this keyword terminates the body of a preceding scenario.
    pub fn ends_scenario(self) -> bool {
        !matches!(self, Keyword::Feature)
    }
}

/// Opaque block delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fence {
    /// `"""`
    DocString,
    /// Triple backtick
    CodeBlock,
}

impl Fence {
    pub fn delimiter(self) -> &'static str {
        match self {
            Fence::DocString => "\"\"\"",
            Fence::CodeBlock => "```",
        }
    }
}

const STEP_KEYWORDS: [&str; 6] = ["Given", "When", "Then", "And", "But", "*"];

/// Classification of a single source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineToken<'a> {
    Blank,
    Comment,
    /// A line starting with `@`; holds the trimmed line
    Tags(&'a str),
    Fence(Fence),
    /// Keyword plus the trimmed remainder of the line (the title)
    Keyword(Keyword, &'a str),
    /// Step keyword plus step text
    Step(&'static str, &'a str),
    Text,
}

/// Classify one line of a feature file.
pub fn classify(line: &str) -> LineToken<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineToken::Blank;
    }
    if trimmed.starts_with(Fence::DocString.delimiter()) {
        return LineToken::Fence(Fence::DocString);
    }
    if trimmed.starts_with(Fence::CodeBlock.delimiter()) {
        return LineToken::Fence(Fence::CodeBlock);
    }
    if trimmed.starts_with('#') {
        return LineToken::Comment;
    }
    if trimmed.starts_with('@') {
        return LineToken::Tags(trimmed);
    }
    for keyword in Keyword::ALL {
        if let Some(rest) = trimmed.strip_prefix(keyword.prefix()) {
            return LineToken::Keyword(keyword, rest.trim());
        }
    }
    for step in STEP_KEYWORDS {
        if let Some(rest) = trimmed.strip_prefix(step)
            && (rest.is_empty() || rest.starts_with(char::is_whitespace))
        {
            return LineToken::Step(step, rest.trim());
        }
    }
    LineToken::Text
}

/// Split a tag line into tags: every `@` followed by a run of characters
/// that are neither whitespace nor `@`.
pub fn parse_tags(line: &str) -> Vec<Tag> {
    line.split_whitespace()
        .flat_map(|word| word.split('@').skip(1))
        .filter(|name| !name.is_empty())
        .map(|name| Tag::new(format!("@{}", name)))
        .collect()
}
