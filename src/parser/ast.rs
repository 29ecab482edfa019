//! Structural document produced by the feature parser.

use serde::{Deserialize, Serialize};

/// A parsed feature file.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub feature: Feature,
}

/// The single feature block of a file.
#[derive(Debug, Clone, Default)]
pub struct Feature {
    pub header: FeatureHeader,
    pub background: Option<Background>,
    pub scenarios: Vec<ScenarioDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureHeader {
    pub tags: Vec<Tag>,

    /// Title from the `Feature:` line, or the file stem when there is none
    pub name: String,

    /// Raw description lines following the `Feature:` line
    pub description: Option<String>,
}

/// Shared setup steps; never carries tags.
#[derive(Debug, Clone, Default)]
pub struct Background {
    pub name: String,

    /// 1-based line of the `Background:` keyword
    pub line: usize,

    pub steps: Vec<Step>,
}

/// A `Scenario:` block together with the tags directly preceding it.
#[derive(Debug, Clone, Default)]
pub struct ScenarioDefinition {
    pub tags: Vec<Tag>,
    pub name: String,

    /// 1-based line of the `Scenario:` keyword
    pub line: usize,

    pub steps: Vec<Step>,
}

/// A tag such as `@smoke` or `@id:42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A single `Given`/`When`/`Then`/`And`/`But`/`*` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub keyword: String,
    pub text: String,
    pub line: usize,
}

/// An unsupported construct, reported with its 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}
