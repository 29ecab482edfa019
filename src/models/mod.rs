//! Data models for ft entities.
//!
//! This module defines the core data structures:
//! - `FeatureFile` - A tracked feature file (soft-deleted when it vanishes)
//! - `Scenario` - A scenario with its permanent numeric identity
//! - `StatusEvent` - Append-only status history of a scenario
//! - `TestLink` - Association between a scenario and a test function
//! - `SyncReport` - What a synchronization pass did, per file and scenario

use crate::parser::ParseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the identity tag written above every `Scenario:` line.
pub const TAG_PREFIX: &str = "@id:";

/// Status appended when a scenario with history disappears from its file.
pub const STATUS_REMOVED: &str = "removed";

/// Status appended when a removed scenario reappears.
pub const STATUS_RESTORED: &str = "restored";

/// Status appended when the steps of a scenario with history change.
pub const STATUS_MODIFIED: &str = "modified";

/// Current status of a scenario without any status events.
pub const STATUS_NO_ACTIVITY: &str = "no-activity";

/// Render the identity tag for a scenario ID (e.g. `@id:42`).
pub fn format_tag(id: i64) -> String {
    format!("{}{}", TAG_PREFIX, id)
}

/// A feature file registered in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFile {
    /// Row ID
    pub id: i64,

    /// Path relative to the project root, `/`-separated (e.g. "fts/login.ft")
    pub path: String,

    /// Set when the file disappeared from disk
    pub deleted: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// A scenario tracked by ft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Permanent identity, written into the feature file as `@id:<id>`
    pub id: i64,

    /// Owning file
    pub file_id: i64,

    /// Scenario title from the `Scenario:` line
    pub name: String,

    /// Last known scenario text (header line plus steps)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// One entry in a scenario's status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: i64,
    pub scenario_id: i64,
    pub status: String,
    pub changed_at: DateTime<Utc>,
}

/// A test function annotated with a scenario identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLink {
    pub scenario_id: i64,

    /// Path relative to the project root
    pub file_path: String,

    /// 1-based line of the comment carrying the identity marker
    pub line_number: usize,
}

/// What reconciliation decided for a single scenario.
///
/// `new`, `modified`, `unchanged` and `removed` are the core outcomes.
/// `restored` extends them: it is only reported for a tag-matched scenario
/// whose latest status was `removed` and whose name and steps did not
/// change. Consumers that only know the core set can treat it as
/// `unchanged`; the `restored` status event is recorded either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    New,
    Modified,
    Unchanged,
    Removed,
    /// A removed scenario reappeared under its tag with unchanged steps.
    /// Not part of the core outcome set; see the type docs.
    Restored,
}

impl ActionKind {
    /// Whether this action changes the file's classification to modified.
    pub fn is_activity(self) -> bool {
        !matches!(self, ActionKind::Unchanged)
    }

    /// One-character marker used in human output.
    pub fn marker(self) -> char {
        match self {
            ActionKind::New | ActionKind::Restored => '+',
            ActionKind::Modified => '~',
            ActionKind::Removed => '-',
            ActionKind::Unchanged => ' ',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::New => "new",
            ActionKind::Modified => "modified",
            ActionKind::Unchanged => "unchanged",
            ActionKind::Removed => "removed",
            ActionKind::Restored => "restored",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reconciliation decision for one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioAction {
    pub kind: ActionKind,
    pub id: i64,
    pub name: String,
}

impl ScenarioAction {
    pub fn new(kind: ActionKind, id: i64, name: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            name: name.into(),
        }
    }
}

/// Classification of a feature file after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Seen for the first time
    New,
    /// Tracked and unchanged
    Tracked,
    /// Tracked with at least one scenario change
    Modified,
    /// Parse errors; scenarios were not reconciled
    Error,
    /// Vanished from disk and soft-deleted
    Deleted,
}

impl FileStatus {
    /// Three-letter label used in human output.
    pub fn label(self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Tracked => "trk",
            FileStatus::Modified => "mod",
            FileStatus::Error => "err",
            FileStatus::Deleted => "del",
        }
    }
}

/// Per-file result of a synchronization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ParseError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenarios: Vec<ScenarioAction>,
}

/// Result of a full synchronization pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub files: Vec<FileReport>,

    /// Number of files visited, including deleted ones
    pub file_count: usize,

    /// Number of scenarios with a reported action (unchanged ones excluded)
    pub scenario_count: usize,

    /// Number of test links stored after the pass
    pub link_count: usize,
}

impl SyncReport {
    /// Record a file result and update the aggregate counters.
    pub fn push(&mut self, report: FileReport) {
        self.file_count += 1;
        self.scenario_count += report
            .scenarios
            .iter()
            .filter(|a| a.kind.is_activity())
            .count();
        self.files.push(report);
    }

    /// Find the report for a given file path.
    pub fn file(&self, path: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.path == path)
    }
}
