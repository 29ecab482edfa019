//! Command implementations for the ft CLI.
//!
//! Each command returns a serializable result implementing [`Output`], so
//! `main` can print it either as JSON or in human-readable form:
//! - `init` - Create the feature directory, store and `.gitignore` entry
//! - `sync` - Run a synchronization pass
//! - `status` - Status counts, or append a status to one scenario
//! - `list` - Scenarios with their current status
//! - `show` - One scenario with status, history, tests and text
//! - `tests` - Tests linked to a scenario

use crate::models::{STATUS_NO_ACTIVITY, SyncReport, TestLink, format_tag};
use crate::parser;
use crate::storage::{Storage, parse_scenario_id};
use crate::sync::{self, SyncOptions, strip_error_annotation, test_links};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Open the store of an initialized project.
fn open_storage(options: &SyncOptions) -> Result<Storage> {
    if !options.features_path().is_dir() {
        return Err(Error::NotInitialized);
    }
    Storage::open(&options.database_path())
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// === Init ===

#[derive(Serialize)]
pub struct InitResult {
    pub features_dir: String,
    pub features_dir_created: bool,
    pub database: String,
    pub database_created: bool,
    pub gitignore_created: bool,
    /// Whether the database entry had to be added to `.gitignore`
    pub gitignore_updated: bool,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if self.features_dir_created {
            lines.push(format!("{}/ created", self.features_dir));
        } else {
            lines.push(format!("{}/ already exists", self.features_dir));
        }
        if self.database_created {
            lines.push(format!("{} created", self.database));
        } else {
            lines.push(format!("{} already exists", self.database));
        }
        if self.gitignore_created {
            lines.push(".gitignore created".to_string());
        }
        if self.gitignore_updated {
            lines.push(format!("{} added to .gitignore", self.database));
        } else {
            lines.push(format!("{} already in .gitignore", self.database));
        }
        lines.join("\n")
    }
}

/// Initialize ft for a project. Safe to run repeatedly.
pub fn init(options: &SyncOptions) -> Result<InitResult> {
    let features = options.features_path();
    let features_dir_created = !features.is_dir();
    fs::create_dir_all(&features).map_err(|e| Error::file_op(&features, e))?;

    let db_path = options.database_path();
    let database_created = !Storage::exists(&db_path);
    Storage::open_at(&db_path)?;

    let entry = options.database_entry();
    let (gitignore_created, gitignore_updated) = ensure_gitignore(&options.root, &entry)?;

    Ok(InitResult {
        features_dir: sync::relative_path(&options.root, &features),
        features_dir_created,
        database: entry,
        database_created,
        gitignore_created,
        gitignore_updated,
    })
}

/// Make sure `.gitignore` lists `entry`. Returns (created, updated).
fn ensure_gitignore(root: &Path, entry: &str) -> Result<(bool, bool)> {
    let path = root.join(".gitignore");
    if !path.exists() {
        fs::write(&path, format!("{}\n", entry)).map_err(|e| Error::file_op(&path, e))?;
        return Ok((true, true));
    }

    let mut content = fs::read_to_string(&path).map_err(|e| Error::file_op(&path, e))?;
    if content.lines().any(|line| line.trim() == entry) {
        return Ok((false, false));
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(entry);
    content.push('\n');
    fs::write(&path, content).map_err(|e| Error::file_op(&path, e))?;
    Ok((false, true))
}

// === Sync ===

impl Output for SyncReport {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for file in &self.files {
            for error in &file.errors {
                lines.push(format!("{}  {}: {}", file.status.label(), file.path, error));
            }
            if file.errors.is_empty() {
                lines.push(format!("{}  {}", file.status.label(), file.path));
            }
            for action in file.scenarios.iter().filter(|a| a.kind.is_activity()) {
                lines.push(format!(
                    "       {} {} {}",
                    action.kind.marker(),
                    format_tag(action.id),
                    action.name
                ));
            }
        }
        if self.scenario_count > 0 {
            lines.push(format!(
                "synced {} files, {} scenarios",
                self.file_count, self.scenario_count
            ));
        } else {
            lines.push(format!("synced {} files", self.file_count));
        }
        lines.join("\n")
    }
}

/// Run a synchronization pass over the project.
pub fn sync(options: &SyncOptions) -> Result<SyncReport> {
    let mut storage = open_storage(options)?;
    sync::run(&mut storage, options)
}

// === Status ===

#[derive(Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: usize,
}

#[derive(Serialize)]
pub struct StatusReport {
    pub total: usize,
    pub statuses: Vec<StatusCount>,
}

impl Output for StatusReport {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Scenarios: {}", self.total)];
        for entry in &self.statuses {
            lines.push(format!("  {}: {}", entry.status, entry.count));
        }
        lines.join("\n")
    }
}

/// Count scenarios by current status.
pub fn status_report(options: &SyncOptions) -> Result<StatusReport> {
    let storage = open_storage(options)?;
    let statuses = storage
        .status_counts()?
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect();
    Ok(StatusReport {
        total: storage.count_scenarios()?,
        statuses,
    })
}

#[derive(Serialize)]
pub struct StatusUpdate {
    pub id: i64,
    pub previous: Option<String>,
    pub status: String,
}

impl Output for StatusUpdate {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        match &self.previous {
            Some(previous) => format!("{} {} → {}", format_tag(self.id), previous, self.status),
            None => format!("{} → {}", format_tag(self.id), self.status),
        }
    }
}

/// Append a user status to a scenario. Multiple words form one label.
pub fn status_update(options: &SyncOptions, raw_id: &str, words: &[String]) -> Result<StatusUpdate> {
    let id = parse_scenario_id(raw_id)?;
    let status = words.join(" ").trim().to_string();
    if status.is_empty() {
        return Err(Error::InvalidInput("status must not be empty".to_string()));
    }

    let storage = open_storage(options)?;
    storage.get_scenario(id)?;
    let previous = storage.latest_status(id)?;
    storage.append_status(id, &status)?;
    debug!(id, status = %status, "status appended");

    Ok(StatusUpdate {
        id,
        previous,
        status,
    })
}

// === List ===

#[derive(Serialize)]
pub struct ListEntry {
    pub id: i64,
    pub file: String,
    pub name: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct ListResult {
    pub scenarios: Vec<ListEntry>,
}

impl Output for ListResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let tag_width = self
            .scenarios
            .iter()
            .map(|s| format_tag(s.id).len())
            .max()
            .unwrap_or(0);
        let file_width = self.scenarios.iter().map(|s| s.file.len()).max().unwrap_or(0);
        let name_width = self.scenarios.iter().map(|s| s.name.len()).max().unwrap_or(0);

        self.scenarios
            .iter()
            .map(|s| {
                format!(
                    "{:<tag_width$}  {:<file_width$}  {:<name_width$}  {}",
                    format_tag(s.id),
                    s.file,
                    s.name,
                    s.status
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// List scenarios ordered by file then ID, optionally filtered by status.
pub fn list(options: &SyncOptions, status: Option<&str>, no_activity: bool) -> Result<ListResult> {
    let storage = open_storage(options)?;
    let scenarios = storage
        .list_scenarios()?
        .into_iter()
        .filter(|s| status.is_none_or(|wanted| s.status == wanted))
        .filter(|s| !no_activity || s.status == STATUS_NO_ACTIVITY)
        .map(|s| ListEntry {
            id: s.id,
            file: file_name(&s.file_path).to_string(),
            name: s.name,
            status: s.status,
        })
        .collect();
    Ok(ListResult { scenarios })
}

// === Show ===

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub status: String,
    pub changed_at: DateTime<Utc>,
}

fn history_lines(history: &[HistoryEntry]) -> Vec<String> {
    let width = history.iter().map(|e| e.status.len()).max().unwrap_or(0);
    history
        .iter()
        .map(|e| {
            format!(
                "  {:<width$}  {}",
                e.status,
                e.changed_at.format("%b %-d, %Y %-I:%M%P")
            )
        })
        .collect()
}

#[derive(Serialize)]
pub struct ShowResult {
    pub id: i64,
    pub name: String,
    pub file: String,
    pub status: String,
    pub history: Vec<HistoryEntry>,
    pub tests: Vec<TestLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    pub content: String,
}

impl Output for ShowResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("{}  {}", format_tag(self.id), file_name(&self.file)),
            format!("Status: {}", self.status),
        ];
        if !self.history.is_empty() {
            lines.push("History:".to_string());
            lines.extend(history_lines(&self.history));
        }
        if !self.tests.is_empty() {
            lines.push(String::new());
            lines.push("Tests:".to_string());
            for link in &self.tests {
                lines.push(format!("  {}:{}", link.file_path, link.line_number));
            }
        }
        if let Some(background) = &self.background {
            lines.push(String::new());
            lines.push(background.clone());
        }
        lines.push(String::new());
        lines.push(self.content.clone());
        lines.join("\n")
    }
}

/// Show a scenario. Text is read live from its file when the tag is still
/// there, otherwise the last stored content is used.
pub fn show(options: &SyncOptions, raw_id: &str) -> Result<ShowResult> {
    let id = parse_scenario_id(raw_id)?;
    let storage = open_storage(options)?;
    let scenario = storage.get_scenario(id)?;
    let file = storage.scenario_file_path(id)?;

    let mut content = None;
    let mut background = None;
    if let Ok(raw) = fs::read_to_string(options.root.join(&file)) {
        let parsed = parser::parse_file(&file, strip_error_annotation(&raw).as_bytes());
        content = parsed.scenario_by_id(id).map(|s| s.content.clone());
        background = parsed.background;
    }
    let content = content
        .or(scenario.content)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::NotFound(format!("scenario {} not found in file {}", id, file)))?;

    let history = storage
        .status_history(id)?
        .into_iter()
        .map(|e| HistoryEntry {
            status: e.status,
            changed_at: e.changed_at,
        })
        .collect();

    Ok(ShowResult {
        id,
        name: scenario.name,
        file,
        status: storage.current_status(id)?,
        history,
        tests: storage.links_for_scenario(id)?,
        background,
        content,
    })
}

#[derive(Serialize)]
pub struct HistoryResult {
    pub id: i64,
    pub name: String,
    pub history: Vec<HistoryEntry>,
}

impl Output for HistoryResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("{} {}", format_tag(self.id), self.name)];
        lines.extend(history_lines(&self.history));
        lines.join("\n")
    }
}

/// Status history only, newest first. A scenario without events reports a
/// single `no-activity` entry at its creation time.
pub fn show_history(options: &SyncOptions, raw_id: &str) -> Result<HistoryResult> {
    let id = parse_scenario_id(raw_id)?;
    let storage = open_storage(options)?;
    let scenario = storage.get_scenario(id)?;

    let mut history: Vec<HistoryEntry> = storage
        .status_history(id)?
        .into_iter()
        .map(|e| HistoryEntry {
            status: e.status,
            changed_at: e.changed_at,
        })
        .collect();
    if history.is_empty() {
        history.push(HistoryEntry {
            status: STATUS_NO_ACTIVITY.to_string(),
            changed_at: scenario.created_at,
        });
    }

    Ok(HistoryResult {
        id,
        name: scenario.name,
        history,
    })
}

// === Tests ===

#[derive(Serialize)]
pub struct LinkedTest {
    pub file: String,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
}

#[derive(Serialize)]
pub struct TestsResult {
    pub id: i64,
    pub tests: Vec<LinkedTest>,
}

impl Output for TestsResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        self.tests
            .iter()
            .map(|t| match &t.test_name {
                Some(name) => format!("  {}:{} {}", t.file, t.line, name),
                None => format!("  {}:{}", t.file, t.line),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Tests linked to a scenario, with their names when still resolvable.
pub fn tests(options: &SyncOptions, raw_id: &str) -> Result<TestsResult> {
    let id = parse_scenario_id(raw_id)?;
    let storage = open_storage(options)?;
    storage.get_scenario(id)?;

    let mut tests = Vec::new();
    for link in storage.links_for_scenario(id)? {
        let test_name = test_links::resolve_test_name(options, &link)?;
        tests.push(LinkedTest {
            file: link.file_path,
            line: link.line_number,
            test_name,
        });
    }
    Ok(TestsResult { id, tests })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    const LOGIN: &str = "Feature: Login\n\n  Background:\n    Given the app is running\n\n  Scenario: User logs in\n    Given a registered user\n";

    fn synced_env() -> TestEnv {
        let env = TestEnv::new();
        init(&env.options()).unwrap();
        env.write_feature("login.ft", LOGIN);
        sync(&env.options()).unwrap();
        env
    }

    #[test]
    fn test_init_is_idempotent() {
        let env = TestEnv::new();
        let first = init(&env.options()).unwrap();
        assert!(!first.features_dir_created);
        assert!(first.database_created);
        assert!(first.gitignore_created);
        assert_eq!(first.database, "fts/ft.db");

        let second = init(&env.options()).unwrap();
        assert!(!second.database_created);
        assert!(!second.gitignore_updated);
        assert_eq!(
            fs::read_to_string(env.path().join(".gitignore")).unwrap(),
            "fts/ft.db\n"
        );
    }

    #[test]
    fn test_init_appends_to_existing_gitignore() {
        let env = TestEnv::new();
        env.write_file(".gitignore", "target");
        let result = init(&env.options()).unwrap();
        assert!(!result.gitignore_created);
        assert!(result.gitignore_updated);
        assert_eq!(
            fs::read_to_string(env.path().join(".gitignore")).unwrap(),
            "target\nfts/ft.db\n"
        );
    }

    #[test]
    fn test_commands_require_init() {
        let env = TestEnv::new();
        assert!(matches!(sync(&env.options()), Err(Error::NotInitialized)));
        assert!(matches!(list(&env.options(), None, false), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_status_update_and_report() {
        let env = synced_env();
        let update = status_update(&env.options(), "@id:1", &["in".to_string(), "review".to_string()])
            .unwrap();
        assert_eq!(update.previous, None);
        assert_eq!(update.status, "in review");
        assert_eq!(update.to_human(), "@id:1 → in review");

        let update = status_update(&env.options(), "1", &["done".to_string()]).unwrap();
        assert_eq!(update.previous.as_deref(), Some("in review"));

        let report = status_report(&env.options()).unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.statuses[0].status, "done");
        assert!(matches!(
            status_update(&env.options(), "9", &["done".to_string()]),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list_filters() {
        let env = synced_env();
        let all = list(&env.options(), None, false).unwrap();
        assert_eq!(all.scenarios.len(), 1);
        assert_eq!(all.scenarios[0].file, "login.ft");
        assert_eq!(all.scenarios[0].status, STATUS_NO_ACTIVITY);

        assert_eq!(list(&env.options(), None, true).unwrap().scenarios.len(), 1);
        assert!(list(&env.options(), Some("done"), false).unwrap().scenarios.is_empty());
    }

    #[test]
    fn test_show_live_and_stored_content() {
        let env = synced_env();
        let shown = show(&env.options(), "1").unwrap();
        assert_eq!(shown.name, "User logs in");
        assert_eq!(shown.status, STATUS_NO_ACTIVITY);
        assert_eq!(
            shown.background.as_deref(),
            Some("  Background:\n    Given the app is running")
        );
        assert!(shown.content.starts_with("  Scenario: User logs in"));

        status_update(&env.options(), "1", &["accepted".to_string()]).unwrap();
        env.write_feature("login.ft", "Feature: Login\n");
        sync(&env.options()).unwrap();

        let shown = show(&env.options(), "1").unwrap();
        assert_eq!(shown.status, "removed");
        assert!(shown.content.contains("Given a registered user"));
        assert_eq!(shown.history.len(), 2);
    }

    #[test]
    fn test_show_history_synthesizes_no_activity() {
        let env = synced_env();
        let history = show_history(&env.options(), "1").unwrap();
        assert_eq!(history.history.len(), 1);
        assert_eq!(history.history[0].status, STATUS_NO_ACTIVITY);
    }

    #[test]
    fn test_tests_resolve_names() {
        let env = synced_env();
        env.write_file("tests/login.rs", "// @id:1\n#[test]\nfn logs_in() {}\n");
        sync(&env.options()).unwrap();

        let result = tests(&env.options(), "1").unwrap();
        assert_eq!(result.tests.len(), 1);
        assert_eq!(result.tests[0].file, "tests/login.rs");
        assert_eq!(result.tests[0].line, 1);
        assert_eq!(result.tests[0].test_name.as_deref(), Some("logs_in"));
        assert_eq!(result.to_human(), "  tests/login.rs:1 logs_in");
    }

    #[test]
    fn test_sync_human_output() {
        let env = TestEnv::new();
        init(&env.options()).unwrap();
        env.write_feature("login.ft", LOGIN);
        let report = sync(&env.options()).unwrap();
        assert_eq!(
            report.to_human(),
            "new  fts/login.ft\n       + @id:1 User logs in\nsynced 1 files, 1 scenarios"
        );

        let report = sync(&env.options()).unwrap();
        assert_eq!(report.to_human(), "trk  fts/login.ft\nsynced 1 files");
    }
}
