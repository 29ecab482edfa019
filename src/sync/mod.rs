//! The synchronization pass.
//!
//! For every feature file, in sorted path order: parse, reconcile against
//! the store inside one transaction, then write identity tags (or error
//! annotations) back into the file. Tracked files that vanished from disk
//! are retired afterwards, and finally the test links are rebuilt.

pub mod reconcile;
pub mod tags;
pub mod test_links;

pub use reconcile::{handle_deleted_file, insert_all, reconcile};
pub use tags::{TagInsertion, annotate_errors, apply_tags, strip_error_annotation, write_tags};
pub use test_links::{GoDialect, RustDialect, TaggedComment, TestDialect, sync_test_links};

use crate::models::{FileReport, FileStatus, SyncReport};
use crate::parser::{self, ParseError};
use crate::storage::Storage;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_FEATURES_DIR: &str = "fts";
pub const DEFAULT_EXTENSION: &str = "ft";
pub const DEFAULT_DATABASE: &str = "ft.db";
pub const DEFAULT_DIALECTS: &[&str] = &["rust", "go"];
pub const DEFAULT_IGNORE_DIRS: &[&str] = &["target", "node_modules"];

/// Everything a pass needs to know about the project layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Project root; stored paths are relative to it
    pub root: PathBuf,

    /// Feature directory, relative to the root
    pub features_dir: PathBuf,

    /// Extension of feature files, without the dot
    pub extension: String,

    /// Database file name, relative to the feature directory
    pub database: PathBuf,

    /// Test dialects used for link scanning
    pub dialects: Vec<String>,

    /// Directory names never descended into while scanning for tests
    pub ignore_dirs: Vec<String>,
}

impl SyncOptions {
    /// Default layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            features_dir: PathBuf::from(DEFAULT_FEATURES_DIR),
            extension: DEFAULT_EXTENSION.to_string(),
            database: PathBuf::from(DEFAULT_DATABASE),
            dialects: DEFAULT_DIALECTS.iter().map(|s| s.to_string()).collect(),
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn features_path(&self) -> PathBuf {
        self.root.join(&self.features_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.features_path().join(&self.database)
    }

    /// Database path relative to the root, as listed in `.gitignore`.
    pub fn database_entry(&self) -> String {
        relative_path(&self.root, &self.database_path())
    }
}

/// Run a full synchronization pass.
pub fn run(storage: &mut Storage, options: &SyncOptions) -> Result<SyncReport> {
    let features = options.features_path();
    if !features.is_dir() {
        return Err(Error::NotInitialized);
    }

    let mut report = SyncReport::default();
    let mut seen = HashSet::new();

    for path in feature_files(options)? {
        let relative = relative_path(&options.root, &path);
        let file_report = sync_file(storage, &path, &relative)?;
        seen.insert(relative);
        report.push(file_report);
    }

    for file in storage.list_live_files()? {
        if seen.contains(&file.path) {
            continue;
        }
        let tx = storage.begin()?;
        let scenarios = handle_deleted_file(storage, file.id)?;
        tx.commit()?;
        info!(path = %file.path, removed = scenarios.len(), "feature file deleted");
        report.push(FileReport {
            path: file.path,
            status: FileStatus::Deleted,
            errors: Vec::new(),
            scenarios,
        });
    }

    report.link_count = sync_test_links(storage, options)?;
    info!(
        files = report.file_count,
        scenarios = report.scenario_count,
        links = report.link_count,
        "sync complete"
    );
    Ok(report)
}

/// Feature files directly inside the feature directory, sorted by path.
pub fn feature_files(options: &SyncOptions) -> Result<Vec<PathBuf>> {
    let features = options.features_path();
    let entries = fs::read_dir(&features).map_err(|e| Error::file_op(&features, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::file_op(&features, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == options.extension.as_str()) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn sync_file(storage: &Storage, path: &Path, relative: &str) -> Result<FileReport> {
    let bytes = fs::read(path).map_err(|e| Error::file_op(path, e))?;
    let raw = match String::from_utf8(bytes) {
        Ok(raw) => raw,
        Err(e) => {
            // Neither written back nor registered.
            let error = undecodable(e.as_bytes(), e.utf8_error().valid_up_to());
            warn!(path = relative, line = error.line, "{}", error.message);
            return Ok(FileReport {
                path: relative.to_string(),
                status: FileStatus::Error,
                errors: vec![error],
                scenarios: Vec::new(),
            });
        }
    };
    let body = strip_error_annotation(&raw);
    let parsed = parser::parse_file(relative, body.as_bytes());

    let tx = storage.begin()?;
    let (file_id, is_new) = match storage.find_live_file(relative)? {
        Some(file) => (file.id, false),
        None => match storage.find_deleted_file(relative)? {
            Some(file) => {
                storage.set_file_deleted(file.id, false)?;
                debug!(path = relative, "feature file reappeared");
                (file.id, false)
            }
            None => (storage.insert_file(relative)?, true),
        },
    };

    if parsed.has_errors() {
        tx.commit()?;
        for error in &parsed.errors {
            warn!(path = relative, line = error.line, "{}", error.message);
        }
        tags::write_if_changed(path, &raw, &annotate_errors(body, &parsed.errors))?;
        return Ok(FileReport {
            path: relative.to_string(),
            status: FileStatus::Error,
            errors: parsed.errors,
            scenarios: Vec::new(),
        });
    }

    let (scenarios, insertions) = if is_new {
        insert_all(storage, file_id, &parsed)?
    } else {
        reconcile(storage, file_id, &parsed)?
    };
    tx.commit()?;

    if body.len() != raw.len() {
        tags::write_if_changed(path, &raw, body)?;
    }
    if write_tags(path, &insertions)? {
        debug!(path = relative, tags = insertions.len(), "wrote identity tags");
    }

    let status = if is_new {
        FileStatus::New
    } else if scenarios.iter().any(|a| a.kind.is_activity()) {
        FileStatus::Modified
    } else {
        FileStatus::Tracked
    };
    Ok(FileReport {
        path: relative.to_string(),
        status,
        errors: Vec::new(),
        scenarios,
    })
}

/// Error for a file whose bytes stop being UTF-8 at `valid_up_to`.
fn undecodable(bytes: &[u8], valid_up_to: usize) -> ParseError {
    let line = bytes[..valid_up_to].iter().filter(|&&b| b == b'\n').count() + 1;
    ParseError::new(line, "file is not valid UTF-8")
}

/// `path` relative to `root`, `/`-separated.
pub(crate) fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;
    use crate::test_utils::TestEnv;

    const LOGIN: &str = "Feature: Login\n\n  Scenario: User logs in\n    Given a registered user\n    When they sign in\n    Then they see the dashboard\n";

    fn sync(env: &TestEnv, storage: &mut Storage) -> SyncReport {
        run(storage, &env.options()).unwrap()
    }

    #[test]
    fn test_first_sync_assigns_ids() {
        let env = TestEnv::new();
        env.write_feature("login.ft", LOGIN);
        let mut storage = env.open_storage();

        let report = sync(&env, &mut storage);
        assert_eq!(report.file_count, 1);
        assert_eq!(report.scenario_count, 1);
        let file = report.file("fts/login.ft").unwrap();
        assert_eq!(file.status, FileStatus::New);
        assert_eq!(file.scenarios[0].id, 1);

        let text = env.read_feature("login.ft");
        assert!(text.contains("  @id:1\n  Scenario: User logs in\n"));
    }

    #[test]
    fn test_second_sync_is_idempotent() {
        let env = TestEnv::new();
        env.write_feature("login.ft", LOGIN);
        let mut storage = env.open_storage();
        sync(&env, &mut storage);
        let after_first = env.read_feature("login.ft");

        let report = sync(&env, &mut storage);
        assert_eq!(report.file("fts/login.ft").unwrap().status, FileStatus::Tracked);
        assert_eq!(report.scenario_count, 0);
        assert_eq!(env.read_feature("login.ft"), after_first);
        assert_eq!(storage.count_scenarios().unwrap(), 1);
    }

    #[test]
    fn test_step_edit_keeps_identity() {
        let env = TestEnv::new();
        env.write_feature("login.ft", LOGIN);
        let mut storage = env.open_storage();
        sync(&env, &mut storage);
        storage.append_status(1, "accepted").unwrap();

        let edited = env
            .read_feature("login.ft")
            .replace("they see the dashboard", "they see the welcome page");
        env.write_feature("login.ft", &edited);
        let report = sync(&env, &mut storage);

        let file = report.file("fts/login.ft").unwrap();
        assert_eq!(file.status, FileStatus::Modified);
        assert_eq!(file.scenarios[0].kind, ActionKind::Modified);
        assert_eq!(file.scenarios[0].id, 1);
        let stored = storage.get_scenario(1).unwrap();
        assert!(stored.content.unwrap().contains("welcome page"));
        assert_eq!(storage.latest_status(1).unwrap().as_deref(), Some("modified"));
    }

    #[test]
    fn test_new_file_strips_stale_tags() {
        let env = TestEnv::new();
        env.write_feature(
            "login.ft",
            "Feature: Login\n  @id:42\n  Scenario: A\n  @id:43\n  Scenario: B\n",
        );
        let mut storage = env.open_storage();
        sync(&env, &mut storage);
        assert_eq!(
            env.read_feature("login.ft"),
            "Feature: Login\n  @id:1\n  Scenario: A\n  @id:2\n  Scenario: B\n"
        );
    }

    #[test]
    fn test_parse_errors_annotate_without_reconciling() {
        let env = TestEnv::new();
        env.write_feature("bad.ft", "Feature: Bad\n  Rule: nope\n  Scenario: A\n");
        let mut storage = env.open_storage();

        let report = sync(&env, &mut storage);
        let file = report.file("fts/bad.ft").unwrap();
        assert_eq!(file.status, FileStatus::Error);
        assert_eq!(file.errors.len(), 1);
        assert_eq!(storage.count_scenarios().unwrap(), 0);
        assert!(storage.find_live_file("fts/bad.ft").unwrap().is_some());

        let annotated = env.read_feature("bad.ft");
        assert!(annotated.starts_with("# error: Rule is not supported (line 2)\nFeature: Bad"));

        sync(&env, &mut storage);
        assert_eq!(env.read_feature("bad.ft"), annotated);
    }

    #[test]
    fn test_fixed_file_drops_annotation() {
        let env = TestEnv::new();
        env.write_feature("bad.ft", "Feature: Bad\n  Rule: nope\n");
        let mut storage = env.open_storage();
        sync(&env, &mut storage);

        let fixed = env.read_feature("bad.ft").replace("  Rule: nope\n", "  Scenario: A\n");
        env.write_feature("bad.ft", &fixed);
        sync(&env, &mut storage);
        assert_eq!(env.read_feature("bad.ft"), "Feature: Bad\n  @id:1\n  Scenario: A\n");
    }

    #[test]
    fn test_deleted_file_and_reappearance() {
        let env = TestEnv::new();
        env.write_feature("login.ft", LOGIN);
        let mut storage = env.open_storage();
        sync(&env, &mut storage);
        storage.append_status(1, "accepted").unwrap();
        let tagged = env.read_feature("login.ft");

        fs::remove_file(env.feature_path("login.ft")).unwrap();
        let report = sync(&env, &mut storage);
        let file = report.file("fts/login.ft").unwrap();
        assert_eq!(file.status, FileStatus::Deleted);
        assert_eq!(file.scenarios[0].kind, ActionKind::Removed);
        assert_eq!(storage.latest_status(1).unwrap().as_deref(), Some("removed"));

        let report = sync(&env, &mut storage);
        assert!(report.files.is_empty());

        env.write_feature("login.ft", &tagged);
        let report = sync(&env, &mut storage);
        let file = report.file("fts/login.ft").unwrap();
        assert_eq!(file.status, FileStatus::Modified);
        assert_eq!(file.scenarios[0].kind, ActionKind::Restored);
        assert_eq!(storage.latest_status(1).unwrap().as_deref(), Some("restored"));
    }

    #[test]
    fn test_non_utf8_file_does_not_stop_the_pass() {
        let env = TestEnv::new();
        let latin1: &[u8] = b"Feature: Caf\xe9\n  Scenario: A\n    Given a\n";
        fs::write(env.feature_path("a_latin1.ft"), latin1).unwrap();
        env.write_feature("b.ft", "Feature: B\n  Scenario: B\n    Given y\n");
        let mut storage = env.open_storage();

        let report = sync(&env, &mut storage);
        let file = report.file("fts/a_latin1.ft").unwrap();
        assert_eq!(file.status, FileStatus::Error);
        assert_eq!(file.errors, vec![ParseError::new(1, "file is not valid UTF-8")]);
        assert!(file.scenarios.is_empty());
        assert_eq!(fs::read(env.feature_path("a_latin1.ft")).unwrap(), latin1);

        assert_eq!(report.file("fts/b.ft").unwrap().status, FileStatus::New);
        assert_eq!(
            env.read_feature("b.ft"),
            "Feature: B\n  @id:1\n  Scenario: B\n    Given y\n"
        );
        assert_eq!(storage.count_scenarios().unwrap(), 1);
    }

    #[test]
    fn test_undecodable_line_is_reported() {
        let bytes = b"Feature: F\n  Scenario: A\n    Given caf\xe9\n";
        let valid_up_to = std::str::from_utf8(bytes).unwrap_err().valid_up_to();
        assert_eq!(undecodable(bytes, valid_up_to).line, 3);
    }

    #[test]
    fn test_links_follow_scenarios() {
        let env = TestEnv::new();
        env.write_feature("login.ft", LOGIN);
        env.write_file(
            "tests/login.rs",
            "// @id:1\n#[test]\nfn logs_in() {}\n\n// @id:9\n#[test]\nfn dangling() {}\n",
        );
        let mut storage = env.open_storage();

        let report = sync(&env, &mut storage);
        assert_eq!(report.link_count, 1);
        assert_eq!(storage.links_for_scenario(1).unwrap()[0].file_path, "tests/login.rs");
    }

    #[test]
    fn test_missing_features_dir() {
        let env = TestEnv::new();
        let mut storage = env.open_storage();
        let mut options = env.options();
        options.features_dir = PathBuf::from("specs");
        assert!(matches!(run(&mut storage, &options), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_only_matching_extension_is_synced() {
        let env = TestEnv::new();
        env.write_feature("login.ft", LOGIN);
        env.write_feature("notes.txt", LOGIN);
        let mut storage = env.open_storage();

        let report = sync(&env, &mut storage);
        assert_eq!(report.file_count, 1);
        assert_eq!(env.read_feature("notes.txt"), LOGIN);
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/work/project");
        assert_eq!(
            relative_path(root, &root.join("fts").join("login.ft")),
            "fts/login.ft"
        );
    }
}
