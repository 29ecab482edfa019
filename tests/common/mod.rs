//! Common test utilities for ft integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pick up the
//! user's `~/.config/ft/config.kdl`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::Path;
pub use tempfile::TempDir;

/// A test environment with an isolated project and config directory.
///
/// Each `TestEnv` creates two temporary directories:
/// - `repo_dir`: Acts as the project root
/// - `config_dir`: Holds the system config (via `FT_CONFIG_DIR` env var)
///
/// The `ft()` method returns a `Command` that sets both per-invocation,
/// making tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and run `ft init`.
    pub fn init() -> Self {
        let env = Self::new();
        env.ft().arg("init").assert().success();
        env
    }

    /// Get a Command for the ft binary running inside the project.
    pub fn ft(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_ft"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("FT_CONFIG_DIR", self.config_dir.path());
        cmd.env_remove("FT_REPO");
        cmd.env_remove("FT_LOG");
        cmd
    }

    /// Run a command expected to succeed and parse its JSON output.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.ft().args(args).output().expect("failed to run ft");
        assert!(
            output.status.success(),
            "ft {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("Invalid JSON")
    }

    /// Run `ft sync` and return its JSON report.
    pub fn sync(&self) -> serde_json::Value {
        self.json(&["sync"])
    }

    pub fn path(&self) -> &Path {
        self.repo_dir.path()
    }

    /// Write a file relative to the project root, creating parent directories.
    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read_file(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel)).unwrap()
    }

    /// Write a feature file into the default `fts/` directory.
    pub fn write_feature(&self, name: &str, content: &str) {
        self.write_file(&format!("fts/{}", name), content);
    }

    pub fn read_feature(&self, name: &str) -> String {
        self.read_file(&format!("fts/{}", name))
    }

    /// Open the project database directly.
    pub fn db(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(self.path().join("fts/ft.db")).unwrap()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A feature file with one scenario and a background.
pub const LOGIN: &str = "\
Feature: Login

  Background:
    Given the app is running

  Scenario: User logs in
    Given a registered user
    When they submit valid credentials
    Then they see the dashboard
";
