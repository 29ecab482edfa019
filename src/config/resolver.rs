//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Project `ft.kdl` at the repository root
//! 3. System `config.kdl` (`~/.config/ft/config.kdl`, or `$FT_CONFIG_DIR/config.kdl`)
//! 4. Built-in defaults

use super::schema::{FtConfig, OutputFormat};
use crate::Result;
use crate::sync::{
    DEFAULT_DATABASE, DEFAULT_DIALECTS, DEFAULT_EXTENSION, DEFAULT_FEATURES_DIR,
    DEFAULT_IGNORE_DIRS, SyncOptions,
};
use std::path::{Path, PathBuf};

/// Environment variable overriding the system config directory.
pub const CONFIG_DIR_ENV: &str = "FT_CONFIG_DIR";

/// Name of the project config file at the repository root.
pub const PROJECT_CONFIG_FILE: &str = "ft.kdl";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from the project's ft.kdl
    Project,
    /// Value from the system config.kdl
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Project => write!(f, "project"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub features_dir: Resolved<PathBuf>,
    pub extension: Resolved<String>,
    pub database: Resolved<PathBuf>,
    pub output_format: Resolved<OutputFormat>,
    pub test_dialects: Resolved<Vec<String>>,
    pub ignore_dirs: Resolved<Vec<String>>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            features_dir: Resolved::new(PathBuf::from(DEFAULT_FEATURES_DIR), ValueSource::Default),
            extension: Resolved::new(DEFAULT_EXTENSION.to_string(), ValueSource::Default),
            database: Resolved::new(PathBuf::from(DEFAULT_DATABASE), ValueSource::Default),
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
            test_dialects: Resolved::new(owned(DEFAULT_DIALECTS), ValueSource::Default),
            ignore_dirs: Resolved::new(owned(DEFAULT_IGNORE_DIRS), ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    /// Sync options for a project rooted at `root`.
    pub fn sync_options(&self, root: &Path) -> SyncOptions {
        SyncOptions {
            root: root.to_path_buf(),
            features_dir: self.features_dir.value.clone(),
            extension: self.extension.value.clone(),
            database: self.database.value.clone(),
            dialects: self.test_dialects.value.clone(),
            ignore_dirs: self.ignore_dirs.value.clone(),
        }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub features_dir: Option<PathBuf>,
    pub output_format: Option<OutputFormat>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_features_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.features_dir = Some(dir.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Path of the system config file, if a config directory is known.
pub fn system_config_path() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir).join("config.kdl")),
        _ => dirs::config_dir().map(|dir| dir.join("ft").join("config.kdl")),
    }
}

/// Path of the project config file for a repository root.
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(PROJECT_CONFIG_FILE)
}

/// Load both config files and resolve them against `overrides`.
pub fn resolve_config(root: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = match system_config_path() {
        Some(path) => FtConfig::load(&path)?,
        None => FtConfig::new(),
    };
    let project = FtConfig::load(&project_config_path(root))?;
    Ok(resolve(&system, &project, overrides))
}

/// Resolve already loaded configs with full precedence chain.
pub fn resolve(system: &FtConfig, project: &FtConfig, overrides: &ConfigOverrides) -> ResolvedConfig {
    let defaults = ResolvedConfig::default();
    ResolvedConfig {
        features_dir: pick(
            overrides.features_dir.clone(),
            project.features_dir.as_ref().map(PathBuf::from),
            system.features_dir.as_ref().map(PathBuf::from),
            defaults.features_dir,
        ),
        extension: pick(
            None,
            project.extension.clone(),
            system.extension.clone(),
            defaults.extension,
        ),
        database: pick(
            None,
            project.database.as_ref().map(PathBuf::from),
            system.database.as_ref().map(PathBuf::from),
            defaults.database,
        ),
        output_format: pick(
            overrides.output_format,
            project.output_format,
            system.output_format,
            defaults.output_format,
        ),
        test_dialects: pick(
            None,
            project.test_dialects.clone(),
            system.test_dialects.clone(),
            defaults.test_dialects,
        ),
        ignore_dirs: pick(
            None,
            project.ignore_dirs.clone(),
            system.ignore_dirs.clone(),
            defaults.ignore_dirs,
        ),
    }
}

fn pick<T>(cli: Option<T>, project: Option<T>, system: Option<T>, default: Resolved<T>) -> Resolved<T> {
    if let Some(value) = cli {
        Resolved::new(value, ValueSource::CliFlag)
    } else if let Some(value) = project {
        Resolved::new(value, ValueSource::Project)
    } else if let Some(value) = system {
        Resolved::new(value, ValueSource::System)
    } else {
        default
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
