//! KDL schema for `ft.kdl` and the system `config.kdl`.
//!
//! Both files share one schema:
//!
//! ```kdl
//! features-dir "fts"
//! extension "ft"
//! database "ft.db"          // relative to features-dir
//! output-format "human"     // or "json"
//! test-dialects "rust" "go"
//! ignore-dirs "target" "node_modules"
//! ```

use crate::sync::test_links;
use crate::{Error, Result};
use kdl::KdlDocument;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, OutputFormat::Human)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings read from one config file. Unset keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtConfig {
    pub features_dir: Option<String>,
    pub extension: Option<String>,
    pub database: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub test_dialects: Option<Vec<String>>,
    pub ignore_dirs: Option<Vec<String>>,
}

impl FtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config file; a missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|e| Error::file_op(path, e))?;
        let doc: KdlDocument = content
            .parse()
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|msg| Error::Config(format!("{}: {}", path.display(), msg)))?;
        Ok(config)
    }

    /// Validate the config values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(dir) = &self.features_dir
            && dir.trim().is_empty()
        {
            return Err("features-dir must not be empty".to_string());
        }
        if let Some(ext) = &self.extension
            && (ext.is_empty() || ext.contains('.'))
        {
            return Err(format!("extension must be a bare extension like \"ft\", got {:?}", ext));
        }
        if let Some(db) = &self.database
            && db.trim().is_empty()
        {
            return Err("database must not be empty".to_string());
        }
        if let Some(dialects) = &self.test_dialects {
            for name in dialects {
                if test_links::dialect(name).is_none() {
                    return Err(format!("unknown test dialect: {}", name));
                }
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            features_dir: first_string(doc, "features-dir"),
            extension: first_string(doc, "extension"),
            database: first_string(doc, "database"),
            output_format: first_string(doc, "output-format")
                .as_deref()
                .and_then(OutputFormat::parse),
            test_dialects: all_strings(doc, "test-dialects"),
            ignore_dirs: all_strings(doc, "ignore-dirs"),
        }
    }
}

fn first_string(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)?
        .entries()
        .first()?
        .value()
        .as_string()
        .map(str::to_string)
}

fn all_strings(doc: &KdlDocument, name: &str) -> Option<Vec<String>> {
    let node = doc.get(name)?;
    Some(
        node.entries()
            .iter()
            .filter_map(|entry| entry.value().as_string())
            .map(str::to_string)
            .collect(),
    )
}
