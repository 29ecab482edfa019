//! Configuration for ft.
//!
//! Settings come from KDL files:
//!
//! - System: `~/.config/ft/config.kdl` (overridable with `FT_CONFIG_DIR`)
//! - Project: `ft.kdl` at the repository root
//!
//! Both use the schema in [`schema`]. Precedence is CLI flag > project >
//! system > defaults; use the [`resolver`] module to resolve it.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CONFIG_DIR_ENV, ConfigOverrides, PROJECT_CONFIG_FILE, Resolved, ResolvedConfig, ValueSource,
    project_config_path, resolve, resolve_config, system_config_path,
};
pub use schema::{FtConfig, OutputFormat};
