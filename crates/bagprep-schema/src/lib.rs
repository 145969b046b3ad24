//! Identifiers, NERDm record model, version rules, and configuration for bagprep.
//!
//! This crate defines the schema layer: object identifiers (`ObjectId`),
//! component classification (`ComponentKind`), default per-path records and
//! the annotation overlay merge (`effective_view`), the version bump rule
//! (`bump`), and TOML configuration (`PrepConfig`).

pub mod config;
pub mod nerdm;
pub mod types;
pub mod version;

pub use config::{
    load_config, parse_config_str, BuilderConfig, ConfigError, ExamineMode, PrepConfig,
    ServiceConfig,
};
pub use nerdm::{effective_view, merge_into, ComponentKind, NerdError};
pub use types::{ContentHash, ObjectId};
pub use version::{bump, split_in_progress, EditSeverity, Version, VersionError, DEFAULT_VERSION};
