use crate::version::EditSeverity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required configuration parameter: {0}")]
    Missing(String),
}

/// When per-file metadata is extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamineMode {
    Off,
    #[default]
    Sync,
    Async,
}

impl FromStr for ExamineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ExamineMode::Off),
            "sync" => Ok(ExamineMode::Sync),
            "async" => Ok(ExamineMode::Async),
            other => Err(format!("unknown examine mode '{other}'")),
        }
    }
}

/// Top-level preparation configuration, read from TOML.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PrepConfig {
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub headbag_cache: Option<PathBuf>,
    /// Parent of the review areas, one directory per object local name.
    #[serde(default)]
    pub review_dir: Option<PathBuf>,
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    #[serde(default)]
    pub dist_service: ServiceConfig,
    #[serde(default)]
    pub metadata_service: ServiceConfig,
    #[serde(default)]
    pub bag_builder: BuilderConfig,
    #[serde(default)]
    pub examine: ExamineMode,
    #[serde(default)]
    pub edit_severity: EditSeverity,
    #[serde(default = "default_mbag_version")]
    pub mbag_version: String,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            headbag_cache: None,
            review_dir: None,
            upload_dir: None,
            dist_service: ServiceConfig::default(),
            metadata_service: ServiceConfig::default(),
            bag_builder: BuilderConfig::default(),
            examine: ExamineMode::default(),
            edit_severity: EditSeverity::default(),
            mbag_version: default_mbag_version(),
        }
    }
}

impl PrepConfig {
    pub fn require_working_dir(&self) -> Result<&Path, ConfigError> {
        self.working_dir
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("working_dir".to_owned()))
    }

    pub fn require_headbag_cache(&self) -> Result<&Path, ConfigError> {
        self.headbag_cache
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("headbag_cache".to_owned()))
    }

    /// Whether update seeding from remote services is configured.
    pub fn has_remote_services(&self) -> bool {
        self.dist_service.service_endpoint.is_some()
            || self.metadata_service.service_endpoint.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service_endpoint: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Settings for the low-level bag builder.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuilderConfig {
    #[serde(default = "default_true")]
    pub copy_on_link_failure: bool,
    #[serde(default = "default_true")]
    pub ensure_nerdm_type_on_add: bool,
    #[serde(default)]
    pub extra_tag_dirs: Vec<String>,
    #[serde(default = "default_log_filename")]
    pub log_filename: String,
    #[serde(default = "default_json_indent")]
    pub json_indent: usize,
    #[serde(default)]
    pub init_bag_info: BTreeMap<String, String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            copy_on_link_failure: true,
            ensure_nerdm_type_on_add: true,
            extra_tag_dirs: Vec::new(),
            log_filename: default_log_filename(),
            json_indent: default_json_indent(),
            init_bag_info: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_filename() -> String {
    "preserv.log".to_owned()
}

fn default_json_indent() -> usize {
    4
}

fn default_mbag_version() -> String {
    "0.4".to_owned()
}

pub fn parse_config_str(input: &str) -> Result<PrepConfig, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<PrepConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let input = r#"
working_dir = "/var/bagprep/work"
headbag_cache = "/var/bagprep/cache"
examine = "async"
edit_severity = "content_change"
mbag_version = "1.2"

[dist_service]
service_endpoint = "https://data.example.org/od/ds/"

[metadata_service]
service_endpoint = "https://data.example.org/rmm/records/"

[bag_builder]
copy_on_link_failure = false
extra_tag_dirs = ["multibag"]
json_indent = 2

[bag_builder.init_bag_info]
Source-Organization = "Example Institute"
"#;
        let cfg = parse_config_str(input).unwrap();
        assert_eq!(cfg.require_working_dir().unwrap(), Path::new("/var/bagprep/work"));
        assert_eq!(cfg.examine, ExamineMode::Async);
        assert_eq!(cfg.edit_severity, EditSeverity::ContentChange);
        assert_eq!(cfg.mbag_version, "1.2");
        assert!(!cfg.bag_builder.copy_on_link_failure);
        assert!(cfg.bag_builder.ensure_nerdm_type_on_add);
        assert_eq!(cfg.bag_builder.json_indent, 2);
        assert_eq!(cfg.bag_builder.log_filename, "preserv.log");
        assert_eq!(
            cfg.bag_builder.init_bag_info["Source-Organization"],
            "Example Institute"
        );
        assert!(cfg.has_remote_services());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config_str("").unwrap();
        assert_eq!(cfg, PrepConfig::default());
        assert_eq!(cfg.examine, ExamineMode::Sync);
        assert!(cfg.bag_builder.copy_on_link_failure);
        assert!(!cfg.has_remote_services());
    }

    #[test]
    fn missing_required_dirs_reported_by_name() {
        let cfg = PrepConfig::default();
        match cfg.require_working_dir() {
            Err(ConfigError::Missing(name)) => assert_eq!(name, "working_dir"),
            other => panic!("expected Missing, got {other:?}"),
        }
        match cfg.require_headbag_cache() {
            Err(ConfigError::Missing(name)) => assert_eq!(name, "headbag_cache"),
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn reject_unknown_fields() {
        assert!(parse_config_str("bogus = 1\n").is_err());
        assert!(parse_config_str("[bag_builder]\nhardlinks = true\n").is_err());
    }

    #[test]
    fn reject_bad_examine_mode() {
        assert!(parse_config_str("examine = \"sometimes\"\n").is_err());
        assert_eq!("async".parse::<ExamineMode>().unwrap(), ExamineMode::Async);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bagprep.toml");
        fs::write(&path, "working_dir = \"/tmp/w\"\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.working_dir, Some(PathBuf::from("/tmp/w")));
        assert!(matches!(
            load_config(dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
