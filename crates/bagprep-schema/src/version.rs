//! Version strings and the finalize-time bump rule.
//!
//! A version is dotted-numeric, optionally followed by an in-progress
//! marker that starts at `+`, e.g. `1.0.5+ (in edit)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version given to an object that has never been preserved.
pub const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,
    #[error("invalid version field '{field}' in '{version}'")]
    InvalidField { version: String, field: String },
    #[error("cannot bump version '{0}': field out of range")]
    Overflow(String),
}

/// What kind of edit produced the in-progress version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditSeverity {
    MetadataOnly,
    ContentChange,
    #[default]
    Unspecified,
}

impl EditSeverity {
    /// History description recorded for a finalized version.
    pub fn description(self) -> &'static str {
        match self {
            EditSeverity::ContentChange => "data update",
            EditSeverity::MetadataOnly | EditSeverity::Unspecified => "metadata update",
        }
    }
}

impl FromStr for EditSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata_only" | "metadata" => Ok(EditSeverity::MetadataOnly),
            "content_change" | "content" | "data" => Ok(EditSeverity::ContentChange),
            "unspecified" => Ok(EditSeverity::Unspecified),
            other => Err(format!("unknown edit severity '{other}'")),
        }
    }
}

/// Numeric part of a version string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    fields: Vec<u64>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            fields: vec![major, minor, patch],
        }
    }

    pub fn fields(&self) -> &[u64] {
        &self.fields
    }

    fn field(&self, i: usize) -> u64 {
        self.fields.get(i).copied().unwrap_or(0)
    }

    /// Next version for an edit of the given severity. Content changes bump
    /// minor and reset patch; anything else bumps patch.
    pub fn bumped(&self, severity: EditSeverity) -> Result<Self, VersionError> {
        let (major, minor, patch) = (self.field(0), self.field(1), self.field(2));
        let overflow = || VersionError::Overflow(self.to_string());
        match severity {
            EditSeverity::ContentChange => {
                Ok(Self::new(major, minor.checked_add(1).ok_or_else(overflow)?, 0))
            }
            EditSeverity::MetadataOnly | EditSeverity::Unspecified => {
                Ok(Self::new(major, minor, patch.checked_add(1).ok_or_else(overflow)?))
            }
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }
        let fields = s
            .split('.')
            .map(|f| {
                f.parse::<u64>().map_err(|_| VersionError::InvalidField {
                    version: s.to_owned(),
                    field: f.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, n) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{n}")?;
        }
        Ok(())
    }
}

/// Split a version string into its numeric part and in-progress marker.
pub fn split_in_progress(version: &str) -> (&str, Option<&str>) {
    match version.find('+') {
        Some(i) => (version[..i].trim_end(), Some(&version[i..])),
        None => (version, None),
    }
}

pub fn is_in_progress(version: &str) -> bool {
    split_in_progress(version).1.is_some()
}

/// Apply the bump rule: a version carrying an in-progress marker loses the
/// marker and is bumped per `severity`; any other version is unchanged.
pub fn bump(version: &str, severity: EditSeverity) -> Result<String, VersionError> {
    match split_in_progress(version) {
        (_, None) => Ok(version.to_owned()),
        (base, Some(_)) => Ok(base.parse::<Version>()?.bumped(severity)?.to_string()),
    }
}

/// Replace dots so a version can appear in a bag name: `1.0.1` -> `1_0_1`.
pub fn underscored(version: &str) -> String {
    version.replace('.', "_")
}
