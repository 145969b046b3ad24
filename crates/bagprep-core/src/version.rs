use crate::CoreError;
use bagprep_schema::{bump, EditSeverity, DEFAULT_VERSION};
use bagprep_store::{read_json, BagLayout};
use serde_json::Value;

/// The version to stamp on a revision described by `record`.
///
/// A record with no version falls back to the version stored in
/// `prior_bag`'s resource record, then to the initial default. An
/// in-progress version loses its marker and is bumped per `severity`; any
/// other version is returned unchanged.
pub fn determine_updated_version(
    record: &Value,
    prior_bag: Option<&BagLayout>,
    severity: EditSeverity,
) -> Result<String, CoreError> {
    let version = match record.get("version").and_then(Value::as_str) {
        Some(v) if !v.trim().is_empty() => v.to_owned(),
        _ => prior_version(prior_bag)?.unwrap_or_else(|| DEFAULT_VERSION.to_owned()),
    };
    Ok(bump(&version, severity)?)
}

fn prior_version(prior_bag: Option<&BagLayout>) -> Result<Option<String>, CoreError> {
    let Some(layout) = prior_bag else {
        return Ok(None);
    };
    let file = layout.nerdm_file_for("");
    if !file.is_file() {
        return Ok(None);
    }
    Ok(read_json(&file)?
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_owned))
}
