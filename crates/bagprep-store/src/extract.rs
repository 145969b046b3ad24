//! Per-file metadata extraction and checksum side-file validation.
//!
//! A checksum side-file is named after its subject plus an algorithm
//! extension, e.g. `trial1.json.sha256` describes `trial1.json`. Its
//! content is the hex digest, optionally followed by whitespace and a name.

use crate::checksum::{file_digest, ChecksumAlgorithm};
use crate::BagError;
use bagprep_schema::nerdm::{
    component_id, CHECKSUMFILE_TYPE, DATAFILE_TYPE, DISTRIBUTION_TYPE, DOWNLOADABLE_TYPE,
    NERDPUB_DEF,
};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use tracing::warn;

/// NERDm `checksum` value for a digest.
pub fn checksum_value(alg: ChecksumAlgorithm, hash: &str) -> Value {
    json!({
        "algorithm": {"@type": "Thing", "tag": alg.tag()},
        "hash": hash,
    })
}

/// Size, SHA-256 checksum, and best-guess media type of a file.
pub fn extract_file_metadata(path: &Path) -> Result<Map<String, Value>, BagError> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(BagError::State(format!("not a regular file: {}", path.display())));
    }
    let hash = file_digest(path, ChecksumAlgorithm::Sha256)?;

    let mut out = Map::new();
    out.insert("size".into(), json!(meta.len()));
    out.insert(
        "checksum".into(),
        checksum_value(ChecksumAlgorithm::Sha256, &hash),
    );
    out.insert("mediaType".into(), json!(media_type_of(path)));
    Ok(out)
}

fn media_type_of(path: &Path) -> String {
    if checksum_subject(&path.to_string_lossy()).is_some() {
        return "text/plain".to_owned();
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned()
}

/// If `filepath` names a checksum side-file, return its subject's path and
/// the digest algorithm.
pub fn checksum_subject(filepath: &str) -> Option<(&str, ChecksumAlgorithm)> {
    let (subject, ext) = filepath.rsplit_once('.')?;
    let alg = ChecksumAlgorithm::ALL.into_iter().find(|a| a.tag() == ext)?;
    if subject.is_empty() || subject.ends_with('/') {
        return None;
    }
    Some((subject, alg))
}

/// The digest recorded in a side-file: its first whitespace-separated token.
pub fn read_checksum_file(sidefile: &Path) -> Result<String, BagError> {
    let content = fs::read_to_string(sidefile)?;
    content
        .split_whitespace()
        .next()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| {
            BagError::Validation(format!("empty checksum file: {}", sidefile.display()))
        })
}

/// Compare a side-file against the digest of its subject. `None` means the
/// subject is not available, so validity is unknown. A side-file that is
/// empty or unreadable never validates.
pub fn validate_checksum_file(
    sidefile: &Path,
    subject: &Path,
    alg: ChecksumAlgorithm,
) -> Result<Option<bool>, BagError> {
    if !subject.is_file() {
        return Ok(None);
    }
    let declared = match read_checksum_file(sidefile) {
        Ok(d) => d,
        Err(e) => {
            warn!("unusable checksum file {}: {e}", sidefile.display());
            return Ok(Some(false));
        }
    };
    let actual = file_digest(subject, alg)?;
    Ok(Some(declared == actual))
}

/// Metadata fields describing a checksum side-file at `filepath`.
pub fn checksum_file_metadata(
    filepath: &str,
    subject: &str,
    alg: ChecksumAlgorithm,
    valid: Option<bool>,
) -> Map<String, Value> {
    let mut md = Map::new();
    md.insert("@id".into(), json!(component_id(filepath)));
    md.insert(
        "@type".into(),
        json!([CHECKSUMFILE_TYPE, DOWNLOADABLE_TYPE, DISTRIBUTION_TYPE, DATAFILE_TYPE]),
    );
    md.insert("filepath".into(), json!(filepath));
    md.insert(
        "_extensionSchemas".into(),
        json!([format!("{NERDPUB_DEF}ChecksumFile")]),
    );
    md.insert("mediaType".into(), json!("text/plain"));
    md.insert("describes".into(), json!(component_id(subject)));
    md.insert(
        "algorithm".into(),
        json!({"@type": "Thing", "tag": alg.tag()}),
    );
    md.insert(
        "description".into(),
        json!(format!("{} checksum value for {subject}", alg.label())),
    );
    if let Some(v) = valid {
        md.insert("valid".into(), json!(v));
    }
    md
}
