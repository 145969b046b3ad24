//! On-disk bag construction for bagprep.
//!
//! This crate provides the storage layer: `BagLayout` for the payload and
//! metadata directory structure, `BagLog` for the per-bag activity log,
//! `MetadataTree` for atomic reads and writes of per-path metadata and
//! annotation overlays, `BagBuilder` for mutations that keep the payload and
//! metadata trees mirrored, plus checksum extraction, tag-file finalization,
//! bag verification, and deterministic tar serialization.

pub mod baglog;
pub mod builder;
pub mod checksum;
pub mod extract;
pub mod finalize;
pub mod layout;
pub mod metadata;
pub mod serialize;
pub mod verify;

pub use baglog::BagLog;
pub use builder::BagBuilder;
pub use checksum::{file_digest, sha256_file, ChecksumAlgorithm};
pub use extract::{
    checksum_file_metadata, checksum_subject, extract_file_metadata, validate_checksum_file,
};
pub use finalize::{read_file_lookup, read_member_bags, write_tag_files, TagSummary};
pub use layout::{validate_rel_path, BagLayout};
pub use metadata::MetadataTree;
pub use serialize::{serialize_bag, unpack_bag_as};
pub use verify::{verify_bag, BagReport, VerifyFailure};

use bagprep_schema::NerdError;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `content` atomically: write a temp file in the same
/// directory, sync it, rename it over the destination, then sync the directory.
pub fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), BagError> {
    let dir = dest
        .parent()
        .ok_or_else(|| BagError::State(format!("no parent directory for {}", dest.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| BagError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Serialize `value` as indented JSON and write it atomically to `dest`.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    dest: &Path,
    value: &T,
    indent: usize,
) -> Result<(), BagError> {
    let indent = " ".repeat(indent);
    let mut buf = Vec::new();
    let fmt = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    write_atomic(dest, &buf)
}

pub fn read_json(path: &Path) -> Result<serde_json::Value, BagError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, Error)]
pub enum BagError {
    #[error("bag I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("bag state error: {0}")]
    State(String),
    #[error("invalid bag path: {0}")]
    Validation(String),
    #[error(transparent)]
    Nerd(#[from] NerdError),
}

impl From<walkdir::Error> for BagError {
    fn from(e: walkdir::Error) -> Self {
        BagError::Io(std::io::Error::other(e))
    }
}
