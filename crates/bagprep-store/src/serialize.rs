//! Serialized bags: deterministic tar archives with a single root directory.

use crate::{fsync_dir, BagError};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const SERIALIZED_EXT: &str = "tar";

/// Whether `path` looks like a serialized bag rather than a bag directory.
pub fn is_serialized_bag(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|e| e == SERIALIZED_EXT)
}

/// Write `<dest_dir>/<name>.tar` holding the bag at `bagdir` under the root
/// entry `<name>/`.
///
/// Determinism guarantees:
/// - Entries sorted lexicographically by relative path
/// - All timestamps set to 0 (Unix epoch)
/// - All ownership set to 0:0
pub fn serialize_bag(bagdir: &Path, dest_dir: &Path) -> Result<PathBuf, BagError> {
    if !bagdir.is_dir() {
        return Err(BagError::State(format!(
            "bag directory does not exist: {}",
            bagdir.display()
        )));
    }
    let name = bagdir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BagError::State(format!("bag path has no name: {}", bagdir.display())))?;
    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(format!("{name}.{SERIALIZED_EXT}"));

    let mut entries = Vec::new();
    for entry in WalkDir::new(bagdir).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(bagdir)
            .map_err(|e| BagError::Io(std::io::Error::other(format!("path strip: {e}"))))?;
        entries.push((format!("{name}/{}", crate::layout::rel_path_string(rel)), entry.into_path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let tmp = NamedTempFile::new_in(dest_dir)?;
    {
        let mut ar = tar::Builder::new(BufWriter::new(tmp.as_file()));
        ar.follow_symlinks(false);
        append_dir(&mut ar, &format!("{name}/"), bagdir)?;
        for (rel, full) in &entries {
            let ft = full.symlink_metadata()?.file_type();
            if ft.is_file() {
                append_file(&mut ar, rel, full)?;
            } else if ft.is_dir() {
                append_dir(&mut ar, &format!("{rel}/"), full)?;
            } else {
                warn!("skipping unsupported file type: {rel}");
            }
        }
        let mut out = ar.into_inner()?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(&dest).map_err(|e| BagError::Io(e.error))?;
    fsync_dir(dest_dir)?;
    debug!("serialized {} to {}", bagdir.display(), dest.display());
    Ok(dest)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, BagError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), BagError> {
    let file = File::open(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_size(file.metadata()?.len());
    header.set_cksum();
    ar.append_data(&mut header, rel_path, file)?;
    Ok(())
}

fn append_dir<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), BagError> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_data(&mut header, rel_path, &[] as &[u8])?;
    Ok(())
}

/// Unpack a serialized bag so that its single root directory becomes `dest`.
///
/// `dest` must not exist and its parent must. An archive with no entries,
/// or with anything other than exactly one top-level directory, is a state
/// error and leaves nothing behind.
pub fn unpack_bag_as(archive: &Path, dest: &Path) -> Result<PathBuf, BagError> {
    if dest.exists() {
        return Err(BagError::State(format!(
            "destination already exists: {}",
            dest.display()
        )));
    }
    let parent = dest
        .parent()
        .filter(|p| p.is_dir())
        .ok_or_else(|| {
            BagError::State(format!(
                "destination's parent directory does not exist: {}",
                dest.display()
            ))
        })?;

    let staging = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(parent)?;
    let mut ar = tar::Archive::new(File::open(archive)?);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(staging.path())?;

    let mut roots = Vec::new();
    for entry in fs::read_dir(staging.path())? {
        roots.push(entry?.path());
    }
    let root = match roots.as_slice() {
        [] => {
            return Err(BagError::State(format!(
                "serialized bag is empty: {}",
                archive.display()
            )))
        }
        [only] if only.is_dir() => only.clone(),
        [only] => {
            return Err(BagError::State(format!(
                "serialized bag root is not a directory: {}",
                only.display()
            )))
        }
        _ => {
            return Err(BagError::State(format!(
                "serialized bag has {} top-level entries, expected 1: {}",
                roots.len(),
                archive.display()
            )))
        }
    };
    fs::rename(&root, dest)?;
    fsync_dir(parent)?;
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_bag(parent: &Path, name: &str) -> PathBuf {
        let bag = parent.join(name);
        fs::create_dir_all(bag.join("data/sub")).unwrap();
        fs::create_dir_all(bag.join("metadata")).unwrap();
        fs::write(bag.join("data/sub/a.txt"), b"alpha").unwrap();
        fs::write(bag.join("metadata/nerdm.json"), b"{}").unwrap();
        fs::write(bag.join("bagit.txt"), b"BagIt-Version: 1.0\n").unwrap();
        bag
    }

    #[test]
    fn serialize_then_unpack_under_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let bag = fixture_bag(dir.path(), "mds2-1491.1_0_0.mbag0_4-0");
        let out = dir.path().join("out");
        let archive = serialize_bag(&bag, &out).unwrap();
        assert_eq!(
            archive.file_name().unwrap(),
            "mds2-1491.1_0_0.mbag0_4-0.tar"
        );
        assert!(is_serialized_bag(&archive));

        let dest = dir.path().join("mds2-1491");
        unpack_bag_as(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("data/sub/a.txt")).unwrap(), b"alpha");
        assert!(dest.join("metadata/nerdm.json").is_file());
        // staging directory cleaned up
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".unpack-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn serialization_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let bag = fixture_bag(dir.path(), "bag");
        let a = serialize_bag(&bag, &dir.path().join("a")).unwrap();
        let b = serialize_bag(&bag, &dir.path().join("b")).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn unpack_rejects_existing_dest() {
        let dir = tempfile::tempdir().unwrap();
        let bag = fixture_bag(dir.path(), "bag");
        let archive = serialize_bag(&bag, &dir.path().join("out")).unwrap();
        assert!(matches!(
            unpack_bag_as(&archive, &bag),
            Err(BagError::State(_))
        ));
    }

    #[test]
    fn unpack_rejects_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("empty.tar");
        let ar = tar::Builder::new(File::create(&archive).unwrap());
        ar.into_inner().unwrap();
        let err = unpack_bag_as(&archive, &dir.path().join("dest")).unwrap_err();
        assert!(matches!(err, BagError::State(ref m) if m.contains("empty")));
        assert!(!dir.path().join("dest").exists());
    }

    #[test]
    fn unpack_rejects_multiple_roots() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("two.tar");
        let mut ar = tar::Builder::new(File::create(&archive).unwrap());
        for name in ["one/a.txt", "two/b.txt"] {
            let mut header = tar::Header::new_gnu();
            header.set_size(1);
            header.set_mode(0o644);
            header.set_cksum();
            ar.append_data(&mut header, name, &b"x"[..]).unwrap();
        }
        ar.into_inner().unwrap();
        assert!(matches!(
            unpack_bag_as(&archive, &dir.path().join("dest")),
            Err(BagError::State(_))
        ));
    }
}
