use crate::checksum::sha256_file;
use crate::finalize::{collect_files, MANIFEST_ALG};
use crate::layout::{BagLayout, DATA_DIR};
use crate::BagError;
use std::collections::BTreeSet;
use std::fs;

#[derive(Debug, Default)]
pub struct BagReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<VerifyFailure>,
    pub tags_checked: usize,
    pub tags_passed: usize,
}

impl BagReport {
    pub fn is_valid(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct VerifyFailure {
    pub path: String,
    pub reason: String,
}

/// Parse `<hash>  <path>` manifest lines.
fn read_manifest(path: &std::path::Path) -> Result<Vec<(String, String)>, BagError> {
    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((hash, file)) = line.split_once(char::is_whitespace) else {
            return Err(BagError::Validation(format!(
                "malformed manifest line {} in {}",
                n + 1,
                path.display()
            )));
        };
        entries.push((hash.to_ascii_lowercase(), file.trim_start().to_owned()));
    }
    Ok(entries)
}

/// Re-hash every file listed in the payload and tag manifests, and flag
/// payload files that no manifest mentions.
pub fn verify_bag(layout: &BagLayout) -> Result<BagReport, BagError> {
    let mut report = BagReport::default();

    for required in [layout.bagit_file(), layout.bag_info_file()] {
        if !required.is_file() {
            report.failed.push(VerifyFailure {
                path: required
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                reason: "required tag file missing".to_owned(),
            });
        }
    }

    let manifest_path = layout.manifest_file(MANIFEST_ALG);
    if !manifest_path.is_file() {
        report.failed.push(VerifyFailure {
            path: format!("manifest-{MANIFEST_ALG}.txt"),
            reason: "payload manifest missing".to_owned(),
        });
        return Ok(report);
    }

    let manifest = read_manifest(&manifest_path)?;
    report.checked = manifest.len();
    let mut listed = BTreeSet::new();
    for (expected, rel) in &manifest {
        listed.insert(rel.clone());
        check_entry(layout, rel, expected, &mut report.failed, &mut report.passed);
    }

    for (rel, _) in collect_files(layout.root(), &layout.data_dir())? {
        if !listed.contains(&rel) {
            report.failed.push(VerifyFailure {
                path: rel,
                reason: "payload file not listed in manifest".to_owned(),
            });
        }
    }

    let tagmanifest_path = layout.tagmanifest_file(MANIFEST_ALG);
    if tagmanifest_path.is_file() {
        let tags = read_manifest(&tagmanifest_path)?;
        report.tags_checked = tags.len();
        for (expected, rel) in &tags {
            if rel.starts_with(&format!("{DATA_DIR}/")) {
                continue;
            }
            check_entry(layout, rel, expected, &mut report.failed, &mut report.tags_passed);
        }
    }

    Ok(report)
}

fn check_entry(
    layout: &BagLayout,
    rel: &str,
    expected: &str,
    failed: &mut Vec<VerifyFailure>,
    passed: &mut usize,
) {
    let abs = layout.root().join(rel);
    if !abs.is_file() {
        failed.push(VerifyFailure {
            path: rel.to_owned(),
            reason: "file missing".to_owned(),
        });
        return;
    }
    match sha256_file(&abs) {
        Ok(actual) if actual == expected => *passed += 1,
        Ok(actual) => failed.push(VerifyFailure {
            path: rel.to_owned(),
            reason: format!("checksum mismatch: got {actual}"),
        }),
        Err(e) => failed.push(VerifyFailure {
            path: rel.to_owned(),
            reason: format!("read error: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalize::write_tag_files;
    use std::collections::BTreeMap;

    fn finalized_bag() -> (tempfile::TempDir, BagLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = BagLayout::new(dir.path().join("bag"));
        fs::create_dir_all(layout.data_dir().join("sub")).unwrap();
        fs::create_dir_all(layout.metadata_dir()).unwrap();
        fs::write(layout.payload_path("a.txt"), b"alpha").unwrap();
        fs::write(layout.payload_path("sub/b.txt"), b"beta").unwrap();
        write_tag_files(&layout, "bag", &BTreeMap::new()).unwrap();
        (dir, layout)
    }

    #[test]
    fn clean_bag_passes() {
        let (_dir, layout) = finalized_bag();
        let report = verify_bag(&layout).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.passed, 2);
        assert!(report.tags_checked > 0);
        assert_eq!(report.tags_checked, report.tags_passed);
        assert!(report.is_valid());
    }

    #[test]
    fn corrupted_payload_detected() {
        let (_dir, layout) = finalized_bag();
        fs::write(layout.payload_path("a.txt"), b"tampered").unwrap();
        let report = verify_bag(&layout).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "data/a.txt");
        assert!(report.failed[0].reason.contains("mismatch"));
    }

    #[test]
    fn missing_and_unlisted_payload_detected() {
        let (_dir, layout) = finalized_bag();
        fs::remove_file(layout.payload_path("sub/b.txt")).unwrap();
        fs::write(layout.payload_path("extra.txt"), b"x").unwrap();
        let report = verify_bag(&layout).unwrap();
        let paths: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"data/sub/b.txt"));
        assert!(paths.contains(&"data/extra.txt"));
    }

    #[test]
    fn unfinalized_bag_reports_missing_tags() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BagLayout::new(dir.path());
        let report = verify_bag(&layout).unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.checked, 0);
        assert!(report.failed.iter().any(|f| f.path == "bagit.txt"));
    }

    #[test]
    fn malformed_manifest_is_error() {
        let (_dir, layout) = finalized_bag();
        fs::write(layout.manifest_file("sha256"), "nohashhere\n").unwrap();
        assert!(matches!(verify_bag(&layout), Err(BagError::Validation(_))));
    }
}
