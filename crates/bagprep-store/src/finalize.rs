//! BagIt tag files and the multibag index.

use crate::checksum::sha256_file;
use crate::layout::{rel_path_string, BagLayout, DATA_DIR};
use crate::{write_atomic, BagError};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const BAGIT_VERSION: &str = "1.0";
pub const MANIFEST_ALG: &str = "sha256";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagSummary {
    pub payload_files: usize,
    pub payload_bytes: u64,
    pub tag_files: usize,
}

/// Every regular file under `dir`, as `(bag-relative path, absolute path)`
/// pairs sorted by path.
pub(crate) fn collect_files(root: &Path, dir: &Path) -> Result<Vec<(String, PathBuf)>, BagError> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BagError::Io(std::io::Error::other(format!("path strip: {e}"))))?;
        files.push((rel_path_string(rel), entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Names listed in `multibag/member-bags.tsv`, in order. Missing table is
/// an empty list.
pub fn read_member_bags(layout: &BagLayout) -> Result<Vec<String>, BagError> {
    let path = layout.member_bags_file();
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|l| l.split('\t').next())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
        .collect())
}

/// `multibag/file-lookup.tsv` as a map from `data/<path>` to the member bag
/// that holds it.
pub fn read_file_lookup(layout: &BagLayout) -> Result<BTreeMap<String, String>, BagError> {
    let path = layout.file_lookup_file();
    let mut lookup = BTreeMap::new();
    if !path.is_file() {
        return Ok(lookup);
    }
    for line in fs::read_to_string(path)?.lines() {
        if let Some((file, bag)) = line.split_once('\t') {
            lookup.insert(file.to_owned(), bag.trim().to_owned());
        }
    }
    Ok(lookup)
}

/// Write `bagit.txt`, `bag-info.txt`, the payload manifest, the multibag
/// member and file-lookup tables, and finally the tag manifest.
///
/// Member and lookup tables already in the bag (carried over from earlier
/// versions) are extended: this bag is appended to the members, and its
/// payload files point at it in the lookup.
///
/// `info` supplies extra `bag-info.txt` fields written after the computed ones.
pub fn write_tag_files(
    layout: &BagLayout,
    bag_name: &str,
    info: &BTreeMap<String, String>,
) -> Result<TagSummary, BagError> {
    let root = layout.root();
    let payload = collect_files(root, &layout.data_dir())?;

    let mut summary = TagSummary {
        payload_files: payload.len(),
        ..TagSummary::default()
    };

    let mut members = read_member_bags(layout)?;
    members.retain(|m| m != bag_name);
    members.push(bag_name.to_owned());
    let mut lookup = read_file_lookup(layout)?;

    let mut manifest = String::new();
    for (rel, abs) in &payload {
        summary.payload_bytes += fs::metadata(abs)?.len();
        let hash = sha256_file(abs)?;
        let _ = writeln!(manifest, "{hash}  {rel}");
        lookup.insert(rel.clone(), bag_name.to_owned());
    }
    write_atomic(&layout.manifest_file(MANIFEST_ALG), manifest.as_bytes())?;

    write_atomic(
        &layout.bagit_file(),
        format!("BagIt-Version: {BAGIT_VERSION}\nTag-File-Character-Encoding: UTF-8\n").as_bytes(),
    )?;

    let mut bag_info = String::new();
    let _ = writeln!(
        bag_info,
        "Bagging-Date: {}",
        chrono::Utc::now().format("%Y-%m-%d")
    );
    let _ = writeln!(
        bag_info,
        "Payload-Oxum: {}.{}",
        summary.payload_bytes, summary.payload_files
    );
    let _ = writeln!(bag_info, "Bag-Size: {}", human_size(summary.payload_bytes));
    for (k, v) in info {
        if matches!(k.as_str(), "Bagging-Date" | "Payload-Oxum" | "Bag-Size") {
            continue;
        }
        let _ = writeln!(bag_info, "{k}: {v}");
    }
    write_atomic(&layout.bag_info_file(), bag_info.as_bytes())?;

    fs::create_dir_all(layout.multibag_dir())?;
    let mut member_table = String::new();
    for m in &members {
        let _ = writeln!(member_table, "{m}");
    }
    write_atomic(&layout.member_bags_file(), member_table.as_bytes())?;
    let mut lookup_table = String::new();
    for (file, bag) in &lookup {
        let _ = writeln!(lookup_table, "{file}\t{bag}");
    }
    write_atomic(&layout.file_lookup_file(), lookup_table.as_bytes())?;

    let mut tagmanifest = String::new();
    for (rel, abs) in collect_files(root, root)? {
        if rel.starts_with(&format!("{DATA_DIR}/")) || rel.starts_with("tagmanifest-") {
            continue;
        }
        let hash = sha256_file(&abs)?;
        let _ = writeln!(tagmanifest, "{hash}  {rel}");
        summary.tag_files += 1;
    }
    write_atomic(&layout.tagmanifest_file(MANIFEST_ALG), tagmanifest.as_bytes())?;

    Ok(summary)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_bag() -> (tempfile::TempDir, BagLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = BagLayout::new(dir.path().join("goober.1_0_0.mbag0_4-0"));
        fs::create_dir_all(layout.data_dir().join("trial3")).unwrap();
        fs::create_dir_all(layout.metadata_dir()).unwrap();
        fs::write(layout.payload_path("trial1.json"), b"{}").unwrap();
        fs::write(layout.payload_path("trial3/trial3a.json"), b"[1,2]").unwrap();
        fs::write(layout.nerdm_file_for(""), b"{}").unwrap();
        (dir, layout)
    }

    #[test]
    fn writes_all_tag_files() {
        let (_dir, layout) = fixture_bag();
        let mut info = BTreeMap::new();
        info.insert("Multibag-Version".to_owned(), "0.4".to_owned());
        let summary = write_tag_files(&layout, &layout.name(), &info).unwrap();

        assert_eq!(summary.payload_files, 2);
        assert_eq!(summary.payload_bytes, 7);
        assert!(layout.bagit_file().is_file());
        assert!(layout.member_bags_file().is_file());

        let bag_info = fs::read_to_string(layout.bag_info_file()).unwrap();
        assert!(bag_info.contains("Payload-Oxum: 7.2\n"));
        assert!(bag_info.contains("Multibag-Version: 0.4\n"));

        let manifest = fs::read_to_string(layout.manifest_file("sha256")).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("  data/trial1.json"));
        assert!(lines[1].ends_with("  data/trial3/trial3a.json"));

        let lookup = fs::read_to_string(layout.file_lookup_file()).unwrap();
        assert!(lookup.contains("data/trial1.json\tgoober.1_0_0.mbag0_4-0\n"));
    }

    #[test]
    fn prior_multibag_tables_are_extended() {
        let (_dir, layout) = fixture_bag();
        fs::create_dir_all(layout.multibag_dir()).unwrap();
        fs::write(
            layout.member_bags_file(),
            "goober.1_0_0.mbag0_4-0\ngoober.1_0_1.mbag0_4-1\n",
        )
        .unwrap();
        fs::write(
            layout.file_lookup_file(),
            "data/old.csv\tgoober.1_0_0.mbag0_4-0\ndata/trial1.json\tgoober.1_0_1.mbag0_4-1\n",
        )
        .unwrap();

        write_tag_files(&layout, "goober.1_0_2.mbag0_4-2", &BTreeMap::new()).unwrap();
        assert_eq!(
            read_member_bags(&layout).unwrap(),
            vec![
                "goober.1_0_0.mbag0_4-0",
                "goober.1_0_1.mbag0_4-1",
                "goober.1_0_2.mbag0_4-2"
            ]
        );
        let lookup = read_file_lookup(&layout).unwrap();
        assert_eq!(lookup["data/old.csv"], "goober.1_0_0.mbag0_4-0");
        assert_eq!(lookup["data/trial1.json"], "goober.1_0_2.mbag0_4-2");
        assert_eq!(lookup["data/trial3/trial3a.json"], "goober.1_0_2.mbag0_4-2");
    }

    #[test]
    fn rewriting_does_not_repeat_member() {
        let (_dir, layout) = fixture_bag();
        write_tag_files(&layout, "b", &BTreeMap::new()).unwrap();
        write_tag_files(&layout, "b", &BTreeMap::new()).unwrap();
        assert_eq!(read_member_bags(&layout).unwrap(), vec!["b"]);
    }

    #[test]
    fn tagmanifest_covers_non_payload_files() {
        let (_dir, layout) = fixture_bag();
        write_tag_files(&layout, "b", &BTreeMap::new()).unwrap();
        let tm = fs::read_to_string(layout.tagmanifest_file("sha256")).unwrap();
        assert!(tm.contains("  bagit.txt\n"));
        assert!(tm.contains("  bag-info.txt\n"));
        assert!(tm.contains("  manifest-sha256.txt\n"));
        assert!(tm.contains("  metadata/nerdm.json\n"));
        assert!(tm.contains("  multibag/file-lookup.tsv\n"));
        assert!(!tm.contains("data/"));
        assert!(!tm.contains("tagmanifest-"));
    }

    #[test]
    fn computed_fields_not_overridden() {
        let (_dir, layout) = fixture_bag();
        let mut info = BTreeMap::new();
        info.insert("Payload-Oxum".to_owned(), "0.0".to_owned());
        write_tag_files(&layout, "b", &info).unwrap();
        let bag_info = fs::read_to_string(layout.bag_info_file()).unwrap();
        assert_eq!(bag_info.matches("Payload-Oxum").count(), 1);
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(7), "7 B");
        assert_eq!(human_size(1_500), "1.5 KB");
        assert_eq!(human_size(2_000_000), "2.0 MB");
    }
}
