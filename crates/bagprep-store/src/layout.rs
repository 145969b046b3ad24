use crate::BagError;
use std::path::{Component, Path, PathBuf};

pub const DATA_DIR: &str = "data";
pub const METADATA_DIR: &str = "metadata";
pub const MULTIBAG_DIR: &str = "multibag";
pub const NERDM_FILENAME: &str = "nerdm.json";
pub const ANNOT_FILENAME: &str = "annot.json";
pub const POD_FILENAME: &str = "pod.json";
pub const BAGIT_FILENAME: &str = "bagit.txt";
pub const BAG_INFO_FILENAME: &str = "bag-info.txt";
pub const MEMBER_BAGS_FILENAME: &str = "member-bags.tsv";
pub const FILE_LOOKUP_FILENAME: &str = "file-lookup.tsv";

/// Directory layout of a single bag.
///
/// The payload lives under `data/`, and every payload path has a mirrored
/// directory under `metadata/` holding `nerdm.json` and, optionally,
/// `annot.json`. The empty path names the whole-resource record.
#[derive(Debug, Clone)]
pub struct BagLayout {
    root: PathBuf,
}

impl BagLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The bag's name, i.e. the final component of its root directory.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[inline]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    #[inline]
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    #[inline]
    pub fn multibag_dir(&self) -> PathBuf {
        self.root.join(MULTIBAG_DIR)
    }

    pub fn payload_path(&self, path: &str) -> PathBuf {
        join_rel(&self.data_dir(), path)
    }

    pub fn metadata_dir_for(&self, path: &str) -> PathBuf {
        join_rel(&self.metadata_dir(), path)
    }

    pub fn nerdm_file_for(&self, path: &str) -> PathBuf {
        self.metadata_dir_for(path).join(NERDM_FILENAME)
    }

    pub fn annot_file_for(&self, path: &str) -> PathBuf {
        self.metadata_dir_for(path).join(ANNOT_FILENAME)
    }

    #[inline]
    pub fn pod_file(&self) -> PathBuf {
        self.metadata_dir().join(POD_FILENAME)
    }

    #[inline]
    pub fn log_file(&self, log_filename: &str) -> PathBuf {
        self.root.join(log_filename)
    }

    #[inline]
    pub fn bagit_file(&self) -> PathBuf {
        self.root.join(BAGIT_FILENAME)
    }

    #[inline]
    pub fn bag_info_file(&self) -> PathBuf {
        self.root.join(BAG_INFO_FILENAME)
    }

    pub fn manifest_file(&self, alg: &str) -> PathBuf {
        self.root.join(format!("manifest-{alg}.txt"))
    }

    pub fn tagmanifest_file(&self, alg: &str) -> PathBuf {
        self.root.join(format!("tagmanifest-{alg}.txt"))
    }

    #[inline]
    pub fn member_bags_file(&self) -> PathBuf {
        self.multibag_dir().join(MEMBER_BAGS_FILENAME)
    }

    #[inline]
    pub fn file_lookup_file(&self) -> PathBuf {
        self.multibag_dir().join(FILE_LOOKUP_FILENAME)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        let mut name = self.root.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

fn join_rel(base: &Path, path: &str) -> PathBuf {
    if path.is_empty() {
        base.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Reject paths that are absolute or climb out of the bag with `..`.
pub fn validate_rel_path(path: &str) -> Result<(), BagError> {
    for comp in Path::new(path).components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(BagError::Validation(format!(
                    "path escapes the bag root: {path}"
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BagError::Validation(format!(
                    "path must be relative: {path}"
                )))
            }
        }
    }
    Ok(())
}

/// Convert a relative filesystem path into the `/`-separated form used in
/// metadata `filepath` values and manifests.
pub fn rel_path_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = BagLayout::new("/tmp/bags/mds2-1491");
        assert_eq!(layout.name(), "mds2-1491");
        assert_eq!(layout.data_dir(), PathBuf::from("/tmp/bags/mds2-1491/data"));
        assert_eq!(
            layout.payload_path("trial3/trial3a.json"),
            PathBuf::from("/tmp/bags/mds2-1491/data/trial3/trial3a.json")
        );
        assert_eq!(
            layout.nerdm_file_for("trial1.json"),
            PathBuf::from("/tmp/bags/mds2-1491/metadata/trial1.json/nerdm.json")
        );
        assert_eq!(
            layout.annot_file_for("trial1.json"),
            PathBuf::from("/tmp/bags/mds2-1491/metadata/trial1.json/annot.json")
        );
        assert_eq!(
            layout.manifest_file("sha256"),
            PathBuf::from("/tmp/bags/mds2-1491/manifest-sha256.txt")
        );
        assert_eq!(
            layout.file_lookup_file(),
            PathBuf::from("/tmp/bags/mds2-1491/multibag/file-lookup.tsv")
        );
        assert_eq!(layout.lock_file(), PathBuf::from("/tmp/bags/mds2-1491.lock"));
    }

    #[test]
    fn empty_path_names_resource_record() {
        let layout = BagLayout::new("/b");
        assert_eq!(layout.nerdm_file_for(""), PathBuf::from("/b/metadata/nerdm.json"));
        assert_eq!(layout.pod_file(), PathBuf::from("/b/metadata/pod.json"));
        assert_eq!(layout.payload_path(""), PathBuf::from("/b/data"));
    }

    #[test]
    fn validate_accepts_nested_relative() {
        validate_rel_path("trial3/trial3a.json").unwrap();
        validate_rel_path("./a").unwrap();
        validate_rel_path("").unwrap();
    }

    #[test]
    fn validate_rejects_absolute_and_escaping() {
        assert!(matches!(
            validate_rel_path("/etc/passwd"),
            Err(BagError::Validation(_))
        ));
        assert!(matches!(
            validate_rel_path("../outside"),
            Err(BagError::Validation(_))
        ));
        assert!(matches!(
            validate_rel_path("a/../../b"),
            Err(BagError::Validation(_))
        ));
    }

    #[test]
    fn rel_path_string_uses_forward_slashes() {
        assert_eq!(rel_path_string(Path::new("a/b/c.txt")), "a/b/c.txt");
        assert_eq!(rel_path_string(Path::new("./a")), "a");
    }
}
