//! A submission: the logical file set for one object, merged from an
//! editable review area and an upload area.
//!
//! Either root may be absent. When a path exists under both, the upload
//! copy wins. Entries whose name starts with `.` or `_` (such as the
//! embedded `_pod.json`) are reserved and never offered as data files.

use crate::CoreError;
use bagprep_schema::{ComponentKind, ObjectId};
use bagprep_store::read_json;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Name of the POD record a submission area may carry at its root.
pub const POD_FILENAME: &str = "_pod.json";

#[derive(Debug, Clone)]
pub struct SubmissionSource {
    id: ObjectId,
    review_dir: Option<PathBuf>,
    upload_dir: Option<PathBuf>,
    pod: Option<Value>,
    nerd: Option<Value>,
}

impl SubmissionSource {
    pub fn new(id: &str, review_dir: Option<PathBuf>, upload_dir: Option<PathBuf>) -> Self {
        Self {
            id: ObjectId::new(id),
            review_dir,
            upload_dir,
            pod: None,
            nerd: None,
        }
    }

    /// A submission whose id and starting record come from a POD file.
    pub fn from_pod(
        pod_file: &Path,
        review_dir: Option<PathBuf>,
        upload_dir: Option<PathBuf>,
    ) -> Result<Self, CoreError> {
        let pod = read_json(pod_file)?;
        let id = pod
            .get("identifier")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::State(format!("POD record has no identifier: {}", pod_file.display()))
            })?
            .to_owned();
        let mut sip = Self::new(&id, review_dir, upload_dir);
        sip.pod = Some(pod);
        Ok(sip)
    }

    /// A submission whose id and starting record come from a NERDm file.
    /// The id is the record's `ediid`, falling back to `@id`.
    pub fn from_nerd(
        nerd_file: &Path,
        review_dir: Option<PathBuf>,
        upload_dir: Option<PathBuf>,
    ) -> Result<Self, CoreError> {
        let nerd = read_json(nerd_file)?;
        let id = ["ediid", "@id"]
            .iter()
            .find_map(|k| nerd.get(*k).and_then(Value::as_str))
            .ok_or_else(|| {
                CoreError::State(format!("NERDm record has no identifier: {}", nerd_file.display()))
            })?
            .to_owned();
        let mut sip = Self::new(&id, review_dir, upload_dir);
        sip.nerd = Some(nerd);
        Ok(sip)
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn review_dir(&self) -> Option<&Path> {
        self.review_dir.as_deref()
    }

    pub fn upload_dir(&self) -> Option<&Path> {
        self.upload_dir.as_deref()
    }

    /// The configured roots that exist, review first.
    pub fn input_dirs(&self) -> Vec<&Path> {
        [self.review_dir.as_deref(), self.upload_dir.as_deref()]
            .into_iter()
            .flatten()
            .filter(|d| d.is_dir())
            .collect()
    }

    /// The POD file shipped with the submission, upload copy first.
    pub fn pod_file(&self) -> Option<PathBuf> {
        [self.upload_dir.as_deref(), self.review_dir.as_deref()]
            .into_iter()
            .flatten()
            .map(|d| d.join(POD_FILENAME))
            .find(|f| f.is_file())
    }

    pub fn pod(&self) -> Option<&Value> {
        self.pod.as_ref()
    }

    pub fn nerd(&self) -> Option<&Value> {
        self.nerd.as_ref()
    }

    pub fn set_pod(&mut self, pod: Value) {
        self.pod = Some(pod);
    }

    pub fn set_nerd(&mut self, nerd: Value) {
        self.nerd = Some(nerd);
    }

    /// The POD record, or an empty one.
    pub fn pod_record(&self) -> Value {
        self.pod
            .clone()
            .unwrap_or_else(|| json!({"distribution": []}))
    }

    /// The current resource record, or an empty one.
    pub fn nerdm_record(&self) -> Value {
        self.nerd.clone().unwrap_or_else(|| json!({"components": []}))
    }

    /// Every data file in the submission, keyed by relative path.
    pub fn available_files(&self) -> Result<BTreeMap<String, PathBuf>, CoreError> {
        let mut files = BTreeMap::new();
        for root in self.input_dirs() {
            for entry in WalkDir::new(root)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_reserved(e))
            {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let rel = bagprep_store::layout::rel_path_string(rel);
                files.insert(rel, entry.into_path());
            }
        }
        Ok(files)
    }

    /// The available files that the current record declares as data-file or
    /// checksum-file components.
    pub fn registered_files(&self) -> Result<BTreeMap<String, PathBuf>, CoreError> {
        let declared = self.declared_filepaths()?;
        if declared.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut files = self.available_files()?;
        files.retain(|path, _| declared.contains(path));
        Ok(files)
    }

    /// `filepath`s of the file components in the current record.
    pub fn declared_filepaths(&self) -> Result<Vec<String>, CoreError> {
        let Some(nerd) = &self.nerd else {
            return Ok(Vec::new());
        };
        let Some(comps) = nerd.get("components").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for comp in comps {
            if !ComponentKind::of(comp)?.is_file() {
                continue;
            }
            if let Some(fp) = comp.get("filepath").and_then(Value::as_str) {
                out.push(fp.to_owned());
            }
        }
        out.sort();
        Ok(out)
    }
}

fn is_reserved(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with('.') || n.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// review/: trial1.json, trial2.json, trial3/trial3a.json, _pod.json, .hidden
    /// upload/: trial3/trial3a.json (override), trial1.json.sha256
    fn test_sip() -> (tempfile::TempDir, SubmissionSource) {
        let dir = tempfile::tempdir().unwrap();
        let rev = dir.path().join("review");
        let upl = dir.path().join("upload");
        fs::create_dir_all(rev.join("trial3")).unwrap();
        fs::create_dir_all(upl.join("trial3")).unwrap();
        fs::write(rev.join("trial1.json"), b"{}").unwrap();
        fs::write(rev.join("trial2.json"), b"[]").unwrap();
        fs::write(rev.join("trial3/trial3a.json"), b"old").unwrap();
        fs::write(rev.join(POD_FILENAME), br#"{"identifier": "mds2-1491"}"#).unwrap();
        fs::write(rev.join(".hidden"), b"x").unwrap();
        fs::write(upl.join("trial3/trial3a.json"), b"new").unwrap();
        fs::write(upl.join("trial1.json.sha256"), b"abc").unwrap();
        let sip = SubmissionSource::new("mds2-1491", Some(rev), Some(upl));
        (dir, sip)
    }

    #[test]
    fn empty_defaults() {
        let sip = SubmissionSource::new("mds2-1491", None, None);
        assert!(sip.input_dirs().is_empty());
        assert!(sip.pod().is_none());
        assert!(sip.nerd().is_none());
        assert_eq!(sip.pod_record(), json!({"distribution": []}));
        assert_eq!(sip.nerdm_record(), json!({"components": []}));
        assert!(sip.available_files().unwrap().is_empty());
        assert!(sip.registered_files().unwrap().is_empty());
    }

    #[test]
    fn available_files_merge_with_upload_precedence() {
        let (dir, sip) = test_sip();
        let files = sip.available_files().unwrap();
        assert_eq!(
            files.keys().collect::<Vec<_>>(),
            vec!["trial1.json", "trial1.json.sha256", "trial2.json", "trial3/trial3a.json"]
        );
        assert_eq!(
            files["trial3/trial3a.json"],
            dir.path().join("upload/trial3/trial3a.json")
        );
        assert_eq!(files["trial1.json"], dir.path().join("review/trial1.json"));
    }

    #[test]
    fn missing_root_is_skipped() {
        let (dir, _) = test_sip();
        let sip = SubmissionSource::new(
            "mds2-1491",
            Some(dir.path().join("review")),
            Some(dir.path().join("nowhere")),
        );
        assert_eq!(sip.input_dirs().len(), 1);
        assert_eq!(sip.available_files().unwrap().len(), 3);
    }

    #[test]
    fn registered_files_follow_record() {
        let (_dir, mut sip) = test_sip();
        sip.set_nerd(json!({
            "components": [
                {"@type": ["nrdp:DataFile"], "filepath": "trial1.json"},
                {"@type": ["nrdp:ChecksumFile"], "filepath": "trial1.json.sha256"},
                {"@type": ["nrdp:DataFile"], "filepath": "gone.json"},
                {"@type": ["nrdp:Subcollection"], "filepath": "trial3"},
                {"@type": ["nrdp:AccessPage"], "accessURL": "https://example.com"}
            ]
        }));
        let files = sip.registered_files().unwrap();
        assert_eq!(
            files.keys().collect::<Vec<_>>(),
            vec!["trial1.json", "trial1.json.sha256"]
        );
        assert_eq!(
            sip.declared_filepaths().unwrap(),
            vec!["gone.json", "trial1.json", "trial1.json.sha256"]
        );
    }

    #[test]
    fn from_pod_takes_identifier() {
        let (dir, _) = test_sip();
        let rev = dir.path().join("review");
        let sip = SubmissionSource::from_pod(&rev.join(POD_FILENAME), Some(rev.clone()), None).unwrap();
        assert_eq!(sip.id().as_str(), "mds2-1491");
        assert!(sip.nerd().is_none());
        assert_eq!(sip.nerdm_record(), json!({"components": []}));
        assert_eq!(sip.pod_file(), Some(rev.join(POD_FILENAME)));
    }

    #[test]
    fn from_nerd_prefers_ediid() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("nerdm.json");
        fs::write(&f, br#"{"@id": "ark:/88434/mds2-1491", "ediid": "1491"}"#).unwrap();
        let sip = SubmissionSource::from_nerd(&f, None, None).unwrap();
        assert_eq!(sip.id().as_str(), "1491");
        assert!(sip.pod().is_none());
        assert_eq!(sip.pod_record(), json!({"distribution": []}));
    }

    #[test]
    fn from_pod_without_identifier_fails() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("pod.json");
        fs::write(&f, b"{}").unwrap();
        assert!(matches!(
            SubmissionSource::from_pod(&f, None, None),
            Err(CoreError::State(_))
        ));
    }
}
