//! Per-file metadata extraction, inline or on a background worker.
//!
//! A `FileExaminer` owns at most one worker thread, started on the first
//! `enqueue` and fed through a channel. Callers that read per-file metadata
//! written by the worker must call `wait_for_idle` first.

use crate::CoreError;
use bagprep_store::{
    checksum_file_metadata, checksum_subject, extract_file_metadata, validate_checksum_file,
    BagError, MetadataTree,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// One file to examine.
#[derive(Debug, Clone)]
pub struct ExamineJob {
    /// Component path of the file within the bag.
    pub filepath: String,
    /// Where the file's bytes can be read.
    pub source: PathBuf,
    /// For a checksum side-file, where its subject can be read.
    pub subject_source: Option<PathBuf>,
}

/// Update the metadata for `job.filepath` from the file itself.
///
/// With `extract`, size, checksum and media type are recorded. A checksum
/// side-file is always validated against its subject: `valid` is set when
/// the subject can be read and removed when it cannot.
pub fn examine_file(tree: &MetadataTree, job: &ExamineJob, extract: bool) -> Result<(), BagError> {
    let mut md = match tree.get(&job.filepath)? {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    if extract {
        md.extend(extract_file_metadata(&job.source)?);
    }
    if let Some((subject, alg)) = checksum_subject(&job.filepath) {
        let valid = match &job.subject_source {
            Some(s) => validate_checksum_file(&job.source, s, alg)?,
            None => None,
        };
        md.extend(checksum_file_metadata(&job.filepath, subject, alg, valid));
        if valid.is_none() {
            md.remove("valid");
        }
        if valid == Some(false) {
            warn!("checksum file {} does not match {subject}", job.filepath);
        }
    }
    tree.put(&job.filepath, &Value::Object(md))?;
    debug!("examined {}", job.filepath);
    Ok(())
}

type Pending = Arc<(Mutex<usize>, Condvar)>;

pub struct FileExaminer {
    tree: MetadataTree,
    pending: Pending,
    tx: Option<Sender<ExamineJob>>,
    handle: Option<JoinHandle<()>>,
}

impl FileExaminer {
    pub fn new(tree: MetadataTree) -> Self {
        Self {
            tree,
            pending: Arc::new((Mutex::new(0), Condvar::new())),
            tx: None,
            handle: None,
        }
    }

    /// Queue a file for full extraction. The worker is started on first
    /// use; later calls reuse it.
    pub fn enqueue(&mut self, job: ExamineJob) -> Result<(), CoreError> {
        if self.tx.is_none() {
            self.start()?;
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| CoreError::State("file examiner is not running".to_owned()))?;
        self.adjust(1);
        if let Err(e) = tx.send(job) {
            self.adjust(-1);
            return Err(CoreError::State(format!(
                "file examiner stopped; could not queue {}",
                e.0.filepath
            )));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), CoreError> {
        let (tx, rx) = mpsc::channel::<ExamineJob>();
        let tree = self.tree.clone();
        let pending = Arc::clone(&self.pending);
        let handle = std::thread::Builder::new()
            .name("file-examiner".to_owned())
            .spawn(move || {
                for job in rx {
                    if let Err(e) = examine_file(&tree, &job, true) {
                        warn!("metadata extraction failed for {}: {e}", job.filepath);
                    }
                    let (count, cvar) = &*pending;
                    let mut n = count.lock().unwrap_or_else(PoisonError::into_inner);
                    *n = n.saturating_sub(1);
                    cvar.notify_all();
                }
            })?;
        self.tx = Some(tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn adjust(&self, delta: isize) {
        let (count, cvar) = &*self.pending;
        let mut n = count.lock().unwrap_or_else(PoisonError::into_inner);
        *n = n.saturating_add_signed(delta);
        cvar.notify_all();
    }

    /// Files queued but not yet examined.
    pub fn pending(&self) -> usize {
        *self.pending.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.pending() > 0
    }

    /// Block until every queued file has been examined.
    pub fn wait_for_idle(&self) {
        let (count, cvar) = &*self.pending;
        let mut n = count.lock().unwrap_or_else(PoisonError::into_inner);
        while *n > 0 {
            n = cvar.wait(n).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Fail if extraction is still outstanding.
    pub fn ensure_idle(&self) -> Result<(), CoreError> {
        match self.pending() {
            0 => Ok(()),
            n => Err(CoreError::Ordering(format!(
                "{n} file(s) still queued for metadata extraction"
            ))),
        }
    }
}

impl Drop for FileExaminer {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagprep_store::{sha256_file, BagLayout};
    use serde_json::json;
    use std::fs;

    fn test_examiner() -> (tempfile::TempDir, MetadataTree, FileExaminer) {
        let dir = tempfile::tempdir().unwrap();
        let layout = BagLayout::new(dir.path().join("bag"));
        fs::create_dir_all(layout.metadata_dir()).unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let tree = MetadataTree::new(layout, 4);
        let examiner = FileExaminer::new(tree.clone());
        (dir, tree, examiner)
    }

    fn job(dir: &tempfile::TempDir, path: &str, subject: Option<&str>) -> ExamineJob {
        ExamineJob {
            filepath: path.to_owned(),
            source: dir.path().join("src").join(path),
            subject_source: subject.map(|s| dir.path().join("src").join(s)),
        }
    }

    #[test]
    fn sync_extraction_merges_into_existing_record() {
        let (dir, tree, _ex) = test_examiner();
        fs::write(dir.path().join("src/a.json"), b"{\"a\": 1}").unwrap();
        tree.put("a.json", &json!({"filepath": "a.json", "title": "A"}))
            .unwrap();
        examine_file(&tree, &job(&dir, "a.json", None), true).unwrap();
        let md = tree.get("a.json").unwrap().unwrap();
        assert_eq!(md["title"], "A");
        assert_eq!(md["size"], 8);
        assert_eq!(md["mediaType"], "application/json");
    }

    #[test]
    fn sidefile_validation_without_extraction() {
        let (dir, tree, _ex) = test_examiner();
        let src = dir.path().join("src");
        fs::write(src.join("a.json"), b"data").unwrap();
        let hash = sha256_file(&src.join("a.json")).unwrap();
        fs::write(src.join("a.json.sha256"), format!("{hash}  a.json\n")).unwrap();

        examine_file(&tree, &job(&dir, "a.json.sha256", Some("a.json")), false).unwrap();
        let md = tree.get("a.json.sha256").unwrap().unwrap();
        assert_eq!(md["valid"], true);
        assert_eq!(md["describes"], "cmps/a.json");
        assert!(md.get("size").is_none());
    }

    #[test]
    fn sidefile_without_subject_is_unknown() {
        let (dir, tree, _ex) = test_examiner();
        fs::write(dir.path().join("src/b.json.sha256"), b"00ff").unwrap();
        tree.put("b.json.sha256", &json!({"valid": true})).unwrap();
        examine_file(&tree, &job(&dir, "b.json.sha256", None), true).unwrap();
        let md = tree.get("b.json.sha256").unwrap().unwrap();
        assert!(md.get("valid").is_none());
        assert_eq!(md["@type"][0], "nrdp:ChecksumFile");
    }

    #[test]
    fn empty_sidefile_clears_earlier_validity() {
        let (dir, tree, _ex) = test_examiner();
        let src = dir.path().join("src");
        fs::write(src.join("trial1.json"), b"{\"trial\": 1}").unwrap();
        fs::write(src.join("trial1.json.sha256"), b"").unwrap();
        tree.put("trial1.json.sha256", &json!({"valid": true})).unwrap();

        examine_file(
            &tree,
            &job(&dir, "trial1.json.sha256", Some("trial1.json")),
            true,
        )
        .unwrap();
        let md = tree.get("trial1.json.sha256").unwrap().unwrap();
        assert_eq!(md["valid"], false);
        assert_eq!(md["size"], 0);
    }

    #[test]
    fn queued_jobs_complete_after_wait() {
        let (dir, tree, mut ex) = test_examiner();
        for i in 0..20 {
            let name = format!("f{i}.txt");
            fs::write(dir.path().join("src").join(&name), name.as_bytes()).unwrap();
            ex.enqueue(job(&dir, &name, None)).unwrap();
        }
        ex.wait_for_idle();
        assert!(!ex.is_running());
        ex.ensure_idle().unwrap();
        for i in 0..20 {
            let md = tree.get(&format!("f{i}.txt")).unwrap().unwrap();
            assert!(md.get("checksum").is_some());
        }
    }

    #[test]
    fn failed_extraction_is_swallowed() {
        let (dir, tree, mut ex) = test_examiner();
        ex.enqueue(job(&dir, "missing.txt", None)).unwrap();
        ex.wait_for_idle();
        assert_eq!(ex.pending(), 0);
        assert!(tree.get("missing.txt").unwrap().is_none());
    }

    #[test]
    fn single_worker_is_reused() {
        let (dir, _tree, mut ex) = test_examiner();
        fs::write(dir.path().join("src/a.txt"), b"a").unwrap();
        ex.enqueue(job(&dir, "a.txt", None)).unwrap();
        let first = ex.handle.as_ref().unwrap().thread().id();
        ex.enqueue(job(&dir, "a.txt", None)).unwrap();
        assert_eq!(ex.handle.as_ref().unwrap().thread().id(), first);
        ex.wait_for_idle();
    }
}
