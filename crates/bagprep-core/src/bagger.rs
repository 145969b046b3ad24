//! The `MetadataBagger`: builds and maintains the working bag for one
//! submission, then assembles the preservation bag from it.
//!
//! The working bag lives at `<bag_parent>/<local id>` and is held under an
//! exclusive lock on `<bagdir>.lock` from `ensure_base_bag` until `done`.
//! Per-file metadata may be filled in by a background `FileExaminer`; every
//! operation that reads the assembled record waits for it first.

use crate::concurrency::{shutdown_requested, BagLock};
use crate::convert::{BasicPodConverter, PodConverter};
use crate::examine::{examine_file, ExamineJob, FileExaminer};
use crate::prepupd::{UpdatePrepService, UpdateSource};
use crate::sip::SubmissionSource;
use crate::version::determine_updated_version;
use crate::CoreError;
use bagprep_schema::nerdm::init_resource_record;
use bagprep_schema::version::{is_in_progress, underscored};
use bagprep_schema::{merge_into, ComponentKind, EditSeverity, ExamineMode, PrepConfig, DEFAULT_VERSION};
use bagprep_store::extract::{checksum_value, read_checksum_file};
use bagprep_store::layout::{rel_path_string, DATA_DIR};
use bagprep_store::{
    checksum_subject, read_file_lookup, read_json, read_member_bags, verify_bag,
    write_json_atomic, write_tag_files, BagBuilder, BagLayout, MetadataTree,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Per-path file holding the bagger's own bookkeeping. It never leaves the
/// working bag.
pub const BAGGER_MD_FILENAME: &str = "__bagger.json";

/// Name of a preservation bag: `<name>.<version>.mbag<mbag version>-<seq>`,
/// with dots in both versions replaced by underscores.
pub fn form_bag_name(name: &str, seq: u32, version: &str, mbag_version: &str) -> String {
    format!(
        "{name}.{}.mbag{}-{seq}",
        underscored(version),
        underscored(mbag_version)
    )
}

pub struct MetadataBagger {
    sip: SubmissionSource,
    bag_parent: PathBuf,
    config: PrepConfig,
    builder: BagBuilder,
    tree: MetadataTree,
    examiner: FileExaminer,
    converter: Box<dyn PodConverter>,
    prepsvc: Option<UpdatePrepService>,
    datafiles: Option<BTreeMap<String, PathBuf>>,
    lock: Option<BagLock>,
}

impl MetadataBagger {
    /// A bagger for `sip` whose working bag will be created under
    /// `bag_parent`. Nothing is written until `ensure_base_bag`.
    pub fn new(
        sip: SubmissionSource,
        bag_parent: impl Into<PathBuf>,
        config: PrepConfig,
    ) -> Result<Self, CoreError> {
        let bag_parent = bag_parent.into();
        fs::create_dir_all(&bag_parent)?;
        let name = sip.id().local_name().to_owned();
        let builder = BagBuilder::new(&bag_parent, &name, config.bag_builder.clone())?;
        let tree = builder.metadata_tree();
        let examiner = FileExaminer::new(tree.clone());
        Ok(Self {
            sip,
            bag_parent,
            config,
            builder,
            tree,
            examiner,
            converter: Box::new(BasicPodConverter),
            prepsvc: None,
            datafiles: None,
            lock: None,
        })
    }

    /// Seed new working bags from the object's prior history.
    #[must_use]
    pub fn with_update_service(mut self, svc: UpdatePrepService) -> Self {
        self.prepsvc = Some(svc);
        self
    }

    #[must_use]
    pub fn with_converter(mut self, converter: Box<dyn PodConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn name(&self) -> &str {
        self.builder.name()
    }

    pub fn bagdir(&self) -> &Path {
        self.builder.bagdir()
    }

    pub fn bag_parent(&self) -> &Path {
        &self.bag_parent
    }

    pub fn sip(&self) -> &SubmissionSource {
        &self.sip
    }

    pub fn builder(&self) -> &BagBuilder {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut BagBuilder {
        &mut self.builder
    }

    pub fn examiner(&self) -> &FileExaminer {
        &self.examiner
    }

    /// The registered data files, as of the last registry refresh.
    pub fn datafiles(&self) -> Option<&BTreeMap<String, PathBuf>> {
        self.datafiles.as_ref()
    }

    /// Lock the working bag and make sure it exists with a resource record.
    ///
    /// A missing bag is seeded from the update service when one is set;
    /// otherwise, or when the object has no history, a default record is
    /// written.
    pub fn ensure_base_bag(&mut self) -> Result<(), CoreError> {
        if self.lock.is_none() {
            let lock_path = self.builder.layout().lock_file();
            let lock = BagLock::try_acquire(&lock_path)?.ok_or_else(|| {
                CoreError::Lock(format!(
                    "bag {} is in use by another process",
                    self.bagdir().display()
                ))
            })?;
            self.lock = Some(lock);
        }

        let bagdir = self.bagdir().to_path_buf();
        if !bagdir.exists() {
            if let Some(svc) = &self.prepsvc {
                let prepper = svc.prepper_for(self.sip.id().as_str(), None)?;
                match prepper.create_new_update(&bagdir)? {
                    UpdateSource::HeadBag(p) => {
                        info!("working bag seeded from head bag {}", p.display())
                    }
                    UpdateSource::Nerdm(_) => info!("working bag seeded from published record"),
                    UpdateSource::None => debug!("no prior history for {}", self.sip.id()),
                }
            }
        }
        self.builder.ensure_bag_structure()?;

        if !self.tree.exists("") {
            let id = self.sip.id().as_str();
            let mut rec = init_resource_record(id, DEFAULT_VERSION);
            if let Value::Object(m) = &mut rec {
                m.insert("ediid".into(), json!(id));
            }
            self.builder.add_res_nerd(&rec, false)?;
        }

        let mut desc = Map::new();
        desc.insert(
            "data_directory".into(),
            serde_json::to_value(self.sip.review_dir())?,
        );
        desc.insert(
            "upload_directory".into(),
            serde_json::to_value(self.sip.upload_dir())?,
        );
        desc.insert("bag_parent".into(), serde_json::to_value(&self.bag_parent)?);
        desc.insert(
            "bagger_config".into(),
            serde_json::to_value(&self.config.bag_builder)?,
        );
        self.update_bagger_metadata_for("", &desc)?;

        if self.datafiles.is_none() {
            self.refresh_registry()?;
        }
        Ok(())
    }

    pub fn baggermd_file_for(&self, path: &str) -> PathBuf {
        self.builder
            .layout()
            .metadata_dir_for(path)
            .join(BAGGER_MD_FILENAME)
    }

    /// The bagger's bookkeeping for `path`, empty if none was recorded.
    pub fn baggermd_for(&self, path: &str) -> Result<Map<String, Value>, CoreError> {
        let file = self.baggermd_file_for(path);
        if !file.is_file() {
            return Ok(Map::new());
        }
        match read_json(&file)? {
            Value::Object(m) => Ok(m),
            other => Err(bagprep_schema::NerdError::type_error(
                "object",
                &other,
                "bagger metadata",
            )
            .into()),
        }
    }

    /// Merge `fields` into the bookkeeping for `path`.
    pub fn update_bagger_metadata_for(
        &mut self,
        path: &str,
        fields: &Map<String, Value>,
    ) -> Result<Map<String, Value>, CoreError> {
        self.builder.ensure_metadata_dirs(path)?;
        let mut md = Value::Object(self.baggermd_for(path)?);
        merge_into(&mut md, &Value::Object(fields.clone()));
        write_json_atomic(
            &self.baggermd_file_for(path),
            &md,
            self.config.bag_builder.json_indent,
        )?;
        match md {
            Value::Object(m) => Ok(m),
            _ => Ok(Map::new()),
        }
    }

    /// Apply the submission's POD record, if it has one.
    pub fn ensure_res_metadata(&mut self, force: bool) -> Result<(), CoreError> {
        self.ensure_base_bag()?;
        let pod = match (self.sip.pod(), self.sip.pod_file()) {
            (Some(pod), _) => Some(pod.clone()),
            (None, Some(file)) => Some(read_json(&file)?),
            (None, None) => None,
        };
        match pod {
            Some(pod) => self.apply_pod(&pod, force),
            None => Ok(()),
        }
    }

    /// Convert `pod` and make it the basis of the working bag's metadata.
    ///
    /// Without `force`, a POD identical to the one last applied is ignored.
    /// The record's identity and version history survive, as does metadata
    /// already gathered for files the POD still declares. Files it no longer
    /// declares, and collections left empty, are removed.
    pub fn apply_pod(&mut self, pod: &Value, force: bool) -> Result<(), CoreError> {
        self.ensure_base_bag()?;
        self.examiner.wait_for_idle();
        let podfile = self.builder.layout().pod_file();
        if !force && podfile.is_file() && read_json(&podfile)? == *pod {
            debug!("POD unchanged; not reapplying");
            self.sip.set_pod(pod.clone());
            return Ok(());
        }
        self.builder.add_ds_pod(pod)?;

        let existing = match self.tree.get("")? {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        };
        let id = existing
            .get("@id")
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.sip.id().as_str())
            .to_owned();
        let mut rec = match self.converter.convert(pod, &id)? {
            Value::Object(m) => m,
            other => {
                return Err(
                    bagprep_schema::NerdError::type_error("object", &other, "converted POD").into(),
                )
            }
        };
        for key in ["@id", "version", "versionHistory"] {
            if let Some(v) = existing.get(key) {
                rec.insert(key.to_owned(), v.clone());
            }
        }
        for (k, v) in &existing {
            if k != "components" && !rec.contains_key(k) {
                rec.insert(k.clone(), v.clone());
            }
        }

        let mut declared = BTreeSet::new();
        if let Some(Value::Array(comps)) = rec.get_mut("components") {
            for comp in comps.iter_mut() {
                if !ComponentKind::of(comp)?.is_file() {
                    continue;
                }
                let Some(fp) = comp.get("filepath").and_then(Value::as_str) else {
                    continue;
                };
                let fp = fp.to_owned();
                if let Some(mut prior) = self.tree.get(&fp)? {
                    merge_into(&mut prior, comp);
                    *comp = prior;
                }
                declared.insert(fp);
            }
        }
        self.remove_undeclared(&declared)?;

        self.builder.add_res_nerd(&Value::Object(rec), true)?;
        self.sip.set_pod(pod.clone());
        self.refresh_registry()?;
        Ok(())
    }

    fn remove_undeclared(&mut self, declared: &BTreeSet<String>) -> Result<(), CoreError> {
        let mut colls = Vec::new();
        for path in self.tree.list()? {
            let Some(md) = self.tree.get(&path)? else {
                continue;
            };
            match ComponentKind::of(&md)? {
                kind if kind.is_file() => {
                    if !declared.contains(&path) {
                        info!("removing metadata for undeclared file {path}");
                        self.builder.remove_component(&path)?;
                    }
                }
                ComponentKind::Subcollection => colls.push(path),
                _ => {}
            }
        }
        for coll in colls.into_iter().rev() {
            let prefix = format!("{coll}/");
            if !declared.iter().any(|f| f.starts_with(&prefix)) && self.tree.exists(&coll) {
                info!("removing empty collection {coll}");
                self.builder.remove_component(&coll)?;
            }
        }
        Ok(())
    }

    /// The full resource record: the root view plus every component's view.
    pub fn assembled_record(&self) -> Result<Value, CoreError> {
        let mut root = self
            .tree
            .effective("")?
            .ok_or_else(|| CoreError::State("working bag has no resource record".to_owned()))?;
        let mut comps = match root.get("components") {
            Some(Value::Array(c)) => c.clone(),
            _ => Vec::new(),
        };
        for path in self.tree.list()? {
            if let Some(md) = self.tree.effective(&path)? {
                comps.push(md);
            }
        }
        if let Value::Object(m) = &mut root {
            m.insert("components".into(), Value::Array(comps));
        }
        Ok(root)
    }

    /// Re-read the assembled record into the submission and recompute the
    /// registered data files.
    pub fn refresh_registry(&mut self) -> Result<(), CoreError> {
        let rec = self.assembled_record()?;
        self.sip.set_nerd(rec);
        self.datafiles = Some(self.sip.registered_files()?);
        Ok(())
    }

    /// Make sure every registered data file has metadata, extracting per
    /// `mode`. Checksum side-files are always validated against their
    /// subjects. After a shutdown request no further files are started.
    pub fn ensure_data_files(&mut self, mode: ExamineMode) -> Result<(), CoreError> {
        self.ensure_base_bag()?;
        if self.datafiles.is_none() {
            self.refresh_registry()?;
        }
        let files = self.datafiles.clone().unwrap_or_default();
        // No job may be in flight while records are rewritten here.
        self.examiner.wait_for_idle();

        for path in files.keys() {
            if !self.tree.exists(path) {
                self.builder.init_filemd_for(path, true, None)?;
            }
        }
        if mode == ExamineMode::Async {
            for (path, src) in &files {
                if let Some((subject, alg)) = checksum_subject(path) {
                    self.prefill_subject_checksum(subject, alg, src);
                }
            }
        }

        let mut handled = 0;
        for (path, src) in &files {
            if shutdown_requested() {
                warn!("shutdown requested; {} file(s) left unexamined", files.len() - handled);
                break;
            }
            let side = checksum_subject(path);
            let job = ExamineJob {
                filepath: path.clone(),
                source: src.clone(),
                subject_source: side.and_then(|(subject, _)| files.get(subject).cloned()),
            };
            match mode {
                ExamineMode::Off => {
                    if side.is_some() {
                        if let Err(e) = examine_file(&self.tree, &job, false) {
                            warn!("unable to validate checksum file {path}: {e}");
                        }
                    }
                }
                ExamineMode::Sync => {
                    if let Err(e) = examine_file(&self.tree, &job, true) {
                        warn!("metadata extraction failed for {path}: {e}");
                    }
                }
                ExamineMode::Async => self.examiner.enqueue(job)?,
            }
            handled += 1;
        }
        self.builder
            .record(&format!("Ensured metadata for {handled} data file(s)"))?;
        Ok(())
    }

    /// Record the digest a side-file carries as its subject's checksum, so
    /// the subject has one before background extraction reaches it.
    fn prefill_subject_checksum(
        &self,
        subject: &str,
        alg: bagprep_store::ChecksumAlgorithm,
        sidefile: &Path,
    ) {
        match self.tree.get(subject) {
            Ok(Some(md)) if md.get("checksum").is_none() => {}
            _ => return,
        }
        match read_checksum_file(sidefile) {
            Ok(hash) => {
                let mut fields = Map::new();
                fields.insert("checksum".into(), checksum_value(alg, &hash));
                if let Err(e) = self.tree.update(subject, &fields) {
                    warn!("unable to record checksum for {subject}: {e}");
                }
            }
            Err(e) => warn!("unable to read checksum file for {subject}: {e}"),
        }
    }

    /// Write sub-collection metadata for every folder holding a declared file.
    pub fn ensure_subcoll_metadata(&mut self) -> Result<(), CoreError> {
        self.ensure_base_bag()?;
        let mut folders = BTreeSet::new();
        for fp in self.sip.declared_filepaths()? {
            let mut parent = Path::new(&fp).parent();
            while let Some(dir) = parent.filter(|d| !d.as_os_str().is_empty()) {
                folders.insert(rel_path_string(dir));
                parent = dir.parent();
            }
        }
        for folder in folders {
            if !self.tree.exists(&folder) {
                self.builder.init_collmd_for(&folder, true)?;
            }
        }
        Ok(())
    }

    /// Merge the POD, then ensure file and collection metadata.
    pub fn prepare(&mut self, mode: ExamineMode) -> Result<(), CoreError> {
        self.ensure_res_metadata(false)?;
        self.ensure_data_files(mode)?;
        self.ensure_subcoll_metadata()
    }

    /// Block until background extraction is done, then refresh the registry.
    pub fn wait_for_examiner(&mut self) -> Result<(), CoreError> {
        self.examiner.wait_for_idle();
        self.refresh_registry()
    }

    /// Resolve and record the version of this revision. Calling it again
    /// without further edits changes nothing.
    pub fn finalize_version(&mut self, severity: EditSeverity) -> Result<String, CoreError> {
        self.examiner.wait_for_idle();
        let root = self
            .tree
            .effective("")?
            .ok_or_else(|| CoreError::State("working bag has no resource record".to_owned()))?;
        let edited = root
            .get("version")
            .and_then(Value::as_str)
            .is_some_and(is_in_progress);
        let version = determine_updated_version(&root, None, severity)?;

        let mut history = match root.get("versionHistory") {
            Some(Value::Array(h)) => h.clone(),
            _ => Vec::new(),
        };
        let mut fields = Map::new();
        fields.insert("version".into(), json!(version));
        let last = history
            .last()
            .and_then(|h| h.get("version"))
            .and_then(Value::as_str);
        if last != Some(version.as_str()) {
            let description = if history.is_empty() && !edited {
                "initial release"
            } else {
                severity.description()
            };
            history.push(json!({
                "version": version,
                "issued": chrono::Utc::now().format("%Y-%m-%d").to_string(),
                "description": description,
            }));
            fields.insert("versionHistory".into(), Value::Array(history));
        }

        self.tree.update("", &fields)?;
        self.tree
            .remove_annot_keys("", &["version", "versionHistory"])?;
        self.builder
            .record(&format!("Finalized version {version}"))?;
        Ok(version)
    }

    /// Assemble a complete preservation bag under `dest_parent` from the
    /// working bag and the submission's files. Returns its path.
    pub fn make_preservation_bag(&mut self, dest_parent: &Path) -> Result<PathBuf, CoreError> {
        self.ensure_base_bag()?;
        self.examiner.ensure_idle()?;
        self.refresh_registry()?;
        self.check_declared_files()?;
        let version = self.finalize_version(self.config.edit_severity)?;

        fs::create_dir_all(dest_parent)?;
        let name = self.name().to_owned();
        let prior_members = read_member_bags(self.builder.layout())?;
        let seq = next_sequence(dest_parent, &name)?.max(next_member_sequence(&prior_members, &name));
        let bagname = form_bag_name(&name, seq, &version, &self.config.mbag_version);
        let dest = BagLayout::new(dest_parent.join(&bagname));
        if dest.root().exists() {
            return Err(CoreError::State(format!(
                "preservation bag already exists: {}",
                dest.root().display()
            )));
        }
        fs::create_dir(dest.root())?;
        fs::create_dir(dest.data_dir())?;

        self.copy_metadata(&dest)?;
        self.copy_payload(&dest)?;

        let mut info = self.config.bag_builder.init_bag_info.clone();
        info.insert("Multibag-Version".into(), self.config.mbag_version.clone());
        info.insert("Multibag-Head-Version".into(), version.clone());
        info.insert("Multibag-Tag-Directory".into(), "multibag".into());
        info.insert("External-Identifier".into(), self.sip.id().to_string());
        let summary = write_tag_files(&dest, &bagname, &info)?;

        let report = verify_bag(&dest)?;
        if let Some(first) = report.failed.first() {
            return Err(CoreError::State(format!(
                "preservation bag {bagname} failed verification ({} problem(s)); {}: {}",
                report.failed.len(),
                first.path,
                first.reason
            )));
        }
        self.builder.record(&format!(
            "Assembled preservation bag {bagname} ({} payload file(s))",
            summary.payload_files
        ))?;
        Ok(dest.root().to_path_buf())
    }

    /// Every declared file must be available: in the submission, already in
    /// the working payload, or held by an earlier member bag.
    fn check_declared_files(&self) -> Result<(), CoreError> {
        let layout = self.builder.layout();
        let prior = read_file_lookup(layout)?;
        let registered = self.datafiles.as_ref();
        let missing: Vec<String> = self
            .sip
            .declared_filepaths()?
            .into_iter()
            .filter(|fp| {
                !(registered.is_some_and(|f| f.contains_key(fp))
                    || layout.payload_path(fp).is_file()
                    || prior.contains_key(&format!("{DATA_DIR}/{fp}")))
            })
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(CoreError::Validation(format!(
            "{} declared data file(s) not found in the submission or earlier bags: {}",
            missing.len(),
            missing.join(", ")
        )))
    }

    /// Effective metadata views, the POD, the log, the multibag tables
    /// carried from earlier versions and any extra tag directories.
    /// Overlays and bagger bookkeeping stay behind.
    fn copy_metadata(&self, dest: &BagLayout) -> Result<(), CoreError> {
        let indent = self.config.bag_builder.json_indent;
        let src = self.builder.layout();
        let mut paths = vec![String::new()];
        paths.extend(self.tree.list()?);
        for path in paths {
            if let Some(md) = self.tree.effective(&path)? {
                fs::create_dir_all(dest.metadata_dir_for(&path))?;
                write_json_atomic(&dest.nerdm_file_for(&path), &md, indent)?;
            }
        }
        if src.pod_file().is_file() {
            fs::copy(src.pod_file(), dest.pod_file())?;
        }
        if src.multibag_dir().is_dir() {
            copy_files(&src.multibag_dir(), &dest.multibag_dir(), false, false)?;
        }
        let log = src.log_file(&self.config.bag_builder.log_filename);
        if log.is_file() {
            fs::copy(&log, dest.log_file(&self.config.bag_builder.log_filename))?;
        }
        for extra in &self.config.bag_builder.extra_tag_dirs {
            let dir = src.root().join(extra);
            if dir.is_dir() {
                copy_files(&dir, &dest.root().join(extra), false, false)?;
            }
        }
        Ok(())
    }

    /// Payload already in the working bag, then the registered submission
    /// files, which take precedence.
    fn copy_payload(&self, dest: &BagLayout) -> Result<(), CoreError> {
        let copy_ok = self.config.bag_builder.copy_on_link_failure;
        copy_files(&self.builder.layout().data_dir(), &dest.data_dir(), true, copy_ok)?;
        if let Some(files) = &self.datafiles {
            for (path, src) in files {
                let target = dest.payload_path(path);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                if target.exists() {
                    fs::remove_file(&target)?;
                }
                link_or_copy(src, &target, copy_ok)?;
            }
        }
        Ok(())
    }

    /// Release the activity log and the bag lock.
    pub fn done(&mut self) {
        self.examiner.wait_for_idle();
        self.builder.release();
        self.lock = None;
    }
}

/// The sequence number of a preservation bag (or its archive) named for
/// `name`.
fn bag_sequence(fname: &str, name: &str) -> Option<u32> {
    let rest = fname.strip_prefix(name)?.strip_prefix('.')?;
    if !rest.contains(".mbag") {
        return None;
    }
    let stem = rest.split_once(".tar").map_or(rest, |(s, _)| s);
    stem.rsplit_once('-').and_then(|(_, n)| n.parse::<u32>().ok())
}

/// One more than the highest sequence number among the existing
/// preservation bags for `name` in `dir`, or 0.
fn next_sequence(dir: &Path, name: &str) -> Result<u32, CoreError> {
    let mut next = 0;
    for entry in fs::read_dir(dir)? {
        let fname = entry?.file_name();
        if let Some(seq) = fname.to_str().and_then(|f| bag_sequence(f, name)) {
            next = next.max(seq + 1);
        }
    }
    Ok(next)
}

/// One more than the highest sequence among earlier member bags, or 0.
fn next_member_sequence(members: &[String], name: &str) -> u32 {
    members
        .iter()
        .filter_map(|m| bag_sequence(m, name))
        .map(|seq| seq + 1)
        .max()
        .unwrap_or(0)
}

fn link_or_copy(src: &Path, dest: &Path, copy_on_failure: bool) -> Result<(), CoreError> {
    match fs::hard_link(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if copy_on_failure => {
            debug!("unable to link {}: {e}; copying", src.display());
            fs::copy(src, dest)?;
            Ok(())
        }
        Err(e) => Err(CoreError::State(format!(
            "unable to link {} into preservation bag: {e}",
            src.display()
        ))),
    }
}

fn copy_files(src: &Path, dest: &Path, link: bool, copy_on_failure: bool) -> Result<(), CoreError> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if link {
                link_or_copy(entry.path(), &target, copy_on_failure)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bagger() -> (tempfile::TempDir, MetadataBagger) {
        let dir = tempfile::tempdir().unwrap();
        let review = dir.path().join("review");
        fs::create_dir_all(&review).unwrap();
        fs::write(review.join("trial1.json"), b"{\"a\": 1}").unwrap();
        let sip = SubmissionSource::new("mds2-1491", Some(review), None);
        let bagger = MetadataBagger::new(sip, dir.path().join("work"), PrepConfig::default()).unwrap();
        (dir, bagger)
    }

    #[test]
    fn bag_names() {
        assert_eq!(form_bag_name("goober", 3, "1.0.1", "1.2"), "goober.1_0_1.mbag1_2-3");
        assert_eq!(
            form_bag_name("mds2-1491", 0, "1.0.0", "0.4"),
            "mds2-1491.1_0_0.mbag0_4-0"
        );
    }

    #[test]
    fn sequence_follows_existing_bags() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_sequence(dir.path(), "goober").unwrap(), 0);
        fs::create_dir(dir.path().join("goober.1_0_0.mbag0_4-0")).unwrap();
        fs::write(dir.path().join("goober.1_0_1.mbag0_4-4.tar"), b"").unwrap();
        fs::create_dir(dir.path().join("gooberish.1_0_0.mbag0_4-9")).unwrap();
        assert_eq!(next_sequence(dir.path(), "goober").unwrap(), 5);
    }

    #[test]
    fn sequence_continues_after_member_bags() {
        let members = vec![
            "goober.1_0_0.mbag0_4-0".to_owned(),
            "goober.1_0_1.mbag0_4-2".to_owned(),
            "other.1_0_0.mbag0_4-7".to_owned(),
        ];
        assert_eq!(next_member_sequence(&members, "goober"), 3);
        assert_eq!(next_member_sequence(&[], "goober"), 0);
    }

    #[test]
    fn base_bag_has_default_record_and_descriptor() {
        let (dir, mut bagger) = test_bagger();
        bagger.ensure_base_bag().unwrap();
        let root = bagger.tree.get("").unwrap().unwrap();
        assert_eq!(root["@id"], "mds2-1491");
        assert_eq!(root["version"], DEFAULT_VERSION);

        let md = bagger.baggermd_for("").unwrap();
        assert_eq!(md["data_directory"], json!(dir.path().join("review")));
        assert!(md["upload_directory"].is_null());
        assert!(bagger.baggermd_file_for("").ends_with("metadata/__bagger.json"));

        let mut extra = Map::new();
        extra.insert("note".into(), json!("x"));
        let merged = bagger.update_bagger_metadata_for("", &extra).unwrap();
        assert_eq!(merged["note"], "x");
        assert!(merged.contains_key("bag_parent"));
    }

    #[test]
    fn second_bagger_is_locked_out() {
        let (dir, mut bagger) = test_bagger();
        bagger.ensure_base_bag().unwrap();
        let sip = SubmissionSource::new("mds2-1491", None, None);
        let mut other = MetadataBagger::new(sip, dir.path().join("work"), PrepConfig::default()).unwrap();
        assert!(matches!(other.ensure_base_bag(), Err(CoreError::Lock(_))));

        bagger.done();
        other.ensure_base_bag().unwrap();
        assert!(dir.path().join("work/mds2-1491.lock").exists());
    }

    #[test]
    fn finalize_is_idempotent() {
        let (_dir, mut bagger) = test_bagger();
        bagger.ensure_base_bag().unwrap();
        let mut edit = Map::new();
        edit.insert("version".into(), json!("1.0.0+ (in edit)"));
        bagger.builder_mut().update_annotations_for("", &edit).unwrap();

        let v = bagger.finalize_version(EditSeverity::MetadataOnly).unwrap();
        assert_eq!(v, "1.0.1");
        let v2 = bagger.finalize_version(EditSeverity::MetadataOnly).unwrap();
        assert_eq!(v2, "1.0.1");

        let root = bagger.tree.effective("").unwrap().unwrap();
        assert_eq!(root["version"], "1.0.1");
        let hist = root["versionHistory"].as_array().unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0]["version"], "1.0.1");
        let annot = bagger.tree.get_annot("").unwrap().unwrap();
        assert!(annot.get("version").is_none());
    }
}
