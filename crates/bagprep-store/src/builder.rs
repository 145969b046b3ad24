//! Low-level construction of a single bag.
//!
//! `BagBuilder` owns the on-disk tree under `<parent>/<name>` while it holds
//! the bag's activity log. Every structural mutation keeps the payload tree
//! (`data/`) and metadata tree (`metadata/`) mirrored: a payload path always
//! has a metadata directory at the same relative path.

use crate::baglog::BagLog;
use crate::extract::extract_file_metadata;
use crate::layout::{validate_rel_path, BagLayout};
use crate::metadata::MetadataTree;
use crate::{write_json_atomic, BagError};
use bagprep_schema::nerdm::{
    check_schema, ensure_type_marker, init_coll_metadata, init_file_metadata, type_list,
    DATAFILE_TYPE, SUBCOLL_TYPE,
};
use bagprep_schema::{BuilderConfig, ComponentKind, NerdError};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct BagBuilder {
    name: String,
    layout: BagLayout,
    config: BuilderConfig,
    tree: MetadataTree,
    log: Option<BagLog>,
}

impl BagBuilder {
    /// Prepare to build the bag `<parent>/<name>`. Nothing is created yet;
    /// the parent workspace directory must already exist.
    pub fn new(parent: &Path, name: &str, config: BuilderConfig) -> Result<Self, BagError> {
        if !parent.is_dir() {
            return Err(BagError::State(format!(
                "bag workspace dir does not exist: {}",
                parent.display()
            )));
        }
        validate_bag_name(name)?;
        let layout = BagLayout::new(parent.join(name));
        let tree = MetadataTree::new(layout.clone(), config.json_indent);
        Ok(Self {
            name: name.to_owned(),
            layout,
            config,
            tree,
            log: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bagdir(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &BagLayout {
        &self.layout
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// A handle on the metadata tree that can be moved to another thread.
    pub fn metadata_tree(&self) -> MetadataTree {
        self.tree.clone()
    }

    pub fn log_is_attached(&self) -> bool {
        self.log.as_ref().is_some_and(BagLog::is_attached)
    }

    /// Create the bag root if needed and attach the activity log.
    pub fn ensure_bagdir(&mut self) -> Result<(), BagError> {
        let root = self.layout.root().to_path_buf();
        let mut created = false;
        if !root.exists() {
            fs::create_dir(&root).map_err(|e| {
                BagError::State(format!(
                    "unable to create bag directory {}: {e}",
                    root.display()
                ))
            })?;
            created = true;
        } else if !root.is_dir() {
            return Err(BagError::State(format!(
                "bag path exists but is not a directory: {}",
                root.display()
            )));
        }

        if !self.log_is_attached() {
            let logfile = self.layout.log_file(&self.config.log_filename);
            let log = BagLog::attach(&logfile).map_err(|e| {
                BagError::State(format!(
                    "insufficient permissions on bag directory {}: {e}",
                    root.display()
                ))
            })?;
            self.log = Some(log);
        }
        if created {
            self.record(&format!("Created bag with name, {}", self.name))?;
        }
        Ok(())
    }

    /// Idempotently create `data/`, `metadata/`, and any configured extra
    /// tag directories.
    pub fn ensure_bag_structure(&mut self) -> Result<(), BagError> {
        self.ensure_bagdir()?;
        let mut dirs = vec![self.layout.data_dir(), self.layout.metadata_dir()];
        for extra in &self.config.extra_tag_dirs {
            validate_rel_path(extra)?;
            dirs.push(self.layout.root().join(extra));
        }
        for dir in dirs {
            create_dirs(&dir)?;
        }
        Ok(())
    }

    /// Create the payload directories that will hold a data file at `path`,
    /// plus its mirrored metadata directory.
    pub fn ensure_payload_dirs(&mut self, path: &str) -> Result<(), BagError> {
        validate_rel_path(path)?;
        if !self.layout.data_dir().is_dir() {
            self.ensure_bag_structure()?;
        }
        if let Some(parent) = self.layout.payload_path(path).parent() {
            create_dirs(parent)?;
        }
        self.ensure_metadata_dirs(path)
    }

    /// Create the payload directory for a sub-collection at `path`, plus its
    /// mirrored metadata directory.
    pub fn ensure_coll_dirs(&mut self, path: &str) -> Result<(), BagError> {
        validate_rel_path(path)?;
        if !self.layout.data_dir().is_dir() {
            self.ensure_bag_structure()?;
        }
        create_dirs(&self.layout.payload_path(path))?;
        self.ensure_metadata_dirs(path)
    }

    pub fn ensure_metadata_dirs(&mut self, path: &str) -> Result<(), BagError> {
        validate_rel_path(path)?;
        if !self.layout.metadata_dir().is_dir() {
            self.ensure_bag_structure()?;
        }
        create_dirs(&self.layout.metadata_dir_for(path))
    }

    /// Register a data file at `path`. With a `source`, the payload is
    /// materialized by hard link or copy. With `initmd`, default metadata is
    /// written, enriched by extraction when the payload exists.
    pub fn add_data_file(
        &mut self,
        path: &str,
        source: Option<&Path>,
        hardlink: bool,
        initmd: bool,
    ) -> Result<(), BagError> {
        self.ensure_payload_dirs(path)?;

        if let Some(src) = source {
            let dest = self.layout.payload_path(path);
            if dest.exists() {
                fs::remove_file(&dest)?;
            }
            let mut linked = false;
            if hardlink {
                match fs::hard_link(src, &dest) {
                    Ok(()) => linked = true,
                    Err(e) if self.config.copy_on_link_failure => {
                        warn!("unable to create link for data file ({path}): {e}; copying");
                    }
                    Err(e) => {
                        return Err(BagError::State(format!(
                            "unable to create link for data file ({path}): {e}"
                        )))
                    }
                }
            }
            if !linked {
                fs::copy(src, &dest).map_err(|e| {
                    BagError::State(format!(
                        "unable to copy data file ({}) into bag ({}): {e}",
                        src.display(),
                        dest.display()
                    ))
                })?;
            }
            self.record(&format!("Added data file at {path}"))?;
        }

        if initmd {
            let payload = self.layout.payload_path(path);
            let examine = source.is_some().then_some(payload.as_path());
            self.init_filemd_for(path, true, examine)?;
        }
        Ok(())
    }

    /// Default metadata for a data file, optionally enriched by examining
    /// `examine`. Extraction failures are logged, never returned.
    pub fn init_filemd_for(
        &mut self,
        path: &str,
        write: bool,
        examine: Option<&Path>,
    ) -> Result<Value, BagError> {
        let mut md = init_file_metadata(path);
        if let Some(file) = examine {
            if file.is_file() {
                match extract_file_metadata(file) {
                    Ok(fields) => {
                        if let Value::Object(m) = &mut md {
                            m.extend(fields);
                        }
                    }
                    Err(e) => warn!("metadata extraction failed for {path}: {e}"),
                }
            } else {
                warn!("unable to examine data file {path}: doesn't exist yet");
            }
        }
        if write {
            return self.add_metadata_for_file(path, &md);
        }
        Ok(md)
    }

    pub fn init_collmd_for(&mut self, path: &str, write: bool) -> Result<Value, BagError> {
        let md = init_coll_metadata(path);
        if write {
            return self.add_metadata_for_coll(path, &md);
        }
        Ok(md)
    }

    /// Write metadata for the data file at `path`: caller fields over the
    /// default record, with the data-file type marker guaranteed.
    pub fn add_metadata_for_file(&mut self, path: &str, data: &Value) -> Result<Value, BagError> {
        let md = compose_component(path, data, init_file_metadata(path), DATAFILE_TYPE)?;
        self.ensure_metadata_dirs(path)?;
        self.tree.put(path, &md)?;
        debug!("wrote file metadata for {path}");
        Ok(md)
    }

    /// Write metadata for the sub-collection at `path`.
    pub fn add_metadata_for_coll(&mut self, path: &str, data: &Value) -> Result<Value, BagError> {
        let md = compose_component(path, data, init_coll_metadata(path), SUBCOLL_TYPE)?;
        self.ensure_coll_dirs(path)?;
        self.tree.put(path, &md)?;
        debug!("wrote collection metadata for {path}");
        Ok(md)
    }

    /// Write the whole-resource record. With `split_components`, every
    /// data-file and sub-collection component that names a `filepath` is
    /// moved out of `components` into its own per-path metadata file.
    pub fn add_res_nerd(&mut self, record: &Value, split_components: bool) -> Result<Value, BagError> {
        let Value::Object(_) = record else {
            return Err(NerdError::type_error("object", record, "NERDm Resource").into());
        };
        if let Err(e) = check_schema(record) {
            if self.config.ensure_nerdm_type_on_add {
                return Err(e.into());
            }
            warn!("provided NERDm data does not look like a Resource record: {e}");
        }

        let mut record = record.clone();
        let mut split = Vec::new();
        if let Some(comps) = record.get_mut("components") {
            let Value::Array(list) = comps else {
                return Err(NerdError::type_error("list", comps, "components").into());
            };
            if split_components {
                split = split_off_components(list)?;
            }
        }

        // nothing is written until every split component has been checked
        self.ensure_bag_structure()?;
        for (fp, kind, comp) in split {
            if kind == ComponentKind::Subcollection {
                self.add_metadata_for_coll(&fp, &comp)?;
            } else {
                self.add_metadata_for_file(&fp, &comp)?;
            }
        }
        self.tree.put("", &record)?;
        self.record("Wrote resource-level metadata")?;
        Ok(record)
    }

    /// Save the POD record as `metadata/pod.json`.
    pub fn add_ds_pod(&mut self, pod: &Value) -> Result<(), BagError> {
        if !pod.is_object() {
            return Err(NerdError::type_error("object", pod, "POD Dataset").into());
        }
        self.ensure_bag_structure()?;
        write_json_atomic(&self.layout.pod_file(), pod, self.config.json_indent)?;
        self.record("Wrote POD record")
    }

    /// Replace the annotation overlay for `path`. The base record is untouched.
    pub fn add_annotation_for(&mut self, path: &str, data: &Value) -> Result<(), BagError> {
        if !data.is_object() {
            return Err(NerdError::type_error("object", data, "Annotation data").into());
        }
        self.ensure_metadata_dirs(path)?;
        self.tree.put_annot(path, data)?;
        self.record(&format!("Updated annotations for {}", display_path(path)))
    }

    /// Merge `fields` into the base record for `path`.
    pub fn update_metadata_for(
        &mut self,
        path: &str,
        fields: &Map<String, Value>,
    ) -> Result<Value, BagError> {
        self.ensure_metadata_dirs(path)?;
        let md = self.tree.update(path, fields)?;
        self.record(&format!("Updated metadata for {}", display_path(path)))?;
        Ok(md)
    }

    /// Merge `fields` into the overlay for `path`.
    pub fn update_annotations_for(
        &mut self,
        path: &str,
        fields: &Map<String, Value>,
    ) -> Result<Value, BagError> {
        self.ensure_metadata_dirs(path)?;
        let md = self.tree.update_annot(path, fields)?;
        self.record(&format!("Updated annotations for {}", display_path(path)))?;
        Ok(md)
    }

    /// Metadata for `path`; with `merge_annots`, the effective view.
    pub fn nerdm_metadata_for(&self, path: &str, merge_annots: bool) -> Result<Option<Value>, BagError> {
        if merge_annots {
            self.tree.effective(path)
        } else {
            self.tree.get(path)
        }
    }

    pub fn annotations_metadata_for(&self, path: &str) -> Result<Option<Value>, BagError> {
        self.tree.get_annot(path)
    }

    /// Every component path that has a base record.
    pub fn component_paths(&self) -> Result<Vec<String>, BagError> {
        self.tree.list()
    }

    /// Delete the metadata subtree and payload for `path`, then prune parent
    /// directories left empty.
    pub fn remove_component(&mut self, path: &str) -> Result<(), BagError> {
        validate_rel_path(path)?;
        if path.is_empty() {
            return Err(BagError::Validation(
                "cannot remove the resource-level record".to_owned(),
            ));
        }
        self.tree.remove(path)?;
        let payload = self.layout.payload_path(path);
        if payload.is_dir() {
            fs::remove_dir_all(&payload)?;
        } else if payload.exists() {
            fs::remove_file(&payload)?;
        }
        prune_empty_parents(&self.layout.metadata_dir_for(path), &self.layout.metadata_dir())?;
        prune_empty_parents(&payload, &self.layout.data_dir())?;
        self.record(&format!("Removed component {path}"))
    }

    /// Append a message to the bag's activity log.
    pub fn record(&mut self, msg: &str) -> Result<(), BagError> {
        match self.log.as_mut() {
            Some(log) => log.record(msg),
            None => {
                tracing::info!("{msg}");
                Ok(())
            }
        }
    }

    /// Detach the activity log. Later structural calls reattach it.
    pub fn release(&mut self) {
        if let Some(mut log) = self.log.take() {
            log.detach();
        }
    }
}

impl Drop for BagBuilder {
    fn drop(&mut self) {
        self.release();
    }
}

fn validate_bag_name(name: &str) -> Result<(), BagError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(BagError::Validation(format!("invalid bag name: '{name}'")));
    }
    Ok(())
}

fn create_dirs(dir: &Path) -> Result<(), BagError> {
    fs::create_dir_all(dir).map_err(|e| {
        BagError::State(format!(
            "failed to create directory tree {}: {e}",
            dir.display()
        ))
    })
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "resource"
    } else {
        path
    }
}

/// Remove the data-file and sub-collection components that name a
/// `filepath` from `list`, keeping the order of the rest. When a path is
/// listed twice the first listing wins. Every removed component's path is
/// checked.
fn split_off_components(
    list: &mut Vec<Value>,
) -> Result<Vec<(String, ComponentKind, Value)>, BagError> {
    let mut kept = Vec::with_capacity(list.len());
    let mut split = Vec::new();
    for comp in list.drain(..).rev() {
        let kind = ComponentKind::of(&comp)?;
        if !kind.is_split() {
            kept.push(comp);
            continue;
        }
        let Some(fp) = comp.get("filepath").and_then(Value::as_str) else {
            let id = comp.get("@id").and_then(Value::as_str).unwrap_or("?");
            warn!("{kind:?} component missing 'filepath' property ({id})");
            kept.push(comp);
            continue;
        };
        if fp.trim_matches('/').is_empty() {
            return Err(BagError::Validation(format!(
                "{kind:?} component has an empty filepath"
            )));
        }
        validate_rel_path(fp)?;
        split.push((fp.to_owned(), kind, comp));
    }
    kept.reverse();
    *list = kept;
    Ok(split)
}

fn compose_component(
    path: &str,
    data: &Value,
    init: Value,
    marker: &str,
) -> Result<Value, BagError> {
    let Value::Object(fields) = data else {
        return Err(NerdError::type_error("object", data, "NERDm Component").into());
    };
    type_list(data, "@type")?;
    let mut md = match init {
        Value::Object(m) => m,
        _ => {
            return Err(BagError::State(format!(
                "default metadata for {path} is not an object"
            )))
        }
    };
    md.extend(fields.clone());
    ensure_type_marker(&mut md, marker)?;
    Ok(Value::Object(md))
}

/// Remove empty directories from `start`'s parent upward, stopping at `root`.
fn prune_empty_parents(start: &Path, root: &Path) -> Result<(), BagError> {
    let mut current: Option<PathBuf> = start.parent().map(Path::to_path_buf);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(_) => break,
        }
        current = dir.parent().map(Path::to_path_buf);
    }
    Ok(())
}
