use crate::layout::{rel_path_string, BagLayout, NERDM_FILENAME};
use crate::{read_json, write_json_atomic, BagError};
use bagprep_schema::nerdm::{effective_view, merge_into};
use serde_json::{Map, Value};
use std::fs;
use walkdir::WalkDir;

/// Reader/writer for a bag's metadata tree.
///
/// Base records (`nerdm.json`) and annotation overlays (`annot.json`) are
/// separate documents; every write replaces the whole file atomically.
/// Cloning is cheap, so a background worker can hold its own handle.
#[derive(Debug, Clone)]
pub struct MetadataTree {
    layout: BagLayout,
    indent: usize,
}

impl MetadataTree {
    pub fn new(layout: BagLayout, indent: usize) -> Self {
        Self { layout, indent }
    }

    pub fn layout(&self) -> &BagLayout {
        &self.layout
    }

    pub fn exists(&self, path: &str) -> bool {
        self.layout.nerdm_file_for(path).is_file()
    }

    /// Base record for `path`, if one has been written.
    pub fn get(&self, path: &str) -> Result<Option<Value>, BagError> {
        let file = self.layout.nerdm_file_for(path);
        if !file.is_file() {
            return Ok(None);
        }
        Ok(Some(read_json(&file)?))
    }

    pub fn get_annot(&self, path: &str) -> Result<Option<Value>, BagError> {
        let file = self.layout.annot_file_for(path);
        if !file.is_file() {
            return Ok(None);
        }
        Ok(Some(read_json(&file)?))
    }

    /// Base record with its overlay applied.
    pub fn effective(&self, path: &str) -> Result<Option<Value>, BagError> {
        let annot = self.get_annot(path)?;
        match self.get(path)? {
            Some(base) => Ok(Some(effective_view(&base, annot.as_ref()))),
            None => Ok(annot),
        }
    }

    pub fn put(&self, path: &str, md: &Value) -> Result<(), BagError> {
        fs::create_dir_all(self.layout.metadata_dir_for(path))?;
        write_json_atomic(&self.layout.nerdm_file_for(path), md, self.indent)
    }

    pub fn put_annot(&self, path: &str, md: &Value) -> Result<(), BagError> {
        fs::create_dir_all(self.layout.metadata_dir_for(path))?;
        write_json_atomic(&self.layout.annot_file_for(path), md, self.indent)
    }

    /// Merge `fields` into the base record for `path`, creating it if absent.
    pub fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<Value, BagError> {
        let mut md = self.get(path)?.unwrap_or_else(|| Value::Object(Map::new()));
        merge_into(&mut md, &Value::Object(fields.clone()));
        self.put(path, &md)?;
        Ok(md)
    }

    pub fn update_annot(
        &self,
        path: &str,
        fields: &Map<String, Value>,
    ) -> Result<Value, BagError> {
        let mut md = self
            .get_annot(path)?
            .unwrap_or_else(|| Value::Object(Map::new()));
        merge_into(&mut md, &Value::Object(fields.clone()));
        self.put_annot(path, &md)?;
        Ok(md)
    }

    /// Drop top-level keys from the overlay for `path`. Returns whether
    /// anything was removed.
    pub fn remove_annot_keys(&self, path: &str, keys: &[&str]) -> Result<bool, BagError> {
        let Some(Value::Object(mut md)) = self.get_annot(path)? else {
            return Ok(false);
        };
        let before = md.len();
        for k in keys {
            md.remove(*k);
        }
        if md.len() == before {
            return Ok(false);
        }
        self.put_annot(path, &Value::Object(md))?;
        Ok(true)
    }

    /// Remove the whole metadata subtree for `path`.
    pub fn remove(&self, path: &str) -> Result<(), BagError> {
        let dir = self.layout.metadata_dir_for(path);
        if dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Paths of every component with a base record, sorted. The resource
    /// record itself is not included.
    pub fn list(&self) -> Result<Vec<String>, BagError> {
        let root = self.layout.metadata_dir();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in WalkDir::new(&root).min_depth(2) {
            let entry = entry?;
            if entry.file_type().is_file() && entry.file_name() == NERDM_FILENAME {
                if let Some(dir) = entry.path().parent() {
                    if let Ok(rel) = dir.strip_prefix(&root) {
                        paths.push(rel_path_string(rel));
                    }
                }
            }
        }
        paths.sort();
        Ok(paths)
    }
}
