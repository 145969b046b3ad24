//! Local cache of serialized head bags.
//!
//! Layout under the cache directory:
//! - `<name>`: serialized bags, named as the distribution service names them
//! - `_info/<local-id>`: JSON index mapping version to `HeadBagInfo`
//!
//! Index files are partitioned by object id, so operations on different ids
//! never touch the same file. Operations on the same id must be serialized
//! by the caller.

use crate::{DistributionService, HeadBagInfo, RemoteError};
use bagprep_schema::ObjectId;
use bagprep_store::{file_digest, read_json, write_json_atomic, ChecksumAlgorithm};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const INFO_DIRNAME: &str = "_info";
const INDEX_INDENT: usize = 2;

pub struct HeadBagCache {
    service: Arc<dyn DistributionService>,
    cachedir: PathBuf,
    infodir: PathBuf,
}

impl HeadBagCache {
    /// Open (creating if needed) a cache at `cachedir`. The index directory
    /// defaults to `cachedir/_info`.
    pub fn new(
        service: Arc<dyn DistributionService>,
        cachedir: impl Into<PathBuf>,
        infodir: Option<PathBuf>,
    ) -> Result<Self, RemoteError> {
        let cachedir = cachedir.into();
        let infodir = infodir.unwrap_or_else(|| cachedir.join(INFO_DIRNAME));
        ensure_dir(&cachedir)?;
        ensure_dir(&infodir)?;
        Ok(Self {
            service,
            cachedir,
            infodir,
        })
    }

    pub fn cachedir(&self) -> &Path {
        &self.cachedir
    }

    pub fn infodir(&self) -> &Path {
        &self.infodir
    }

    /// Ensure a checksum-confirmed copy of the head bag for `id` is cached.
    /// Returns `None` if the object has no such head bag.
    pub fn cache_headbag(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<PathBuf>, RemoteError> {
        self.cache_headbag_confirmed(id, version, true)
    }

    /// As `cache_headbag`, with the checksum confirmation optional.
    pub fn cache_headbag_confirmed(
        &self,
        id: &str,
        version: Option<&str>,
        confirm: bool,
    ) -> Result<Option<PathBuf>, RemoteError> {
        let specific = version.filter(|v| *v != "latest");

        let mut hinfo = None;
        if let Some(v) = specific {
            hinfo = self.recall_version(id, v)?;
            if hinfo.is_some() {
                debug!("head bag for {id} v{v} found in local index");
            }
        }

        let hinfo = match hinfo {
            Some(h) => h,
            None => {
                let Some(h) = self.service.describe_head(id, version)? else {
                    info!("no head bag found for {id}");
                    return Ok(None);
                };
                let resolved = specific.unwrap_or(h.version.as_str()).to_owned();
                self.remember(id, &resolved, &h)?;
                h
            }
        };

        let bagfile = self.cachedir.join(&hinfo.name);
        if !bagfile.exists() {
            info!("fetching head bag {} for {id}", hinfo.name);
            self.service.save_bag(&hinfo.name, &self.cachedir)?;
        }
        if confirm {
            self.confirm_bagfile(&hinfo, true)?;
        }
        Ok(Some(bagfile))
    }

    /// Recompute the checksum of the cached bag described by `info` and
    /// compare it with the recorded hash. With `purge_on_error`, a bad file
    /// and its index entry are removed before the error is returned.
    pub fn confirm_bagfile(
        &self,
        info: &HeadBagInfo,
        purge_on_error: bool,
    ) -> Result<(), RemoteError> {
        let bagfile = self.cachedir.join(&info.name);
        let alg = match info.hash_algorithm.as_deref() {
            None => ChecksumAlgorithm::Sha256,
            Some(tag) => ChecksumAlgorithm::from_tag(tag).ok_or_else(|| {
                RemoteError::State(format!("unsupported hash algorithm for {}: {tag}", info.name))
            })?,
        };

        let reason = match file_digest(&bagfile, alg) {
            Ok(actual) if actual.eq_ignore_ascii_case(&info.hash) => return Ok(()),
            Ok(_) => "checksum failure".to_owned(),
            Err(e) => format!("failure reading bag file: {e}"),
        };
        warn!("cached head bag {} is corrupted: {reason}", bagfile.display());
        if purge_on_error {
            self.clear_from_cache(&bagfile, info)?;
        }
        Err(RemoteError::CorruptedBag {
            path: bagfile,
            reason,
        })
    }

    /// The full version index for `id`.
    pub fn recall_head_info(&self, id: &str) -> Result<Map<String, Value>, RemoteError> {
        let file = self.index_file(id);
        if !file.exists() {
            return Ok(Map::new());
        }
        match read_json(&file)? {
            Value::Object(m) => Ok(m),
            other => Err(RemoteError::Serialization(format!(
                "head bag index {} is not an object: {other}",
                file.display()
            ))),
        }
    }

    fn recall_version(&self, id: &str, version: &str) -> Result<Option<HeadBagInfo>, RemoteError> {
        let mut index = self.recall_head_info(id)?;
        match index.remove(version) {
            Some(v) if v.get("name").is_some() => Ok(Some(serde_json::from_value(v)?)),
            _ => Ok(None),
        }
    }

    fn remember(&self, id: &str, version: &str, info: &HeadBagInfo) -> Result<(), RemoteError> {
        let mut index = self.recall_head_info(id)?;
        index.insert(version.to_owned(), serde_json::to_value(info)?);
        self.save_head_info(id, &index)
    }

    fn save_head_info(&self, id: &str, index: &Map<String, Value>) -> Result<(), RemoteError> {
        write_json_atomic(&self.index_file(id), index, INDEX_INDENT)?;
        Ok(())
    }

    fn clear_from_cache(&self, bagfile: &Path, info: &HeadBagInfo) -> Result<(), RemoteError> {
        if bagfile.exists() {
            fs::remove_file(bagfile)?;
        }
        let mut index = self.recall_head_info(&info.id)?;
        if index.remove(&info.version).is_some() {
            self.save_head_info(&info.id, &index)?;
        }
        Ok(())
    }

    fn index_file(&self, id: &str) -> PathBuf {
        self.infodir.join(ObjectId::new(id).local_name())
    }
}

fn ensure_dir(dir: &Path) -> Result<(), RemoteError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    if !dir.is_dir() {
        return Err(RemoteError::State(format!(
            "HeadBagCache: not a directory: {}",
            dir.display()
        )));
    }
    Ok(())
}
