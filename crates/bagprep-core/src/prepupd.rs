//! Seeding an editable bag for a new revision of a known object.
//!
//! The seed comes from the latest preserved head bag when one exists, then
//! from the latest published record, and otherwise there is none. A seed
//! keeps only the metadata tree: payload and tag files are regenerated.

use crate::CoreError;
use bagprep_remote::{
    HeadBagCache, HttpDistribClient, HttpMetadataClient, MetadataService, RemoteError,
    ServiceEndpoint,
};
use bagprep_schema::{BuilderConfig, ObjectId, PrepConfig};
use bagprep_store::layout::{BAG_INFO_FILENAME, DATA_DIR};
use bagprep_store::{read_json, unpack_bag_as, write_json_atomic, BagBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory under the head-bag cache holding published records.
pub const NERD_CACHE_DIRNAME: &str = "_nerd";
const NERD_CACHE_INDENT: usize = 2;

/// What a new update bag was seeded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    /// A cached head bag, serialized or unpacked.
    HeadBag(PathBuf),
    /// A cached copy of the latest published record.
    Nerdm(PathBuf),
    /// The object has no prior history.
    None,
}

/// Factory for per-object `UpdatePrepper`s, sharing one head-bag cache and
/// metadata service.
pub struct UpdatePrepService {
    workdir: PathBuf,
    cache: Arc<HeadBagCache>,
    mdsvc: Arc<dyn MetadataService>,
    builder_config: BuilderConfig,
}

impl UpdatePrepService {
    /// Build the service, with HTTP clients, from the preparation config.
    pub fn from_config(cfg: &PrepConfig) -> Result<Self, CoreError> {
        let workdir = cfg.require_working_dir()?.to_path_buf();
        let cachedir = cfg.require_headbag_cache()?.to_path_buf();
        let distrib = HttpDistribClient::new(ServiceEndpoint::from_config(
            &cfg.dist_service,
            "dist_service",
        )?);
        let mdsvc = HttpMetadataClient::new(ServiceEndpoint::from_config(
            &cfg.metadata_service,
            "metadata_service",
        )?);
        let cache = HeadBagCache::new(Arc::new(distrib), cachedir, None)?;
        Ok(Self::new(workdir, Arc::new(cache), Arc::new(mdsvc))
            .with_builder_config(cfg.bag_builder.clone()))
    }

    pub fn new(
        workdir: impl Into<PathBuf>,
        cache: Arc<HeadBagCache>,
        mdsvc: Arc<dyn MetadataService>,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            cache,
            mdsvc,
            builder_config: BuilderConfig::default(),
        }
    }

    #[must_use]
    pub fn with_builder_config(mut self, config: BuilderConfig) -> Self {
        self.builder_config = config;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn cache(&self) -> &HeadBagCache {
        &self.cache
    }

    /// A prepper for `id`; `version` of `None` means the latest.
    pub fn prepper_for(&self, id: &str, version: Option<&str>) -> Result<UpdatePrepper, CoreError> {
        let nerddir = self.cache.cachedir().join(NERD_CACHE_DIRNAME);
        fs::create_dir_all(&nerddir)?;
        Ok(UpdatePrepper {
            id: ObjectId::new(id),
            version: version.map(str::to_owned),
            cache: Arc::clone(&self.cache),
            mdsvc: Arc::clone(&self.mdsvc),
            nerddir,
            builder_config: self.builder_config.clone(),
        })
    }
}

pub struct UpdatePrepper {
    id: ObjectId,
    version: Option<String>,
    cache: Arc<HeadBagCache>,
    mdsvc: Arc<dyn MetadataService>,
    nerddir: PathBuf,
    builder_config: BuilderConfig,
}

impl UpdatePrepper {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Make sure a confirmed copy of the head bag is in the cache. A copy
    /// that fails its checksum is purged and fetched once more.
    pub fn cache_headbag(&self) -> Result<Option<PathBuf>, CoreError> {
        let aipid = self.id.local_name();
        let version = self.version.as_deref();
        match self.cache.cache_headbag(aipid, version) {
            Err(RemoteError::CorruptedBag { path, reason }) => {
                warn!("head bag {} failed confirmation ({reason}); refetching", path.display());
                Ok(self.cache.cache_headbag(aipid, version)?)
            }
            other => Ok(other?),
        }
    }

    /// Fetch the latest published record and cache it locally.
    pub fn cache_nerdm_rec(&self) -> Result<Option<PathBuf>, CoreError> {
        let Some(rec) = self.mdsvc.describe(self.id.as_str())? else {
            return Ok(None);
        };
        let file = self.nerddir.join(format!("{}.json", self.id.local_name()));
        write_json_atomic(&file, &rec, NERD_CACHE_INDENT)?;
        debug!("cached published record for {} at {}", self.id, file.display());
        Ok(Some(file))
    }

    /// Seed a new update bag at `dest`. Anything already at `dest` is taken
    /// to be left over from a failed run and removed.
    pub fn create_new_update(&self, dest: &Path) -> Result<UpdateSource, CoreError> {
        if dest.exists() {
            warn!("removing leftover update bag at {}", dest.display());
            if dest.is_dir() {
                fs::remove_dir_all(dest)?;
            } else {
                fs::remove_file(dest)?;
            }
        }

        if let Some(headbag) = self.cache_headbag()? {
            self.create_from_headbag(&headbag, dest)?;
            info!("seeded update for {} from head bag {}", self.id, headbag.display());
            return Ok(UpdateSource::HeadBag(headbag));
        }
        if let Some(nerdfile) = self.cache_nerdm_rec()? {
            self.create_from_nerdm(&nerdfile, dest)?;
            info!("seeded update for {} from published record", self.id);
            return Ok(UpdateSource::Nerdm(nerdfile));
        }
        info!("{} has no prior history; starting fresh", self.id);
        Ok(UpdateSource::None)
    }

    /// Materialize `headbag` (a directory or a serialized archive) at
    /// `dest`, then strip everything that is regenerated at finalization.
    pub fn create_from_headbag(&self, headbag: &Path, dest: &Path) -> Result<PathBuf, CoreError> {
        check_dest(dest)?;
        if headbag.is_dir() {
            copy_tree(headbag, dest)?;
        } else {
            unpack_bag_as(headbag, dest)?;
        }
        strip_descriptors(dest)?;
        Ok(dest.to_path_buf())
    }

    /// Build a metadata-only seed at `dest` from the record in `record_path`.
    pub fn create_from_nerdm(&self, record_path: &Path, dest: &Path) -> Result<PathBuf, CoreError> {
        check_dest(dest)?;
        let record = read_json(record_path)?;
        let (parent, name) = split_dest(dest)?;
        let mut config = self.builder_config.clone();
        // Published records may declare a later schema revision.
        config.ensure_nerdm_type_on_add = false;
        let mut builder = BagBuilder::new(parent, &name, config)?;
        builder.add_res_nerd(&record, true)?;
        builder.record(&format!(
            "Initialized update from published record for {}",
            self.id
        ))?;
        builder.release();
        Ok(dest.to_path_buf())
    }
}

fn split_dest(dest: &Path) -> Result<(&Path, String), CoreError> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CoreError::State(format!("invalid bag destination: {}", dest.display())))?;
    Ok((parent, name))
}

fn check_dest(dest: &Path) -> Result<(), CoreError> {
    if dest.exists() {
        return Err(CoreError::State(format!(
            "update bag destination already exists: {}",
            dest.display()
        )));
    }
    let (parent, _) = split_dest(dest)?;
    if !parent.as_os_str().is_empty() && !parent.is_dir() {
        return Err(CoreError::State(format!(
            "workspace for update bag does not exist: {}",
            parent.display()
        )));
    }
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), CoreError> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target)?;
        } else if ft.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            warn!("skipping non-regular file in head bag: {}", entry.path().display());
        }
    }
    Ok(())
}

/// Empty the payload and remove the tag files that describe it. The
/// multibag tables stay: they locate files held only by earlier versions.
fn strip_descriptors(bagdir: &Path) -> Result<(), CoreError> {
    let data = bagdir.join(DATA_DIR);
    if data.exists() {
        fs::remove_dir_all(&data)?;
    }
    fs::create_dir(&data)?;

    for entry in fs::read_dir(bagdir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let regenerated = name == BAG_INFO_FILENAME
            || ((name.starts_with("manifest-") || name.starts_with("tagmanifest-"))
                && name.ends_with(".txt"));
        if regenerated && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
