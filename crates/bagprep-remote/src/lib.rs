//! Remote collaborators for bagprep.
//!
//! This crate provides the client traits for the distribution service (head
//! bag descriptions and serialized bag downloads) and the metadata repository
//! (latest public NERDm records), blocking HTTP implementations of both, and
//! `HeadBagCache`, a local checksum-verified cache of serialized head bags.

pub mod cache;
pub mod config;
pub mod http;

pub use cache::HeadBagCache;
pub use config::ServiceEndpoint;
pub use http::{HttpDistribClient, HttpMetadataClient};

use bagprep_store::BagError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Client name sent as `User-Agent` on all HTTP requests.
pub const USER_AGENT: &str = concat!("bagprep/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupted bag {}: {reason}", path.display())]
    CorruptedBag { path: PathBuf, reason: String },
    #[error("state error: {0}")]
    State(String),
    #[error("store error: {0}")]
    Store(#[from] BagError),
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Serialization(e.to_string())
    }
}

/// Description of one serialized head bag, as returned by the distribution
/// service and stored in the cache index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadBagInfo {
    /// File name of the serialized bag.
    pub name: String,
    pub hash: String,
    pub version: String,
    /// Identifier of the object the bag belongs to.
    #[serde(rename = "aipid", alias = "id")]
    pub id: String,
    #[serde(rename = "hashAlgorithm", default, skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The service that describes and serves previously preserved bags.
pub trait DistributionService: Send + Sync {
    /// Describe the head bag for `id` at `version`; `None` or `"latest"`
    /// selects the most recent. `Ok(None)` means the object was never
    /// preserved (or has no such version).
    fn describe_head(&self, id: &str, version: Option<&str>)
        -> Result<Option<HeadBagInfo>, RemoteError>;

    /// Download the serialized bag `name` into `dest_dir`, returning the
    /// path of the saved file.
    fn save_bag(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, RemoteError>;
}

/// The repository holding the latest public metadata records.
pub trait MetadataService: Send + Sync {
    /// The latest public record for `id`, or `None` if it was never published.
    fn describe(&self, id: &str) -> Result<Option<Value>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn head_info_accepts_service_fields() {
        let info: HeadBagInfo = serde_json::from_value(json!({
            "name": "mds2-1491.1_0_0.mbag0_4-0.tar",
            "hash": "abc123",
            "version": "1.0.0",
            "aipid": "mds2-1491",
            "hashAlgorithm": "sha256",
            "contentLength": 2048
        }))
        .unwrap();
        assert_eq!(info.id, "mds2-1491");
        assert_eq!(info.hash_algorithm.as_deref(), Some("sha256"));
        assert_eq!(info.extra["contentLength"], 2048);
    }

    #[test]
    fn head_info_roundtrips_through_index_form() {
        let info: HeadBagInfo = serde_json::from_value(json!({
            "name": "b.tar", "hash": "h", "version": "2.0", "id": "x"
        }))
        .unwrap();
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["aipid"], "x");
        assert!(v.get("hashAlgorithm").is_none());
        let back: HeadBagInfo = serde_json::from_value(v).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn corrupted_bag_message_names_path() {
        let e = RemoteError::CorruptedBag {
            path: PathBuf::from("/cache/b.tar"),
            reason: "checksum failure".into(),
        };
        assert_eq!(e.to_string(), "corrupted bag /cache/b.tar: checksum failure");
    }
}
