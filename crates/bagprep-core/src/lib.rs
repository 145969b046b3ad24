//! Preparation pipeline for bagprep.
//!
//! This crate ties the schema, store, and remote layers into the
//! `MetadataBagger`, the API for building one object's bag: merging the
//! review and upload areas into a submission (`SubmissionSource`), seeding
//! revisions from prior head bags or published records (`UpdatePrepService`),
//! extracting file metadata in the background (`FileExaminer`), resolving the
//! next version, and assembling the final preservation bag. It also provides
//! the bag lock and the shutdown signal handler.

pub mod bagger;
pub mod concurrency;
pub mod convert;
pub mod examine;
pub mod prepupd;
pub mod sip;
pub mod version;

pub use bagger::{form_bag_name, MetadataBagger};
pub use concurrency::{install_signal_handler, shutdown_requested, BagLock};
pub use convert::{BasicPodConverter, PodConverter};
pub use examine::{examine_file, ExamineJob, FileExaminer};
pub use prepupd::{UpdatePrepService, UpdatePrepper, UpdateSource};
pub use sip::SubmissionSource;
pub use version::determine_updated_version;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] bagprep_schema::ConfigError),
    #[error("metadata error: {0}")]
    Nerd(#[from] bagprep_schema::NerdError),
    #[error("version error: {0}")]
    Version(#[from] bagprep_schema::VersionError),
    #[error("bag error: {0}")]
    Store(#[from] bagprep_store::BagError),
    #[error("remote error: {0}")]
    Remote(#[from] bagprep_remote::RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("state error: {0}")]
    State(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("ordering violation: {0}")]
    Ordering(String),
    #[error("lock error: {0}")]
    Lock(String),
}

impl From<walkdir::Error> for CoreError {
    fn from(e: walkdir::Error) -> Self {
        CoreError::Io(e.into())
    }
}
