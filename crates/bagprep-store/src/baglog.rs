use crate::BagError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Level tag written on every activity-log line.
pub const LOG_LEVEL_TAG: &str = "NORMAL";

/// Append-only activity log kept inside a bag.
///
/// Each record is one line: `<rfc3339 timestamp> NORMAL: <message>`.
/// The file handle is closed on [`detach`](Self::detach) or drop; reopening
/// the same path appends after whatever an earlier run wrote.
#[derive(Debug)]
pub struct BagLog {
    path: PathBuf,
    file: Option<File>,
}

impl BagLog {
    pub fn attach(path: impl Into<PathBuf>) -> Result<Self, BagError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_attached(&self) -> bool {
        self.file.is_some()
    }

    pub fn record(&mut self, msg: &str) -> Result<(), BagError> {
        info!("{msg}");
        if let Some(f) = self.file.as_mut() {
            let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            writeln!(f, "{ts} {LOG_LEVEL_TAG}: {msg}")?;
            f.flush()?;
        }
        Ok(())
    }

    pub fn detach(&mut self) {
        if let Some(f) = self.file.take() {
            let _ = f.sync_all();
        }
    }
}

impl Drop for BagLog {
    fn drop(&mut self) {
        self.detach();
    }
}
