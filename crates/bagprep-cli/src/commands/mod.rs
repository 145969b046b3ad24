pub mod cache;
pub mod completions;
pub mod inspect;
pub mod man_pages;
pub mod prepare;
pub mod preserve;
pub mod serialize;
pub mod verify;

use bagprep_core::{CoreError, MetadataBagger, SubmissionSource, UpdatePrepService};
use bagprep_schema::{load_config, ObjectId, PrepConfig};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_BAG_ERROR: u8 = 3;
pub const EXIT_LOCK_ERROR: u8 = 4;

/// Selects one submission and where its working bag lives.
#[derive(Debug, Args)]
pub struct BagArgs {
    /// Object identifier.
    pub id: String,
    /// Review area for this submission (default: `<review_dir>/<id>`).
    #[arg(long)]
    pub review: Option<PathBuf>,
    /// Upload area for this submission (default: `<upload_dir>/<id>`).
    #[arg(long)]
    pub upload: Option<PathBuf>,
    /// Parent directory of working bags (overrides `working_dir`).
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Render a core error with a prefix `main` can map to an exit code.
pub fn core_err(e: CoreError) -> String {
    match e {
        CoreError::Config(e) => format!("config error: {e}"),
        other => other.to_string(),
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finished_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(finished_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(finished_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(ok: bool, text: &str) -> String {
    use console::Style;
    if ok {
        Style::new().green().apply_to(text).to_string()
    } else {
        Style::new().red().bold().apply_to(text).to_string()
    }
}

/// The config at `path`, or defaults when none was given.
pub fn read_config(path: Option<&Path>) -> Result<PrepConfig, String> {
    match path {
        Some(p) => load_config(p).map_err(|e| format!("config error: {}: {e}", p.display())),
        None => Ok(PrepConfig::default()),
    }
}

/// A bagger for the submission named by `args`. Seeding from prior
/// history is enabled when remote services and a head-bag cache are
/// configured.
pub fn open_bagger(cfg: &PrepConfig, args: &BagArgs) -> Result<MetadataBagger, String> {
    let workdir = args
        .workdir
        .clone()
        .or_else(|| cfg.working_dir.clone())
        .ok_or_else(|| {
            "config error: no working directory; pass --workdir or set working_dir".to_owned()
        })?;
    let local = ObjectId::new(args.id.as_str()).local_name().to_owned();
    let review = args
        .review
        .clone()
        .or_else(|| cfg.review_dir.as_ref().map(|d| d.join(&local)));
    let upload = args
        .upload
        .clone()
        .or_else(|| cfg.upload_dir.as_ref().map(|d| d.join(&local)));

    debug!(
        "submission {}: review={:?} upload={:?} workdir={}",
        args.id,
        review,
        upload,
        workdir.display()
    );

    let mut cfg = cfg.clone();
    cfg.working_dir = Some(workdir.clone());
    let sip = SubmissionSource::new(&args.id, review, upload);
    let mut bagger = MetadataBagger::new(sip, &workdir, cfg.clone()).map_err(core_err)?;
    if cfg.has_remote_services() && cfg.headbag_cache.is_some() {
        let svc = UpdatePrepService::from_config(&cfg).map_err(core_err)?;
        bagger = bagger.with_update_service(svc);
    }
    Ok(bagger)
}
