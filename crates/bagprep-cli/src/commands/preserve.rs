use super::{core_err, json_pretty, open_bagger, read_config, spin_fail, spin_ok, spinner, BagArgs, EXIT_SUCCESS};
use bagprep_core::{CoreError, MetadataBagger};
use bagprep_schema::{EditSeverity, ExamineMode};
use bagprep_store::serialize_bag;
use std::path::{Path, PathBuf};

fn preserve_bag(
    bagger: &mut MetadataBagger,
    mode: ExamineMode,
    dest: &Path,
) -> Result<PathBuf, CoreError> {
    bagger.prepare(mode)?;
    bagger.make_preservation_bag(dest)
}

pub fn run(
    config: Option<&Path>,
    args: &BagArgs,
    dest: &Path,
    severity: Option<EditSeverity>,
    serialize: bool,
    json: bool,
) -> Result<u8, String> {
    let mut cfg = read_config(config)?;
    if let Some(s) = severity {
        cfg.edit_severity = s;
    }
    let mode = cfg.examine;
    let mut bagger = open_bagger(&cfg, args)?;

    let pb = if json {
        None
    } else {
        Some(spinner("assembling preservation bag..."))
    };
    let outcome = preserve_bag(&mut bagger, mode, dest);
    bagger.done();
    let bag = match outcome {
        Ok(bag) => bag,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "preservation failed");
            }
            return Err(core_err(e));
        }
    };
    let archive = if serialize {
        Some(serialize_bag(&bag, dest).map_err(|e| e.to_string())?)
    } else {
        None
    };
    if let Some(ref pb) = pb {
        spin_ok(pb, "preservation bag assembled");
    }

    if json {
        let payload = serde_json::json!({
            "id": args.id,
            "bag": bag.display().to_string(),
            "archive": archive.as_ref().map(|a| a.display().to_string()),
            "severity": cfg.edit_severity,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("preservation bag: {}", bag.display());
        if let Some(a) = archive {
            println!("archive:          {}", a.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
