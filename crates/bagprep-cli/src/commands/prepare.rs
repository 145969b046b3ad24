use super::{core_err, json_pretty, open_bagger, read_config, spin_fail, spin_ok, spinner, BagArgs, EXIT_SUCCESS};
use bagprep_core::{CoreError, MetadataBagger};
use bagprep_schema::ExamineMode;
use std::path::Path;

fn prepare_bag(bagger: &mut MetadataBagger, mode: ExamineMode, force: bool) -> Result<(), CoreError> {
    bagger.ensure_res_metadata(force)?;
    bagger.ensure_data_files(mode)?;
    bagger.ensure_subcoll_metadata()?;
    bagger.wait_for_examiner()
}

pub fn run(
    config: Option<&Path>,
    args: &BagArgs,
    examine: Option<ExamineMode>,
    force: bool,
    json: bool,
) -> Result<u8, String> {
    let cfg = read_config(config)?;
    let mode = examine.unwrap_or(cfg.examine);
    let mut bagger = open_bagger(&cfg, args)?;

    let pb = if json {
        None
    } else {
        Some(spinner("preparing working bag..."))
    };
    let outcome = prepare_bag(&mut bagger, mode, force);
    let files = bagger.datafiles().map_or(0, |f| f.len());
    bagger.done();
    match outcome {
        Ok(()) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "working bag prepared");
            }
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "preparation failed");
            }
            return Err(core_err(e));
        }
    }

    if json {
        let payload = serde_json::json!({
            "id": args.id,
            "bagdir": bagger.bagdir().display().to_string(),
            "data_files": files,
            "examine": mode,
            "status": "prepared"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("working bag: {}", bagger.bagdir().display());
        println!("data files:  {files}");
    }
    Ok(EXIT_SUCCESS)
}
