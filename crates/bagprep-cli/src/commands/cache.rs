use super::{core_err, json_pretty, read_config, spin_fail, spin_ok, spinner, EXIT_FAILURE, EXIT_SUCCESS};
use bagprep_core::UpdatePrepService;
use std::path::Path;

pub fn run(config: Option<&Path>, id: &str, version: Option<&str>, json: bool) -> Result<u8, String> {
    let cfg = read_config(config)?;
    let svc = UpdatePrepService::from_config(&cfg).map_err(core_err)?;
    let prepper = svc.prepper_for(id, version).map_err(core_err)?;

    let pb = if json {
        None
    } else {
        Some(spinner("fetching head bag..."))
    };
    let cached = match prepper.cache_headbag() {
        Ok(c) => c,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "fetch failed");
            }
            return Err(core_err(e));
        }
    };
    if let Some(ref pb) = pb {
        match cached {
            Some(_) => spin_ok(pb, "head bag cached"),
            None => spin_fail(pb, "no head bag"),
        }
    }

    if json {
        let payload = serde_json::json!({
            "id": id,
            "version": version,
            "headbag": cached.as_ref().map(|p| p.display().to_string()),
        });
        println!("{}", json_pretty(&payload)?);
    } else if let Some(ref path) = cached {
        println!("{}", path.display());
    } else {
        println!("no preserved head bag found for {id}");
    }
    Ok(if cached.is_some() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
