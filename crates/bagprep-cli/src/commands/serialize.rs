use super::{json_pretty, EXIT_SUCCESS};
use bagprep_store::serialize_bag;
use std::path::Path;

pub fn run(bagdir: &Path, dest: Option<&Path>, json: bool) -> Result<u8, String> {
    let dest = match dest {
        Some(d) => d,
        None => bagdir
            .parent()
            .ok_or_else(|| format!("no parent directory for {}", bagdir.display()))?,
    };
    let archive = serialize_bag(bagdir, dest).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "bag": bagdir.display().to_string(),
            "archive": archive.display().to_string(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", archive.display());
    }
    Ok(EXIT_SUCCESS)
}
