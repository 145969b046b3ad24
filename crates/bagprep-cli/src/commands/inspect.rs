use super::{core_err, json_pretty, open_bagger, read_config, BagArgs, EXIT_SUCCESS};
use std::path::Path;

pub fn run(config: Option<&Path>, args: &BagArgs) -> Result<u8, String> {
    let cfg = read_config(config)?;
    let bagger = open_bagger(&cfg, args)?;
    if !bagger.bagdir().is_dir() {
        return Err(format!(
            "no working bag for {} at {}",
            args.id,
            bagger.bagdir().display()
        ));
    }
    let record = bagger.assembled_record().map_err(core_err)?;
    println!("{}", json_pretty(&record)?);
    Ok(EXIT_SUCCESS)
}
