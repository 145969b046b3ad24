use super::EXIT_SUCCESS;
use clap::{Command, CommandFactory};
use std::path::Path;

fn write_page(cmd: Command, dir: &Path, stem: &str) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd)
        .title(stem)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed for {stem}: {e}"))?;
    let path = dir.join(format!("{stem}.1"));
    std::fs::write(&path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

/// One page for the tool and one per subcommand, named `<bin>-<sub>.1`.
pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let cmd = C::command();
    let bin = cmd.get_name().to_owned();
    let mut written = 1;
    for sub in cmd.get_subcommands() {
        let stem = format!("{bin}-{}", sub.get_name());
        write_page(sub.clone(), dir, &stem)?;
        written += 1;
    }
    write_page(cmd, dir, &bin)?;
    println!("{written} man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}
