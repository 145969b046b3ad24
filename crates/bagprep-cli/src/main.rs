mod commands;

use bagprep_core::install_signal_handler;
use bagprep_schema::{EditSeverity, ExamineMode};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{BagArgs, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_LOCK_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bagprep",
    version,
    about = "Prepare preservation bags from submitted datasets"
)]
struct Cli {
    /// Path to the preparation config (TOML).
    #[arg(long, short, global = true, env = "BAGPREP_CONFIG")]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or refresh the working bag for a submission.
    Prepare {
        #[command(flatten)]
        bag: BagArgs,
        /// When to extract per-file metadata (off, sync, async).
        #[arg(long)]
        examine: Option<ExamineMode>,
        /// Reapply the POD record even if it has not changed.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Finalize the version and assemble a preservation bag.
    Preserve {
        #[command(flatten)]
        bag: BagArgs,
        /// Directory to write the preservation bag into.
        #[arg(long)]
        dest: PathBuf,
        /// Kind of edit this revision represents (metadata_only, content_change).
        #[arg(long)]
        severity: Option<EditSeverity>,
        /// Also write the bag as a tar archive next to it.
        #[arg(long, default_value_t = false)]
        serialize: bool,
    },
    /// Print the assembled metadata record of a working bag.
    Inspect {
        #[command(flatten)]
        bag: BagArgs,
    },
    /// Fetch and confirm the latest head bag for an object.
    Cache {
        /// Object identifier.
        id: String,
        /// Specific version to fetch instead of the latest.
        #[arg(long)]
        version: Option<String>,
    },
    /// Check a bag's manifests against its files.
    Verify {
        /// Bag directory.
        bagdir: PathBuf,
    },
    /// Write a bag directory as a tar archive.
    Serialize {
        /// Bag directory.
        bagdir: PathBuf,
        /// Directory for the archive (defaults to the bag's parent).
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BAGPREP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let config = cli.config.as_deref();
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Prepare {
            bag,
            examine,
            force,
        } => commands::prepare::run(config, &bag, examine, force, json_output),
        Commands::Preserve {
            bag,
            dest,
            severity,
            serialize,
        } => commands::preserve::run(config, &bag, &dest, severity, serialize, json_output),
        Commands::Inspect { bag } => commands::inspect::run(config, &bag),
        Commands::Cache { id, version } => {
            commands::cache::run(config, &id, version.as_deref(), json_output)
        }
        Commands::Verify { bagdir } => commands::verify::run(&bagdir, json_output),
        Commands::Serialize { bagdir, dest } => {
            commands::serialize::run(&bagdir, dest.as_deref(), json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("lock error:") {
                EXIT_LOCK_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
