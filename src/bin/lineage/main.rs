//! lineage CLI tool
//!
//! Command-line interface for the file-version Bayesian network.
//!
//! ## Commands
//!
//! - `run <file_path> <version>`: fetch the hierarchy under `file_path`, validate the
//!   network, print the most probable state of `file_path`, and render the hierarchy
//! - `init`: create the database and its `file_versions` table
//! - `record <file_path> <version>`: store one file or folder version
//!
//! Diagnostics go to stderr through `tracing` (`RUST_LOG` controls the level); stdout
//! carries results and the message of a fatal error.

use clap::{Parser, Subcommand, ValueEnum};
use lineage_pgm::{
    commands::{execute, Op, OpResult, RunRequest},
    config::{ConfigProvider, LineageConfig, TomlConfigProvider, DEFAULT_CONFIG_FILE},
    record::FileRecord,
    viz::VizFormat,
    LineageError,
};
use std::{io::Write, path::PathBuf};

#[derive(Parser)]
#[command(name = "lineage")]
#[command(author, version, about = "Bayesian network inference over a file version hierarchy", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Database URL (overrides config file and LINEAGE_DATABASE_URL)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    File,
    Folder,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::File => "file",
            Kind::Folder => "folder",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the network for a file's hierarchy and report its most probable state
    Run {
        /// Path of the file or folder to query
        file_path: String,

        /// Version of the file (accepted for compatibility; not used by the query)
        version: i64,

        /// Where to write the figure
        #[arg(long)]
        viz_output: Option<PathBuf>,

        /// Figure format: svg or dot
        #[arg(long)]
        viz_format: Option<String>,

        /// Skip rendering the hierarchy
        #[arg(long)]
        no_viz: bool,

        /// Also print the posterior distribution of the queried path
        #[arg(long)]
        show_marginal: bool,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// Create the database and the file_versions table
    Init,

    /// Store a file or folder version
    Record {
        /// Path of the file or folder
        file_path: String,

        /// Version number
        version: u32,

        /// Folder containing this entry
        #[arg(short, long)]
        parent: Option<String>,

        /// Whether the entry is a file or a folder
        #[arg(short, long, value_enum, default_value = "file")]
        kind: Kind,
    },
}

fn load_config(cli: &Cli) -> Result<LineageConfig, LineageError> {
    let provider = TomlConfigProvider::new(cli.config.clone());
    let mut config = provider.get_config()?.with_env();
    if let Some(url) = &cli.db {
        config.database_url = url.clone();
    }
    Ok(config)
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run_cli(cli) {
        println!("{err}");
        std::process::exit(err.exit_code());
    }
}

fn run_cli(cli: Cli) -> Result<(), LineageError> {
    let mut config = load_config(&cli)?;

    let (op, json) = match cli.command {
        Commands::Run {
            file_path,
            version,
            viz_output,
            viz_format,
            no_viz,
            show_marginal,
            json,
        } => {
            if let Some(format) = viz_format {
                config.viz.format = VizFormat::parse(&format)?;
                if viz_output.is_none() {
                    config.viz.output.set_extension(config.viz.format.extension());
                }
            }
            if let Some(output) = viz_output {
                config.viz.output = output;
            }
            if no_viz {
                config.viz.enabled = false;
            }
            (
                Op::Run(RunRequest {
                    file_path,
                    version,
                    show_marginal,
                }),
                json,
            )
        }
        Commands::Init => (Op::Init, false),
        Commands::Record {
            file_path,
            version,
            parent,
            kind,
        } => (
            Op::Record {
                record: FileRecord::new(file_path, version, parent.as_deref()),
                kind: kind.as_str().to_string(),
            },
            false,
        ),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = if json {
        runtime.block_on(execute(&op, &config, &mut std::io::sink()))?
    } else {
        runtime.block_on(execute(&op, &config, &mut out))?
    };

    match result {
        OpResult::Report(report) if json => {
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        OpResult::Report(report) => {
            if let Some(figure) = &report.figure {
                tracing::info!("Figure written to {}", figure.display());
            }
        }
        other => writeln!(out, "{other}")?,
    }
    Ok(())
}
