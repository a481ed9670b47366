//! relink CLI: inspect documents, check catalogs and run load sessions.

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relink", version, about = "Inspect and load relink documents")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the header and records of a document file
    Inspect {
        /// Document file
        file: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate a catalog definition and print its layout
    Catalog {
        /// Catalog definition (JSON)
        path: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Load a document and everything it references
    Load {
        /// Root document id
        document: String,
        /// Directory holding `<id>.rlnk` documents
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Catalog definition (JSON)
        #[arg(long)]
        catalog: PathBuf,
        /// Session configuration; defaults to `<dir>/relink.toml` when present
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Inspect { file, json } => commands::inspect::run(&file, json),
        Commands::Catalog { path, json } => commands::catalog::run(&path, json),
        Commands::Load {
            document,
            dir,
            catalog,
            config,
            json,
        } => commands::load::run(&document, &dir, &catalog, config.as_deref(), json),
    }
}
