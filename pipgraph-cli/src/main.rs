//! pipgraph CLI - construct and query pip graphs for predicted MSBuild projects.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::build::BuildArgs;
use commands::query::QueryTarget;
use config::{PipgraphConfig, CONFIG_FILE};
use output::OutputFormat;

/// Turn predicted MSBuild projects into a sandboxable pip graph.
#[derive(Parser)]
#[command(name = "pipgraph")]
#[command(author, version)]
#[command(about = "Turn predicted MSBuild projects into a sandboxable pip graph")]
#[command(propagate_version = true)]
#[command(after_help = "Examples:
  pipgraph build projects.json --root .   Construct and persist the graph
  pipgraph query info                     Show graph metadata
  pipgraph query producer out/bin/a.dll   Who writes this file?")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (overrides config default)
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Configuration file (defaults to .pipgraph.toml in the build root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Construct the pip graph for a predicted project set and persist it
    Build {
        /// JSON array of predicted projects
        projects: PathBuf,

        /// Root of the source tree
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Graph store file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Worker threads (overrides config)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Replace an existing graph store
        #[arg(short, long)]
        force: bool,

        /// Construct without writing the store
        #[arg(long)]
        dry_run: bool,

        /// Fail on configuration errors instead of silently using defaults
        #[arg(long)]
        strict: bool,
    },

    /// Point lookups against a persisted graph
    #[command(visible_alias = "q")]
    Query {
        /// Graph store file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,

        #[command(subcommand)]
        target: QueryTarget,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            let _ = Cli::command().print_help();
            println!();
            return Ok(());
        }
    };

    let root = match &command {
        Commands::Build { root, .. } => root.clone(),
        Commands::Query { .. } => PathBuf::from("."),
    };
    let config_path = cli.config.unwrap_or_else(|| root.join(CONFIG_FILE));
    let config = match &command {
        Commands::Build { strict: true, .. } => PipgraphConfig::load_strict(&config_path)?,
        _ => PipgraphConfig::load(&config_path),
    };

    // Resolve output format: CLI flag > config default > Table
    let format = cli.format.unwrap_or_else(|| {
        config
            .default_format()
            .and_then(|f| f.parse().ok())
            .unwrap_or(OutputFormat::Table)
    });

    if let Some(use_color) = config.use_color() {
        colored::control::set_override(use_color);
    }

    match command {
        Commands::Build {
            projects,
            root,
            store,
            threads,
            force,
            dry_run,
            strict: _,
        } => commands::build::run(
            BuildArgs {
                projects,
                root,
                store,
                threads,
                force,
                dry_run,
            },
            &config,
            format,
        ),
        Commands::Query { store, target } => {
            let store = store.unwrap_or_else(|| config.store_path(Path::new(".")));
            commands::query::run(&store, target, format)
        }
    }
}
