use anyhow::Result;
use clap::{Parser, Subcommand};
use indexed_tar::Mode;
use std::path::PathBuf;
use tracing::Level;

mod commands;

use commands::{add::add_targets, extract::extract_archive, list::list_members};

#[derive(Parser)]
#[command(name = "itar")]
#[command(about = "Indexed tar archives with constant-time member lookup")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log every protocol step (slot, index generations, members)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive; fails if it already exists
    #[command(visible_alias = "c")]
    Create {
        archive: PathBuf,
        /// Files or directories to add
        #[arg(short, long, required = true, num_args = 1..)]
        target: Vec<PathBuf>,
        /// Walk directories recursively
        #[arg(short, long, default_value_t = false)]
        recurse: bool,
    },

    /// Add members to an existing archive as a new index generation
    #[command(visible_alias = "a")]
    Append {
        archive: PathBuf,
        #[arg(short, long, required = true, num_args = 1..)]
        target: Vec<PathBuf>,
        #[arg(short, long, default_value_t = false)]
        recurse: bool,
    },

    /// Extract members into a directory
    #[command(visible_alias = "x")]
    Extract {
        archive: PathBuf,
        #[arg(short, long, default_value = ".", alias = "output_dir")]
        output_dir: PathBuf,
        /// Only extract members matching this wildcard
        #[arg(long, alias = "fnmatch_filter")]
        fnmatch_filter: Option<String>,
        /// Restore stored uid/gid instead of the current user's
        #[arg(long, default_value_t = false)]
        numeric_owner: bool,
    },

    /// Print member names in archive order
    #[command(visible_alias = "l")]
    List {
        archive: PathBuf,
        #[arg(long, alias = "fnmatch_filter", conflicts_with = "regex")]
        fnmatch_filter: Option<String>,
        /// Unanchored regular expression filter
        #[arg(long)]
        regex: Option<String>,
        #[arg(long, default_value_t = false)]
        reverse: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Create {
            archive,
            target,
            recurse,
        } => add_targets(&archive, Mode::Create, &target, recurse),
        Commands::Append {
            archive,
            target,
            recurse,
        } => add_targets(&archive, Mode::Append, &target, recurse),
        Commands::Extract {
            archive,
            output_dir,
            fnmatch_filter,
            numeric_owner,
        } => extract_archive(
            &archive,
            &output_dir,
            fnmatch_filter.as_deref(),
            numeric_owner,
        ),
        Commands::List {
            archive,
            fnmatch_filter,
            regex,
            reverse,
        } => list_members(
            &archive,
            fnmatch_filter.as_deref(),
            regex.as_deref(),
            reverse,
        ),
    }
}
