use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Walk every chapter of each work along its "next" links.
    Run(RunArgs),
    /// Translate only the newest chapter of each work, if it is new.
    Check(CheckArgs),
    /// Print a work's table of contents as JSON lines.
    List(ListArgs),
    /// Run the translation tiers over a local text file.
    Translate(TranslateArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArg {
    /// Works/config YAML file.
    #[arg(long, default_value = "works.yaml")]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Only process the work with this name.
    #[arg(long)]
    pub work: Option<String>,

    /// Stop each work after this many chapters were translated this run.
    #[arg(long)]
    pub max_chapters: Option<usize>,

    /// Start from the saved chain cursor instead of the first chapter.
    #[arg(long, default_value_t = false)]
    pub resume: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Only check the work with this name.
    #[arg(long)]
    pub work: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    #[arg(long)]
    pub work: String,
}

#[derive(Debug, Args)]
pub struct TranslateArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Source text file.
    #[arg(long)]
    pub input: PathBuf,

    /// Output file for the translation.
    #[arg(long)]
    pub out: PathBuf,

    /// Overwrite the output file if it exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}
