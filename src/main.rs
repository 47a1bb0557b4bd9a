use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    novelrelay::logging::init().context("init logging")?;

    let cli = novelrelay::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        novelrelay::cli::Command::Run(args) => {
            novelrelay::commands::run(args).context("run")?;
        }
        novelrelay::cli::Command::Check(args) => {
            novelrelay::commands::check(args).context("check")?;
        }
        novelrelay::cli::Command::List(args) => {
            novelrelay::commands::list(args).context("list")?;
        }
        novelrelay::cli::Command::Translate(args) => {
            novelrelay::commands::translate(args).context("translate")?;
        }
    }

    Ok(())
}
