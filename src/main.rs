use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use methyl_dyn::manager::Manager;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// Directory holding `run.toml` and, optionally, `config.toml`.
    #[arg(long)]
    sim_dir: PathBuf,

    /// Seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Simulate,

    Extinction,

    LongTerm,

    Stationary,

    Wasserstein,

    HittingTime,

    List,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mut mgr = Manager::new(args.sim_dir, args.seed).context("failed to construct mgr")?;

    match args.command {
        Command::Simulate => mgr.simulate()?,
        Command::Extinction => mgr.extinction()?,
        Command::LongTerm => mgr.long_term()?,
        Command::Stationary => mgr.stationary()?,
        Command::Wasserstein => mgr.wasserstein()?,
        Command::HittingTime => mgr.hitting_time()?,
        Command::List => mgr.list()?,
    }

    Ok(())
}
