use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "pulse",
    about = "Daily gender/age/os slices of feed and message activity"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Process one day now and exit.
    Run(RunArgs),
    /// Run once a day at the configured time until interrupted.
    Schedule,
    Db(DbArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Day to process (YYYY-MM-DD); defaults to yesterday in UTC.
    #[arg(long, value_name = "DATE")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommand,
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Create the report table if it does not exist.
    Init,
    /// Ping both stores and print their versions.
    Check,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
