//! # dcachemon
//!
//! Operator CLI for the dentry cache monitor.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dcache_config::logging::{init_logging, LogLevel};
use dcache_config::Config;

mod decode;
mod generate;
mod monitor;
mod replay;

/// Dentry cache churn monitor
#[derive(Parser)]
#[command(name = "dcachemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the collector from a real directory tree and report
    Replay(replay::ReplayArgs),

    /// Serve /metrics and a trace toggle for a watched tree until stopped
    Monitor(monitor::MonitorArgs),

    /// Generate positive or negative dentries at a steady rate
    Generate(generate::GenerateArgs),

    /// Print paths from a raw trace record file
    Decode {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the default configuration
    Config,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    match cli.command {
        Commands::Replay(args) => replay::run(args),
        Commands::Monitor(args) => monitor::run(args),
        Commands::Generate(args) => generate::run(args),
        Commands::Decode { file } => decode::run(&file),
        Commands::Config => {
            print!("{}", Config::default_toml()?);
            Ok(())
        }
    }
}
