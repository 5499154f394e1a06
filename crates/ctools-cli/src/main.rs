//! # ctools CLI
//!
//! Command-line interface for inspecting conda package caches and the
//! environments linked from them. Every command is read-only.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use ctools_config::logging::{init_logging, LogLevel};
use ctools_config::{log_cli_debug, Config};

mod context;
mod env;
mod output;
mod packages;
mod verify;

use context::Context;

/// ctools - audit conda package caches and environments
#[derive(Parser)]
#[command(name = "ctools")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Package cache directory (overrides the configured list)
    #[arg(long, global = true, value_name = "DIR")]
    pkgs_dir: Option<PathBuf>,

    /// Environments directory (overrides the configured list)
    #[arg(long, global = true, value_name = "DIR")]
    envs_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List extracted packages in the cache
    Packages,

    /// List cache packages that no environment links
    Unlinked,

    /// Compare extracted packages with their archives
    Verify(verify::VerifyArgs),

    /// Check that hard-linked files share an inode with the cache
    CheckLinks {
        /// Environment name or path (default: every environment)
        #[arg(long, short)]
        env: Option<String>,
    },

    /// Show which installed packages own a file
    Owns {
        /// File path, relative to the environment root or absolute
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Environment name or path (default: the active environment)
        #[arg(long, short)]
        env: Option<String>,
    },

    /// Print the dependency graph of an environment
    Deps {
        #[arg(long, short)]
        env: Option<String>,
    },

    /// List packages nothing else in the environment depends on
    Orphans {
        #[arg(long, short)]
        env: Option<String>,
    },

    /// Show the revision history of an environment
    History(env::HistoryArgs),

    /// List environments
    Envs,

    /// Check cached archives against a channel index
    RepoCheck {
        /// `repodata.json` or `repodata.json.bz2` on disk
        #[arg(value_name = "INDEX")]
        index: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let ctx = Context::from_args(cli.pkgs_dir, cli.envs_dir, cli.json)?;
    log_cli_debug!(pkgs_dirs = ?ctx.pkgs_dirs, envs_dirs = ?ctx.envs_dirs, "resolved search paths");

    let clean = match cli.command {
        Commands::Packages => packages::list(&ctx)?,
        Commands::Unlinked => packages::unlinked(&ctx)?,
        Commands::Verify(args) => verify::run(&ctx, args)?,
        Commands::CheckLinks { env } => env::check_links(&ctx, env.as_deref())?,
        Commands::Owns { path, env } => env::owns(&ctx, &path, env.as_deref())?,
        Commands::Deps { env } => env::deps(&ctx, env.as_deref())?,
        Commands::Orphans { env } => env::orphans(&ctx, env.as_deref())?,
        Commands::History(args) => env::history(&ctx, args)?,
        Commands::Envs => env::list(&ctx)?,
        Commands::RepoCheck { index } => verify::repo_check(&ctx, &index)?,
        Commands::Config { command } => cmd_config(command)?,
    };

    if !clean {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_config(command: ConfigCommands) -> Result<bool> {
    match command {
        ConfigCommands::Show => {
            let config = ctools_config::config();
            let rendered = toml::to_string_pretty(&*config).context("Failed to render config")?;
            print!("{}", rendered);
        }
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => println!("Global:  {}", path.display()),
                None => println!("Global:  (no home directory)"),
            }
            println!("Project: .ctools/config.toml");
        }
    }
    Ok(true)
}
