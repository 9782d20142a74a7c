//! waymark command line.
//!
//! Every subcommand opens the repository containing its path argument (the
//! current directory for `flush` and `watch`), runs one engine operation and
//! prints its result as JSON on stdout. Diagnostics go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use waymark::app::App;
use waymark::config::Config;
use waymark::telemetry;
use waymark_core::types::MarkerLocation;
use waymark_core::{Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "waymark",
    version,
    about = "Keeps markers attached to code across edits and commits",
    arg_required_else_help = true
)]
struct Cli {
    /// Config file (default: ~/.config/waymark/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Ranges are written `line:col-line:col`, 0-based, end exclusive.
#[derive(Subcommand, Debug)]
enum Command {
    /// Create a marker on a range of a file.
    Track {
        path: PathBuf,
        range: MarkerLocation,
        /// Read the live buffer of PATH from stdin.
        #[arg(long)]
        stdin: bool,
    },

    /// Print the current location of every marker of the given files.
    Locate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Read the live buffer from stdin (single path only).
        #[arg(long)]
        stdin: bool,
    },

    /// Print the locations of a file's markers as of a commit.
    At { path: PathBuf, commit: String },

    /// Map a range of the live buffer back to the file's current revision.
    Backtrack {
        path: PathBuf,
        range: MarkerLocation,
        #[arg(long)]
        stdin: bool,
    },

    /// Record an uncommitted location for a marker.
    Save {
        path: PathBuf,
        marker: String,
        range: MarkerLocation,
        #[arg(long)]
        stdin: bool,
    },

    /// Move uncommitted locations whose edit has been committed into the
    /// database.
    Flush { repo: Option<PathBuf> },

    /// Flush whenever HEAD moves, until SIGTERM or Ctrl-C.
    Watch { repo: Option<PathBuf> },
}

async fn read_stdin() -> Result<String> {
    let mut text = String::new();
    tokio::io::stdin().read_to_string(&mut text).await?;
    Ok(text)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).map_err(|e| Error::Io(e.into()))?;
    println!("{out}");
    Ok(())
}

/// Opens the repository of `path`, loading stdin as its buffer if asked.
async fn open(config: Config, path: &Path, stdin: bool) -> Result<App> {
    let app = App::open(config, path).await?;
    if stdin {
        app.open_buffer(path, read_stdin().await?).await;
    }
    Ok(app)
}

async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Track { path, range, stdin } => {
            let app = open(config, &path, stdin).await?;
            print_json(&app.track(&path, &range).await?)
        }
        Command::Locate { paths, stdin } => {
            if stdin && paths.len() != 1 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "--stdin takes exactly one path",
                )));
            }
            let app = open(config, &paths[0], stdin).await?;
            print_json(&app.locate(&paths).await?)
        }
        Command::At { path, commit } => {
            let app = App::open(config, &path).await?;
            print_json(&app.at(&path, &commit).await?)
        }
        Command::Backtrack { path, range, stdin } => {
            let app = open(config, &path, stdin).await?;
            println!("{}", app.backtrack(&path, &range).await?);
            Ok(())
        }
        Command::Save { path, marker, range, stdin } => {
            let app = open(config, &path, stdin).await?;
            app.save(&path, &marker, &range).await
        }
        Command::Flush { repo } => {
            let app = App::open(config, &repo.unwrap_or_else(|| PathBuf::from("."))).await?;
            print_json(&app.flush().await?)
        }
        Command::Watch { repo } => {
            let app = App::open(config, &repo.unwrap_or_else(|| PathBuf::from("."))).await?;
            app.watch().await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    telemetry::init(&config.log);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("waymark: {e}");
            ExitCode::FAILURE
        }
    }
}
