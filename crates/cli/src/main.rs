//! `romset`: rom collection management against dat manifests.
//!
//! Three subcommands: `verify` checks trees against a manifest read from
//! stdin, `export` materialises recognised roms into a target layout (then
//! cleans the target), `merge` combines several dat files into one.
//!
//! Exit codes: 0 on success, 1 on error, 2 when manifest entries remain
//! unaccounted for (the residual manifest is printed to stdout).

use anyhow::Context;
use clap::{Parser, Subcommand};
use romset_dat::Datafile;
use romset_engine::{Engine, Stats};
use romset_layout::Layout;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "romset", version, about = "Rom collection management against dat manifests")]
struct Cli {
    /// Increase verbosity (progress and intended actions go to stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify directory trees against a dat manifest read from stdin
    Verify {
        /// Directories to scan
        #[arg(required = true, value_name = "DIR")]
        dirs: Vec<PathBuf>,
    },
    /// Export recognised roms from sources into a target directory
    Export {
        /// Log actions without performing them
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// On-disk layout for the target
        #[arg(long, default_value = "simple", value_parser = parse_layout)]
        layout: Layout,
        /// Directory to export into
        #[arg(value_name = "TARGET")]
        target: PathBuf,
        /// Directories to scan for content
        #[arg(required = true, value_name = "SOURCE")]
        sources: Vec<PathBuf>,
    },
    /// Merge multiple dat files together
    Merge {
        /// Override the header name
        #[arg(long, value_name = "NAME")]
        set_name: Option<String>,
        /// Override the header description
        #[arg(long, value_name = "DESC")]
        set_description: Option<String>,
        /// Override the header version
        #[arg(long, value_name = "VERSION")]
        set_version: Option<String>,
        /// Override the header author
        #[arg(long, value_name = "AUTHOR")]
        set_author: Option<String>,
        /// Base dat file followed by the files to merge into it
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
}

fn parse_layout(s: &str) -> Result<Layout, String> {
    s.parse().map_err(|_| format!("expected one of {}", Layout::NAMES.join(", ")))
}

/// Surface a library error; the kind carries the user-facing message.
fn fail<K: std::error::Error + Send + Sync + 'static>(e: exn::Exn<K>) -> anyhow::Error {
    anyhow::anyhow!("{}", e.current_value())
}

#[tokio::main]
async fn main() {
    // Clap's default exit code for usage errors is 2, which is reserved
    // here for the incomplete-manifest outcome.
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let code = match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
            _ => 1,
        };
        let _ = e.print();
        std::process::exit(code);
    });

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("romset: {e:#}");
            1
        },
    };
    std::process::exit(code);
}

async fn run(command: Command) -> anyhow::Result<i32> {
    match command {
        Command::Verify { dirs } => verify(dirs).await,
        Command::Export { dry_run, layout, target, sources } => {
            export(dry_run, layout, target, sources).await
        },
        Command::Merge { set_name, set_description, set_version, set_author, files } => {
            merge(set_name, set_description, set_version, set_author, files)
        },
    }
}

async fn verify(dirs: Vec<PathBuf>) -> anyhow::Result<i32> {
    let datafile = Arc::new(datafile_from_stdin().await?);
    let engine = Engine::new(datafile.clone(), false, None);

    let start = Instant::now();
    let stats = engine.verify(&dirs).await.map_err(fail)?;
    info!(
        "files: {} bytes: {} time: {:?}",
        stats.files,
        human_bytes(stats.bytes_read),
        start.elapsed()
    );

    residual(&datafile)
}

async fn export(
    dry_run: bool,
    layout: Layout,
    target: PathBuf,
    sources: Vec<PathBuf>,
) -> anyhow::Result<i32> {
    let datafile = Arc::new(datafile_from_stdin().await?);
    let engine = Engine::new(datafile.clone(), !dry_run, layout);

    let start = Instant::now();
    let stats = engine.export(&target, &sources).await.map_err(fail)?;
    log_transfer("export", stats, start);

    let start = Instant::now();
    let stats = engine.clean(&target).await.map_err(fail)?;
    log_transfer("clean", stats, start);

    residual(&datafile)
}

fn merge(
    set_name: Option<String>,
    set_description: Option<String>,
    set_version: Option<String>,
    set_author: Option<String>,
    files: Vec<PathBuf>,
) -> anyhow::Result<i32> {
    let mut files = files.into_iter();
    // Clap enforces at least one positional.
    let base = match files.next() {
        Some(base) => base,
        None => anyhow::bail!("no dat files given"),
    };
    let bytes =
        std::fs::read(&base).with_context(|| format!("reading {}", base.display()))?;
    let datafile = Datafile::parse(&bytes).map_err(fail)?;

    for file in files {
        let bytes =
            std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
        datafile
            .merge(&bytes)
            .map_err(fail)
            .with_context(|| format!("merging {}", file.display()))?;
    }

    for (tag, value) in [
        ("name", set_name),
        ("description", set_description),
        ("version", set_version),
        ("author", set_author),
    ] {
        if let Some(value) = value {
            datafile.set_header_field(tag, &value);
        }
    }

    std::io::stdout().write_all(&datafile.marshal().map_err(fail)?)?;
    Ok(0)
}

async fn datafile_from_stdin() -> anyhow::Result<Datafile> {
    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .context("reading dat file from stdin")?;
    Datafile::parse(&input).map_err(fail)
}

/// Print the residual manifest when anything is missing; exit code 2 marks
/// the incomplete-but-not-failed outcome.
fn residual(datafile: &Datafile) -> anyhow::Result<i32> {
    if datafile.games_remaining() == 0 {
        return Ok(0);
    }
    std::io::stdout().write_all(&datafile.marshal().map_err(fail)?)?;
    Ok(2)
}

fn log_transfer(what: &str, stats: Stats, start: Instant) {
    info!(
        "{what}: bytes read: {} bytes written: {} time: {:?}",
        human_bytes(stats.bytes_read),
        human_bytes(stats.bytes_written),
        start.elapsed()
    );
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{bytes} B") } else { format!("{value:.1} {}", UNITS[unit]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export_arguments() {
        let cli = Cli::parse_from([
            "romset", "export", "-n", "--layout", "megasd", "target", "src1", "src2",
        ]);
        match cli.command {
            Command::Export { dry_run, layout, target, sources } => {
                assert!(dry_run);
                assert_eq!(layout, Layout::MegaSd);
                assert_eq!(target, PathBuf::from("target"));
                assert_eq!(sources, vec![PathBuf::from("src1"), PathBuf::from("src2")]);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_layout_defaults_to_simple() {
        let cli = Cli::parse_from(["romset", "export", "target", "source"]);
        match cli.command {
            Command::Export { layout, .. } => assert_eq!(layout, Layout::Simple),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_layout() {
        assert!(Cli::try_parse_from(["romset", "export", "--layout", "everdrive", "t", "s"]).is_err());
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
