//! # dvcfs
//!
//! **dvcfs** browses and edits DVC-tracked files in a git repository
//! without a manual clone.
//!
//! Features:
//! - `dvcfs ls` / `dvcfs walk` list tracked files
//! - `dvcfs cat` prints a file, pulling its data from the DVC remote
//! - `dvcfs write` / `dvcfs upload` add files and publish them in one commit
//! - `dvcfs download` copies tracked files to local paths
//! - `dvcfs rm` stops tracking files
//!
//! The repository is either a git URL / path or
//! `dvc://[TOKEN@]host/owner/repo`. Settings are read from
//! `$XDG_CONFIG_HOME/dvcfs/config.toml` (or `$DVCFS_CONFIG`).
//!
//! This CLI is built with [clap](https://docs.rs/clap).

mod progress;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dvcfs::{Client, DvcFs, FileSystem, Transfer, UpdateReport, load_settings, open_fs_with};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use progress::{report_line, spinner};

/// Command-line interface definition.
#[derive(Parser, Debug)]
#[command(
    name = "dvcfs",
    version,
    about = "dvcfs - read and write DVC-tracked files in a git repository",
    arg_required_else_help = true
)]
struct Cli {
    /// Git URL, local path, or dvc://[TOKEN@]host/owner/repo
    #[arg(short, long)]
    repo: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the entries of a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// List every tracked file below a directory
    Walk {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Check whether a path is tracked
    Exists { path: String },
    /// Print a tracked file
    Cat { path: String },
    /// Store TEXT (or stdin) at PATH
    Write { path: String, text: Option<String> },
    /// Upload local files: DEST=LOCAL ...
    Upload {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Download tracked files: SRC=LOCAL ...
    Download {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Stop tracking files
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, PathBuf)>> {
    pairs
        .iter()
        .map(|p| match p.split_once('=') {
            Some((repo, local)) if !repo.is_empty() && !local.is_empty() => {
                Ok((repo.to_string(), PathBuf::from(local)))
            }
            _ => bail!("expected REPO_PATH=LOCAL_PATH, got {:?}", p),
        })
        .collect()
}

fn open(repo: &str) -> Result<DvcFs> {
    let settings = load_settings().context("load settings")?;
    if repo.starts_with("dvc://") {
        return open_fs_with(repo, settings).context("open dvc:// URL");
    }
    Ok(DvcFs::new(Client::builder(repo).settings(settings).build()))
}

/// Print one line per transfer and fail if any of them failed.
fn show_report(report: &UpdateReport, verb: &str) -> Result<()> {
    for o in &report.outcomes {
        let t = &o.transfer;
        match &o.result {
            Ok(n) => report_line(true, format!("{} {} ({} bytes)", verb, t.repo_path, n)),
            Err(e) => report_line(false, format!("{} {} (error: {})", verb, t.repo_path, e)),
        }
    }
    if let Some(c) = &report.commit {
        report_line(true, format!("commit {} ({:.1?})", &c.sha[..8], report.duration));
    }
    let failed = report.failed().count();
    if failed > 0 {
        bail!("{} of {} transfers failed", failed, report.outcomes.len());
    }
    Ok(())
}

fn run(cmd: Cmd, dfs: &mut DvcFs) -> Result<()> {
    match cmd {
        Cmd::Ls { path } => {
            for e in dfs.scan_dir(&path)? {
                println!("{}{}", e.name, if e.is_dir { "/" } else { "" });
            }
        }
        Cmd::Walk { path } => {
            for f in dfs.walk_files(&path)? {
                println!("{}", f);
            }
        }
        Cmd::Exists { path } => {
            println!("{}", dfs.exists(&path)?);
        }
        Cmd::Cat { path } => {
            let data = dfs.read_bytes(&path)?;
            io::stdout().write_all(&data)?;
        }
        Cmd::Write { path, text } => {
            let data = match text {
                Some(t) => t.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            let pb = spinner(format!("writing {}", path));
            let res = dfs.write_bytes(&path, &data);
            pb.finish_and_clear();
            res?;
            report_line(true, format!("wrote {}", path));
        }
        Cmd::Upload { pairs } => {
            let transfers = parse_pairs(&pairs)?
                .into_iter()
                .map(|(dest, local)| Transfer::upload(dest, local))
                .collect::<Vec<_>>();
            let pb = spinner(format!("uploading {} file(s)", transfers.len()));
            let res = dfs.client_mut().update(transfers);
            pb.finish_and_clear();
            show_report(&res?, "uploaded")?;
        }
        Cmd::Download { pairs } => {
            let transfers = parse_pairs(&pairs)?
                .into_iter()
                .map(|(src, local)| Transfer::download(src, local))
                .collect::<Vec<_>>();
            let pb = spinner(format!("downloading {} file(s)", transfers.len()));
            let res = dfs.client_mut().download(transfers);
            pb.finish_and_clear();
            show_report(&res?, "downloaded")?;
        }
        Cmd::Rm { paths } => {
            let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            let pb = spinner(format!("removing {} file(s)", refs.len()));
            let res = dfs.client_mut().remove(&refs);
            pb.finish_and_clear();
            res?;
            for p in &paths {
                report_line(true, format!("removed {}", p));
            }
        }
    }
    Ok(())
}

/// CLI entry point.
///
/// Parses arguments with `clap`, opens the repository and runs the
/// selected subcommand. The working checkout is removed before exit.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dvcfs=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut dfs = open(&cli.repo)?;
    let res = run(cli.cmd, &mut dfs);
    dfs.close()?;
    res
}
