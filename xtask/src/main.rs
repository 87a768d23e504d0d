//! Build automation tasks for the rust-mysql-driver workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for rust-mysql-driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, lints, and tests in one pass
    Ci,
    /// Check formatting (`cargo fmt --check`)
    Fmt {
        /// Rewrite files instead of checking
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy over all targets and features
    Clippy,
    /// Run the test suite
    Test {
        /// Only run tests matching this filter
        filter: Option<String>,
    },
    /// Build API documentation
    Doc {
        /// Open the docs in a browser when done
        #[arg(long)]
        open: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            cmd!(sh, "cargo fmt --all --check").run()?;
            clippy(&sh)?;
            test(&sh, None)?;
            println!("all checks passed");
        }
        Command::Fmt { fix } => {
            if fix {
                cmd!(sh, "cargo fmt --all").run()?;
            } else {
                cmd!(sh, "cargo fmt --all --check").run()?;
            }
        }
        Command::Clippy => clippy(&sh)?,
        Command::Test { filter } => test(&sh, filter.as_deref())?,
        Command::Doc { open } => {
            if open {
                cmd!(sh, "cargo doc --workspace --all-features --no-deps --open").run()?;
            } else {
                cmd!(sh, "cargo doc --workspace --all-features --no-deps").run()?;
            }
        }
    }

    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    cmd!(
        sh,
        "cargo clippy --workspace --all-targets --all-features -- -D warnings"
    )
    .run()?;
    Ok(())
}

fn test(sh: &Shell, filter: Option<&str>) -> Result<()> {
    match filter {
        Some(filter) => cmd!(sh, "cargo test --workspace --all-features {filter}").run()?,
        None => cmd!(sh, "cargo test --workspace --all-features").run()?,
    }
    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(Path::to_path_buf)
        .context("xtask must live one level below the workspace root")
}
