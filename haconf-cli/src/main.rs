//! haconf — render HAProxy configuration from a desired state and keep the
//! running proxy in step with it.
//!
//! # Usage
//!
//! ```text
//! haconf [--config <FILE>] [--state <FILE>] check
//! haconf [--config <FILE>] [--state <FILE>] apply [--json]
//! haconf [--config <FILE>] [--state <FILE>] diff
//! haconf [--config <FILE>] daemon start|stop|status|sync
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{apply::ApplyArgs, daemon::DaemonCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "haconf",
    version,
    about = "Render HAProxy configuration and decide between live updates and reloads",
    long_about = None,
)]
struct Cli {
    /// Instance options file; defaults to ./haconf.yaml when present.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Desired-state file, overriding `state_file` from the options.
    #[arg(long, global = true, value_name = "FILE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse templates and build the desired state without touching any file.
    Check,

    /// Run one update cycle: write, then reload or patch the running proxy.
    Apply(ApplyArgs),

    /// Show unified diffs of what `apply` would write.
    Diff,

    /// Run or talk to the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let options = commands::load_options(cli.config.as_deref(), cli.state)?;
    match cli.command {
        Commands::Check => commands::check::run(&options),
        Commands::Apply(args) => args.run(options),
        Commands::Diff => commands::diff::run(&options),
        Commands::Daemon { command } => commands::daemon::run(command, options),
    }
}

/// Logs go to stderr so stdout stays parseable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
