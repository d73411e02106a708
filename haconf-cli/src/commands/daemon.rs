//! `haconf daemon` — foreground daemon and its control socket.

use anyhow::{Context, Result};
use clap::Subcommand;

use haconf_daemon::{request_status, request_stop, request_sync, start_blocking, DaemonError};
use haconf_instance::InstanceOptions;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watcher + socket server).
    Start,
    /// Request graceful daemon shutdown over the control socket.
    Stop,
    /// Query daemon runtime status over the control socket.
    Status,
    /// Run one cycle in the daemon now and print its summary.
    Sync,
}

pub fn run(command: DaemonCommand, options: InstanceOptions) -> Result<()> {
    let socket = options.socket_path();

    match command {
        DaemonCommand::Start => {
            start_blocking(options).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&socket) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let status = match request_status(&socket) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket.display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render daemon status JSON")?
            );
        }
        DaemonCommand::Sync => {
            let summary = request_sync(&socket).context("daemon sync failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary)
                    .context("failed to render cycle summary JSON")?
            );
        }
    }

    Ok(())
}
