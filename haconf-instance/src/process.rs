//! Validate and reload subprocesses.

use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::ProcessError;
use crate::options::InstanceOptions;

/// The two blocking steps that touch the running proxy process.
pub trait ProcessControl: Send {
    /// Check the written configuration file.
    fn validate(&mut self) -> Result<(), ProcessError>;
    /// Ask the proxy to pick up the written configuration file.
    fn reload(&mut self) -> Result<(), ProcessError>;
}

/// Runs the configured proxy binary and reload script.
#[derive(Debug, Clone)]
pub struct HaproxyProcess {
    haproxy_cmd: Option<PathBuf>,
    reload_cmd: Option<PathBuf>,
    reload_strategy: String,
    config_file: PathBuf,
}

impl HaproxyProcess {
    pub fn from_options(options: &InstanceOptions) -> Self {
        Self {
            haproxy_cmd: options.haproxy_cmd.clone(),
            reload_cmd: options.reload_cmd.clone(),
            reload_strategy: options.reload_strategy.clone(),
            config_file: options.config_file.clone(),
        }
    }
}

impl ProcessControl for HaproxyProcess {
    fn validate(&mut self) -> Result<(), ProcessError> {
        let Some(cmd) = &self.haproxy_cmd else {
            tracing::info!("(test) check was skipped");
            return Ok(());
        };
        let out = run(
            cmd,
            &[OsStr::new("-c"), OsStr::new("-f"), self.config_file.as_os_str()],
        )?;
        if !out.status.success() {
            return Err(ProcessError::Validation { output: out.output });
        }
        Ok(())
    }

    fn reload(&mut self) -> Result<(), ProcessError> {
        let Some(cmd) = &self.reload_cmd else {
            tracing::info!("(test) reload was skipped");
            return Ok(());
        };
        let out = run(
            cmd,
            &[OsStr::new(&self.reload_strategy), self.config_file.as_os_str()],
        )?;
        if !out.output.is_empty() {
            tracing::warn!("output from haproxy:\n{}", out.output);
        }
        if !out.status.success() {
            return Err(ProcessError::Reload {
                status: out.status.code(),
                output: out.output,
            });
        }
        Ok(())
    }
}

/// Exit status plus stdout and stderr as one stream, in the order written.
struct Finished {
    status: ExitStatus,
    output: String,
}

fn run(cmd: &Path, args: &[&OsStr]) -> Result<Finished, ProcessError> {
    tracing::debug!(command = %cmd.display(), "running");
    let spawn_err = |source| ProcessError::Spawn {
        command: cmd.display().to_string(),
        source,
    };
    let (mut reader, writer) = std::io::pipe().map_err(spawn_err)?;
    let stderr = writer.try_clone().map_err(spawn_err)?;
    // The builder owns both write ends; it is dropped with this statement so
    // the read below sees EOF once the child exits.
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr)
        .spawn()
        .map_err(spawn_err)?;

    let output_err = |source| ProcessError::Output {
        command: cmd.display().to_string(),
        source,
    };
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).map_err(output_err)?;
    let status = child.wait().map_err(output_err)?;
    Ok(Finished {
        status,
        output: String::from_utf8_lossy(&raw).into_owned(),
    })
}
