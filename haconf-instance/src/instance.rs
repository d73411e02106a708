//! The configuration lifecycle: build, compare, patch, write, rotate, then
//! validate or reload.
//!
//! [`Instance`] owns two generations. Callers fill `current` through
//! [`Instance::config`] or [`Instance::replace_config`] and run
//! [`Instance::update`]; every cycle that finds a `current` ends with it moved
//! into `old`, whatever the outcome.

use std::fmt;

use haconf_core::{BuildError, Config};
use haconf_renderer::{RenderError, TemplateWriter};

use crate::dynupdate::{DynUpdate, LiveUpdate, RuntimeUpdater};
use crate::error::ProcessError;
use crate::options::InstanceOptions;
use crate::process::{HaproxyProcess, ProcessControl};
use crate::runtime::{RuntimeChannel, UnixSocketRuntime};
use crate::timer::{Timer, TICK_RELOAD, TICK_VALIDATE, TICK_WRITE};

// ---------------------------------------------------------------------------
// Writer seam
// ---------------------------------------------------------------------------

/// Writes every artifact of one generation.
pub trait ConfigWriter: Send {
    fn parse_templates(&mut self) -> Result<(), RenderError>;
    fn write(&mut self, config: &Config) -> Result<(), RenderError>;
}

impl ConfigWriter for TemplateWriter {
    fn parse_templates(&mut self) -> Result<(), RenderError> {
        TemplateWriter::parse_templates(self)
    }

    fn write(&mut self, config: &Config) -> Result<(), RenderError> {
        let writes = TemplateWriter::write(self, config)?;
        let written = writes.iter().filter(|w| w.is_written()).count();
        tracing::debug!(written, unchanged = writes.len() - written, "artifacts written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    FrontendGroup,
    BackendMaps,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPhase::FrontendGroup => write!(f, "configuration group"),
            BuildPhase::BackendMaps => write!(f, "backend maps"),
        }
    }
}

/// How one cycle ended.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// There was no pending generation.
    Empty,
    BuildFailed { phase: BuildPhase, error: BuildError },
    /// The pending generation equals the previous one.
    Unchanged,
    /// Applied without a reload; `commands == 0` means nothing had to change.
    AppliedLive { commands: usize },
    Reloaded,
    WriteFailed { error: RenderError },
    ReloadFailed { error: ProcessError },
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            UpdateOutcome::Empty
                | UpdateOutcome::Unchanged
                | UpdateOutcome::AppliedLive { .. }
                | UpdateOutcome::Reloaded
        )
    }

    /// Short machine-friendly name.
    pub fn label(&self) -> &'static str {
        match self {
            UpdateOutcome::Empty => "empty",
            UpdateOutcome::BuildFailed { .. } => "build_failed",
            UpdateOutcome::Unchanged => "unchanged",
            UpdateOutcome::AppliedLive { .. } => "applied_live",
            UpdateOutcome::Reloaded => "reloaded",
            UpdateOutcome::WriteFailed { .. } => "write_failed",
            UpdateOutcome::ReloadFailed { .. } => "reload_failed",
        }
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Empty => write!(f, "new configuration is empty"),
            UpdateOutcome::BuildFailed { phase, error } => {
                write!(f, "error building {phase}: {error}")
            }
            UpdateOutcome::Unchanged => write!(f, "old and new configurations match"),
            UpdateOutcome::AppliedLive { commands: 0 } => {
                write!(f, "old and new configurations match")
            }
            UpdateOutcome::AppliedLive { commands } => {
                write!(f, "updated without needing to reload, commands sent: {commands}")
            }
            UpdateOutcome::Reloaded => write!(f, "reloaded"),
            UpdateOutcome::WriteFailed { error } => {
                write!(f, "error writing configuration: {error}")
            }
            UpdateOutcome::ReloadFailed { error } => write!(f, "error reloading server: {error}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

pub struct Instance {
    options: InstanceOptions,
    writer: Box<dyn ConfigWriter>,
    process: Box<dyn ProcessControl>,
    updater: Box<dyn LiveUpdate>,
    old: Option<Config>,
    current: Option<Config>,
}

impl Instance {
    /// Instance wired to the template writer, proxy process and (when
    /// configured) runtime socket described by `options`.
    pub fn new(options: InstanceOptions) -> Self {
        let writer = TemplateWriter::new(options.template_layout());
        let process = HaproxyProcess::from_options(&options);
        let runtime = options
            .runtime_socket
            .as_ref()
            .map(|socket| Box::new(UnixSocketRuntime::new(socket)) as Box<dyn RuntimeChannel>);
        let updater = RuntimeUpdater::new(runtime, options.backend_server_slots_increment);
        Self::with_parts(
            options,
            Box::new(writer),
            Box::new(process),
            Box::new(updater),
        )
    }

    pub fn with_parts(
        options: InstanceOptions,
        writer: Box<dyn ConfigWriter>,
        process: Box<dyn ProcessControl>,
        updater: Box<dyn LiveUpdate>,
    ) -> Self {
        Self {
            options,
            writer,
            process,
            updater,
            old: None,
            current: None,
        }
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.options
    }

    /// (Re)load every template. Must succeed before the first cycle.
    pub fn parse_templates(&mut self) -> Result<(), RenderError> {
        self.writer.parse_templates()
    }

    /// The pending generation, created empty on first use.
    pub fn config(&mut self) -> &mut Config {
        self.current.get_or_insert_with(Config::new)
    }

    /// Install `config` as the pending generation.
    pub fn replace_config(&mut self, config: Config) {
        self.current = Some(config);
    }

    /// The generation of the last cycle.
    pub fn old_config(&self) -> Option<&Config> {
        self.old.as_ref()
    }

    pub fn current_config(&self) -> Option<&Config> {
        self.current.as_ref()
    }

    /// Run one cycle. Failures are logged and reported, never returned as `Err`.
    pub fn update(&mut self, timer: &mut Timer) -> UpdateOutcome {
        let Some(mut current) = self.current.take() else {
            tracing::info!("new configuration is empty");
            return UpdateOutcome::Empty;
        };
        let prepared = self.prepare(&mut current, timer);
        self.old = Some(current);
        match prepared {
            Ok(update) => self.finish(update, timer),
            Err(outcome) => outcome,
        }
    }

    /// Everything up to rotation. `Err` ends the cycle with that outcome.
    fn prepare(
        &mut self,
        current: &mut Config,
        timer: &mut Timer,
    ) -> Result<DynUpdate, UpdateOutcome> {
        if let Err(error) = current.build_frontend_group() {
            tracing::error!("error building configuration group: {error}");
            return Err(UpdateOutcome::BuildFailed {
                phase: BuildPhase::FrontendGroup,
                error,
            });
        }
        if let Err(error) = current.build_backend_maps() {
            tracing::error!("error building backend maps: {error}");
            return Err(UpdateOutcome::BuildFailed {
                phase: BuildPhase::BackendMaps,
                error,
            });
        }
        if let Some(old) = self.old.as_ref().filter(|old| current.equals(Some(*old))) {
            tracing::debug!("old and new configurations match, skipping reload");
            current.adopt_server_layout(old);
            return Err(UpdateOutcome::Unchanged);
        }

        let update = self.updater.update(self.old.as_ref(), current);
        if self.options.sort_backends {
            for backend in current.backends_mut() {
                backend.sort_endpoints();
            }
        }

        if update.needs_write() {
            let written = self.writer.write(current);
            timer.tick(TICK_WRITE);
            if let Err(error) = written {
                tracing::error!("error writing configuration: {error}");
                return Err(UpdateOutcome::WriteFailed { error });
            }
        }
        Ok(update)
    }

    /// Validate or reload after rotation.
    fn finish(&mut self, update: DynUpdate, timer: &mut Timer) -> UpdateOutcome {
        match update {
            DynUpdate::Applied { commands: 0 } => {
                tracing::info!("old and new configurations match");
                UpdateOutcome::AppliedLive { commands: 0 }
            }
            DynUpdate::Applied { commands } => {
                if self.options.validate_config {
                    if let Err(error) = self.process.validate() {
                        tracing::error!("error validating config file:\n{error}");
                    }
                    timer.tick(TICK_VALIDATE);
                }
                tracing::info!("HAProxy updated without needing to reload. Commands sent: {commands}");
                UpdateOutcome::AppliedLive { commands }
            }
            DynUpdate::ReloadRequired { .. } => {
                if let Err(error) = self.process.reload() {
                    tracing::error!("error reloading server:\n{error}");
                    return UpdateOutcome::ReloadFailed { error };
                }
                timer.tick(TICK_RELOAD);
                tracing::info!("HAProxy successfully reloaded");
                UpdateOutcome::Reloaded
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
