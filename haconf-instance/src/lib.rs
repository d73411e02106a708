//! # haconf-instance
//!
//! The configuration lifecycle of one proxy instance. An [`Instance`] owns the
//! previous and pending generations and, on each [`Instance::update`], decides
//! between a live update over the runtime socket and a full reload.
//!
//! ```rust,no_run
//! use haconf_core::{state, Config};
//! use haconf_instance::{Instance, InstanceOptions, Timer};
//!
//! fn cycle() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = InstanceOptions::load_or_default(None)?;
//!     let desired = state::load_state_at(&options.state_file)?;
//!     let mut instance = Instance::new(options);
//!     instance.parse_templates()?;
//!     instance.replace_config(Config::from_state(desired));
//!     let mut timer = Timer::new();
//!     println!("{}", instance.update(&mut timer));
//!     Ok(())
//! }
//! ```

pub mod dynupdate;
pub mod error;
pub mod instance;
pub mod options;
pub mod process;
pub mod runtime;
pub mod timer;

pub use dynupdate::{DynUpdate, DynUpdater, LiveUpdate, RuntimeUpdater};
pub use error::{OptionsError, ProcessError, RuntimeError};
pub use instance::{BuildPhase, ConfigWriter, Instance, UpdateOutcome};
pub use options::{InstanceOptions, TemplatePaths};
pub use process::{HaproxyProcess, ProcessControl};
pub use runtime::{RuntimeChannel, UnixSocketRuntime};
pub use timer::{Tick, Timer};
