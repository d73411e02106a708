pub mod apply;
pub mod check;
pub mod daemon;
pub mod diff;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use haconf_core::{state, Config};
use haconf_instance::InstanceOptions;

/// Options from `--config` (or `./haconf.yaml`), with `--state` applied on top.
pub fn load_options(config: Option<&Path>, state: Option<PathBuf>) -> Result<InstanceOptions> {
    let mut options =
        InstanceOptions::load_or_default(config).context("failed to load instance options")?;
    if let Some(state) = state {
        options.state_file = state;
    }
    Ok(options)
}

/// A fresh, unbuilt generation from the desired-state file.
pub fn load_config(options: &InstanceOptions) -> Result<Config> {
    let desired = state::load_state_at(&options.state_file).with_context(|| {
        format!(
            "failed to load desired state from {}",
            options.state_file.display()
        )
    })?;
    Ok(Config::from_state(desired))
}
