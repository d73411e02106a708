//! `haconf apply` — one cycle from a fresh instance.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;

use haconf_instance::{Instance, InstanceOptions, Timer};

use super::load_config;

/// Arguments for `haconf apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Emit the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ApplyArgs {
    pub fn run(self, options: InstanceOptions) -> Result<()> {
        let config = load_config(&options)?;
        let mut instance = Instance::new(options);
        instance
            .parse_templates()
            .context("failed to parse templates")?;
        instance.replace_config(config);

        let mut timer = Timer::new();
        let outcome = instance.update(&mut timer);

        if self.json {
            let payload = json!({
                "outcome": outcome.label(),
                "message": outcome.to_string(),
                "success": outcome.is_success(),
                "timings": timer.ticks(),
                "total_ms": timer.total().as_millis(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to render outcome JSON")?
            );
        } else {
            let mark = if outcome.is_success() {
                "✓".green().bold()
            } else {
                "✗".red().bold()
            };
            println!("{mark} {outcome}");
            if !timer.ticks().is_empty() {
                println!("  {timer}");
            }
        }

        if !outcome.is_success() {
            bail!("update cycle failed: {}", outcome.label());
        }
        Ok(())
    }
}
