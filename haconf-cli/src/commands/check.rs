//! `haconf check` — validate templates and the desired state.

use anyhow::{Context, Result};
use colored::Colorize;

use haconf_instance::InstanceOptions;
use haconf_renderer::TemplateWriter;

use super::load_config;

pub fn run(options: &InstanceOptions) -> Result<()> {
    let mut writer = TemplateWriter::new(options.template_layout());
    writer
        .parse_templates()
        .context("failed to parse templates")?;

    let mut config = load_config(options)?;
    config
        .build_frontend_group()
        .context("error building configuration group")?;
    config
        .build_backend_maps()
        .context("error building backend maps")?;
    let artifacts = writer
        .render(&config)
        .context("failed to render configuration")?;

    println!(
        "{} configuration is valid ({} hosts, {} backends, {} files)",
        "✓".green().bold(),
        config.hosts().len(),
        config.backends().len(),
        artifacts.len(),
    );
    Ok(())
}
