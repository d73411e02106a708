//! `haconf diff` — show unified diffs for what `apply` would write.

use anyhow::{Context, Result};

use haconf_instance::{InstanceOptions, LiveUpdate, RuntimeUpdater};
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
    // Same slot padding a first cycle would apply.
    RuntimeUpdater::new(None, options.backend_server_slots_increment).update(None, &mut config);
    if options.sort_backends {
        for backend in config.backends_mut() {
            backend.sort_endpoints();
        }
    }

    let diffs = writer.diff(&config).context("diff failed")?;
    if diffs.is_empty() {
        println!("No differences.");
        return Ok(());
    }

    for diff in diffs {
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
