use anyhow::{Context, Result};
use loopdeck_infrastructure::ConfigService;

pub fn show(service: &ConfigService) -> Result<()> {
    let path = service.config_path()?;
    let config = service.get_config();
    let rendered = serde_json::to_string_pretty(&config).context("Failed to render config")?;

    println!("# {}", path.display());
    println!("{}", rendered);
    Ok(())
}
