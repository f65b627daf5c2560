//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::info;

/// Create the storage layout and write a default config
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let config = Config::with_base_dir(base_dir.unwrap_or_else(Config::default_base_dir));

    // Check if already initialized
    if config.is_initialized() && !force {
        return Err(Error::AlreadyInitialized(
            config.paths.base_dir.display().to_string(),
        ));
    }

    config.validate()?;

    for dir in [
        &config.paths.base_dir,
        &config.paths.attachments_dir,
        &config.paths.assets_dir,
    ] {
        tokio::fs::create_dir_all(dir).await?;
    }

    config.save()?;
    info!("Created config at {:?}", config.paths.config_file);

    Ok(config)
}

pub fn print_init(config: &Config) {
    println!("✓ Initialized keepsake at {:?}", config.paths.base_dir);
    println!("\nConfiguration: {:?}", config.paths.config_file);
    println!("Index: {:?}", config.paths.index_file);
    println!("Attachments: {:?}", config.paths.attachments_dir);
    println!("\nNext steps:");
    println!("  keepsake create --owner me --title \"First day of school\" --image photo.jpg");
    println!("  keepsake list");
}
