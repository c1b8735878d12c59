//! `hostlink check-config`.

use hostlink_wire::{WireError, WireResult};
use std::path::PathBuf;

pub fn cmd_check_config(config: Option<PathBuf>) -> WireResult<()> {
    let config = super::load(config)?;
    let rendered =
        toml::to_string_pretty(&config).map_err(|e| WireError::Config(e.to_string()))?;
    println!("# configuration is valid\n");
    println!("{rendered}");
    Ok(())
}
