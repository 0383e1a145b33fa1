//! `chatbox config` — Print the effective configuration.

use chatbox_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
