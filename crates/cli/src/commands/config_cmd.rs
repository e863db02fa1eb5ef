//! `aiq config`: configuration management commands.

use aiq_agent::PromptTemplates;
use aiq_config::AppConfig;

/// The config as TOML with the API key masked.
pub fn redacted_toml(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("[REDACTED]".into());
    }
    toml::to_string_pretty(&shown)
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", redacted_toml(&config)?);
    Ok(())
}

pub fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    std::fs::create_dir_all(&config_dir)?;
    if config_path.exists() && !force {
        println!("  Config exists: {} (use --force to overwrite)", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Wrote {}", config_path.display());
    }

    let config = AppConfig::load_from(&config_path)?;
    let skills_dir = config.skills_dir();
    std::fs::create_dir_all(&skills_dir)?;
    println!("  Skills directory: {}", skills_dir.display());

    let prompts_dir = AppConfig::prompts_dir();
    PromptTemplates::load(&prompts_dir)?;
    println!("  Prompt templates: {}", prompts_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn api_key_is_masked() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret-value".into());
        let shown = redacted_toml(&config).unwrap();
        assert!(!shown.contains("sk-secret-value"));
        assert!(shown.contains("[REDACTED]"));
        assert!(shown.contains("max_iterations"));
    }
}
