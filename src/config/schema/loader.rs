use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    /// Load `~/.mnemo/config.toml`, writing a default file on first run, then
    /// apply environment overrides and validate.
    pub fn load_or_init() -> Result<Self> {
        let defaults = Self::default();
        let config_path = defaults.config_path.clone();
        let mnemo_dir = config_path
            .parent()
            .context("Config path has no parent directory")?
            .to_path_buf();

        if !mnemo_dir.exists() {
            fs::create_dir_all(&mnemo_dir).context("Failed to create .mnemo directory")?;
        }

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            defaults.save()?;
            tracing::info!(path = %config_path.display(), "Wrote default config");
            defaults
        };
        config.workspace_dir = mnemo_dir.join("workspace");

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without touching the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        config.config_path = path.to_path_buf();
        if let Some(parent) = path.parent() {
            config.workspace_dir = parent.join("workspace");
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
