//! Engine configuration.
//!
//! Loaded from YAML with the usual fallback chain, then overridden from the
//! environment (see [`env`]). Every field has a default so an empty file is
//! a valid configuration.

mod env;
mod sections;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use sections::{AmbientConfig, CoordinationConfig, GateConfig, JanitorConfig, LockConfig, StorageConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub ambient: AmbientConfig,
    pub coordination: CoordinationConfig,
    pub gate: GateConfig,
    pub locks: LockConfig,
    pub janitor: JanitorConfig,
}

impl EngineConfig {
    /// Load configuration with fallback chain:
    /// 1. Explicit path if provided
    /// 2. ~/.config/chorus/chorus.yml
    /// 3. ./chorus.yml
    /// 4. Default values
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load, apply environment overrides, and validate.
    pub fn resolve(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load(config_path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Database path, falling back to the platform data directory.
    pub fn db_path(&self) -> PathBuf {
        self.storage.db_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(env!("CARGO_PKG_NAME"))
                .join(format!("{}.db", env!("CARGO_PKG_NAME")))
        })
    }

    /// Reject values that would make the scheduler misbehave rather than just
    /// behave differently.
    pub fn validate(&self) -> Result<()> {
        if self.ambient.tick_interval_ms == 0 {
            eyre::bail!("ambient.tick_interval_ms must be positive");
        }
        if self.ambient.tick_jitter_ms >= self.ambient.tick_interval_ms {
            eyre::bail!(
                "ambient.tick_jitter_ms ({}) must be smaller than tick_interval_ms ({})",
                self.ambient.tick_jitter_ms,
                self.ambient.tick_interval_ms
            );
        }
        if self.ambient.humans_per_slot == 0 {
            eyre::bail!("ambient.humans_per_slot must be positive");
        }
        if self.coordination.max_responses_per_message == 0 {
            eyre::bail!("coordination.max_responses_per_message must be at least 1");
        }
        if self.coordination.speaker_cache_size == 0 {
            eyre::bail!("coordination.speaker_cache_size must be at least 1");
        }
        if let Some(bad) = self
            .coordination
            .fallback_score_thresholds
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            eyre::bail!("coordination.fallback_score_thresholds entry {} is outside [0, 1]", bad);
        }
        if self.locks.response_lock_ttl_ms <= 0 || self.locks.lease_ttl_ms <= 0 {
            eyre::bail!("locks TTLs must be positive");
        }
        if self.gate.max_responders_per_trigger == 0 {
            eyre::bail!("gate.max_responders_per_trigger must be at least 1");
        }
        if self.janitor.interval_ms == 0 {
            eyre::bail!("janitor.interval_ms must be positive");
        }
        Ok(())
    }
}
