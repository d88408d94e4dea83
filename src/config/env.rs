//! Environment overrides.
//!
//! Applied after the YAML file so deployments can tune the scheduler without
//! shipping a config file. Unparseable values are errors, not silently ignored.

use eyre::{Result, WrapErr};
use std::str::FromStr;

use crate::config::EngineConfig;

/// Override a field from `key` if `lookup` yields a value.
fn set<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *field = raw
            .trim()
            .parse()
            .wrap_err_with(|| format!("invalid value for {}: {:?}", key, raw))?;
        log::debug!("Config override from {}", key);
    }
    Ok(())
}

fn set_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut bool) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *field = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => eyre::bail!("invalid value for {}: {:?}", key, other),
        };
    }
    Ok(())
}

fn set_thresholds(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut Vec<f64>) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *field = raw
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .wrap_err_with(|| format!("invalid value for {}: {:?}", key, raw))?;
    }
    Ok(())
}

impl EngineConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (tests use a map).
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let l = &lookup;

        if let Some(path) = l("CHORUS_DB_PATH") {
            self.storage.db_path = Some(path.into());
        }

        set(l, "AMBIENT_TICK_MS", &mut self.ambient.tick_interval_ms)?;
        set(l, "AMBIENT_TICK_JITTER_MS", &mut self.ambient.tick_jitter_ms)?;
        set(l, "AMBIENT_GLOBAL_BUDGET", &mut self.ambient.global_budget)?;
        set(l, "AMBIENT_MAX_K", &mut self.ambient.max_k)?;
        set(l, "AMBIENT_CHANNEL_LIMIT", &mut self.ambient.channel_limit)?;
        set(l, "HUMAN_SUPPRESSION_MS", &mut self.ambient.human_suppression_ms)?;

        set(l, "MAX_RESPONSES_PER_MESSAGE", &mut self.coordination.max_responses_per_message)?;
        set_bool(l, "STICKY_AFFINITY_EXCLUSIVE", &mut self.coordination.sticky_affinity_exclusive)?;
        set(l, "AFFINITY_TTL_MS", &mut self.coordination.affinity_ttl_ms)?;
        set_bool(l, "TURN_BASED_MODE", &mut self.coordination.turn_based_mode)?;
        set(l, "TURN_COOLDOWN_MS", &mut self.coordination.turn_cooldown_ms)?;
        set_thresholds(l, "FALLBACK_SCORE_THRESHOLDS", &mut self.coordination.fallback_score_thresholds)?;

        set(l, "CHANNEL_COOLDOWN_MS", &mut self.gate.channel_cooldown_ms)?;
        set(l, "BOT_REPLY_COOLDOWN_MS", &mut self.gate.bot_reply_cooldown_ms)?;
        set(l, "MAX_RESPONDERS_PER_TRIGGER", &mut self.gate.max_responders_per_trigger)?;

        set(l, "RESPONSE_LOCK_TTL_MS", &mut self.locks.response_lock_ttl_ms)?;
        set(l, "TURN_LEASE_TTL_MS", &mut self.locks.lease_ttl_ms)?;

        set(l, "JANITOR_INTERVAL_MS", &mut self.janitor.interval_ms)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_no_overrides_keeps_defaults() {
        let mut config = EngineConfig::default();
        config.apply_env_with(lookup(&[])).unwrap();
        assert_eq!(config.ambient.global_budget, 10);
        assert!(!config.coordination.turn_based_mode);
    }

    #[test]
    fn test_numeric_and_bool_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_env_with(lookup(&[
                ("AMBIENT_GLOBAL_BUDGET", "4"),
                ("AMBIENT_MAX_K", " 2 "),
                ("MAX_RESPONSES_PER_MESSAGE", "1"),
                ("RESPONSE_LOCK_TTL_MS", "9000"),
                ("STICKY_AFFINITY_EXCLUSIVE", "yes"),
                ("TURN_BASED_MODE", "1"),
            ]))
            .unwrap();

        assert_eq!(config.ambient.global_budget, 4);
        assert_eq!(config.ambient.max_k, 2);
        assert_eq!(config.coordination.max_responses_per_message, 1);
        assert_eq!(config.locks.response_lock_ttl_ms, 9000);
        assert!(config.coordination.sticky_affinity_exclusive);
        assert!(config.coordination.turn_based_mode);
    }

    #[test]
    fn test_threshold_list_override() {
        let mut config = EngineConfig::default();
        config
            .apply_env_with(lookup(&[("FALLBACK_SCORE_THRESHOLDS", "0.7, 0.4,0.1")]))
            .unwrap();
        assert_eq!(config.coordination.fallback_score_thresholds, vec![0.7, 0.4, 0.1]);
    }

    #[test]
    fn test_db_path_override() {
        let mut config = EngineConfig::default();
        config.apply_env_with(lookup(&[("CHORUS_DB_PATH", "/tmp/x.db")])).unwrap();
        assert_eq!(config.storage.db_path, Some(std::path::PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let mut config = EngineConfig::default();
        assert!(config.apply_env_with(lookup(&[("AMBIENT_MAX_K", "lots")])).is_err());
        assert!(config.apply_env_with(lookup(&[("TURN_BASED_MODE", "maybe")])).is_err());
    }
}
