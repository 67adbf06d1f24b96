use std::env;

use serde::{Deserialize, Serialize};

/// Shared fallback name for the entity identifier when neither plan side names one.
pub const DEFAULT_ENTITY_KEY: &str = "caseid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Load multiple entities on a bounded worker pool.
    pub parallel: bool,
    /// Worker pool size for parallel loads.
    pub max_workers: usize,
    /// Entity count below which loads stay sequential even when `parallel` is set.
    pub parallel_threshold: usize,
    /// Default chunk size for batch iteration.
    pub batch_size: usize,
    pub default_entity_key: String,
    /// Appended to signal-side column names that collide with cohort columns on merge.
    pub merge_suffix: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_workers: std::thread::available_parallelism().map_or(1, usize::from),
            parallel_threshold: 2,
            batch_size: 100,
            default_entity_key: DEFAULT_ENTITY_KEY.to_string(),
            merge_suffix: "_signal".to_string(),
        }
    }
}

impl ContextConfig {
    /// Defaults overlaid with `MEDCTX_*` environment variables.
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<bool>("MEDCTX_PARALLEL") {
            cfg.parallel = v;
        }
        if let Some(v) = env_parse::<usize>("MEDCTX_MAX_WORKERS").filter(|v| *v > 0) {
            cfg.max_workers = v;
        }
        if let Some(v) = env_parse::<usize>("MEDCTX_BATCH_SIZE").filter(|v| *v > 0) {
            cfg.batch_size = v;
        }
        if let Ok(v) = env::var("MEDCTX_DEFAULT_ENTITY_KEY") {
            if !v.trim().is_empty() {
                cfg.default_entity_key = v.trim().to_string();
            }
        }
        cfg
    }

    /// Effective worker count, never zero.
    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = ContextConfig::default();
        assert!(cfg.workers() >= 1);
        assert_eq!(cfg.default_entity_key, DEFAULT_ENTITY_KEY);
        assert_eq!(cfg.batch_size, 100);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ContextConfig =
            serde_json::from_str(r#"{"parallel": false, "batch_size": 7}"#).expect("config");
        assert!(!cfg.parallel);
        assert_eq!(cfg.batch_size, 7);
        assert_eq!(cfg.merge_suffix, "_signal");
    }

    #[test]
    fn zero_workers_still_yields_one() {
        let cfg = ContextConfig {
            max_workers: 0,
            ..ContextConfig::default()
        };
        assert_eq!(cfg.workers(), 1);
    }
}
