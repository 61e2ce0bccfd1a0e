use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use rose_proto::report::BackendKind;
use rose_vision::tracker::TrackingConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: BackendKind,
    /// Connection target of the shared backend, e.g. `redis://cache:6379/0`.
    pub shared_url: String,
    pub session_ttl_secs: u64,
    /// In-memory backend only. 0 disables the background sweep.
    pub sweep_interval_secs: u64,
    pub connect_timeout_ms: u64,
    pub global_cas_retries: u32,

    pub tracking: TrackingConfig,

    /// Number of recent in-frame counts averaged into the displayed count.
    pub smoothing_window: usize,
    /// Minimum time between two refreshes of the displayed count.
    pub count_update_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::InMemory,
            shared_url: "redis://127.0.0.1:6379/0".into(),
            session_ttl_secs: 3600,
            sweep_interval_secs: 60,
            connect_timeout_ms: 5000,
            global_cas_retries: 16,
            tracking: TrackingConfig::default(),
            smoothing_window: 10,
            count_update_interval_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Defaults, then the TOML file (if any), then `ROSE_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let s = std::fs::read_to_string(p).with_context(|| format!("read config {}", p))?;
                toml::from_str(&s).context("parse config toml")?
            }
            None => EngineConfig::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ROSE_BACKEND") {
            self.backend = parse_backend(&v)?;
        }
        if let Some(v) = lookup("ROSE_SHARED_URL") {
            self.shared_url = v;
        }
        set_parsed(&lookup, "ROSE_SESSION_TTL_SECS", &mut self.session_ttl_secs)?;
        set_parsed(&lookup, "ROSE_SWEEP_INTERVAL_SECS", &mut self.sweep_interval_secs)?;
        set_parsed(&lookup, "ROSE_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms)?;
        set_parsed(&lookup, "ROSE_GLOBAL_CAS_RETRIES", &mut self.global_cas_retries)?;
        set_parsed(&lookup, "ROSE_IOU_MATCH_THRESHOLD", &mut self.tracking.iou_match_threshold)?;
        set_parsed(&lookup, "ROSE_INACTIVE_TIMEOUT_FRAMES", &mut self.tracking.inactive_timeout_frames)?;
        set_parsed(&lookup, "ROSE_REMOVAL_TIMEOUT_FRAMES", &mut self.tracking.removal_timeout_frames)?;
        set_parsed(&lookup, "ROSE_MIN_CONFIDENCE", &mut self.tracking.min_confidence)?;
        set_parsed(&lookup, "ROSE_SMOOTHING_WINDOW", &mut self.smoothing_window)?;
        set_parsed(&lookup, "ROSE_COUNT_UPDATE_INTERVAL_MS", &mut self.count_update_interval_ms)?;
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_backend(v: &str) -> Result<BackendKind> {
    match v.trim().to_ascii_lowercase().as_str() {
        "in-memory" | "memory" => Ok(BackendKind::InMemory),
        "shared" | "redis" => Ok(BackendKind::Shared),
        other => anyhow::bail!("unknown ROSE_BACKEND: {}", other),
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = lookup(key) {
        *slot = v.trim().parse().map_err(|e| anyhow::anyhow!("{}={:?}: {}", key, v, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        crate::doctor::check_config(&cfg).unwrap();
        assert_eq!(cfg.backend, BackendKind::InMemory);
        assert_eq!(cfg.session_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg: EngineConfig = toml::from_str(
            r#"
            backend = "in-memory"
            session_ttl_secs = 120

            [tracking]
            iou_match_threshold = 0.6
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tracking.iou_match_threshold, 0.6);
        // unspecified tracking fields keep their defaults
        assert_eq!(cfg.tracking.min_confidence, 0.4);

        cfg.apply_env(env(&[
            ("ROSE_BACKEND", "shared"),
            ("ROSE_SHARED_URL", "redis://cache:6379/1"),
            ("ROSE_SESSION_TTL_SECS", "30"),
            ("ROSE_MIN_CONFIDENCE", "0.25"),
            ("ROSE_SMOOTHING_WINDOW", "4"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::Shared);
        assert_eq!(cfg.shared_url, "redis://cache:6379/1");
        assert_eq!(cfg.session_ttl_secs, 30);
        assert_eq!(cfg.tracking.min_confidence, 0.25);
        assert_eq!(cfg.tracking.iou_match_threshold, 0.6);
        assert_eq!(cfg.smoothing_window, 4);
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut cfg = EngineConfig::default();
        let err = cfg.apply_env(env(&[("ROSE_REMOVAL_TIMEOUT_FRAMES", "soon")])).unwrap_err();
        assert!(err.to_string().contains("ROSE_REMOVAL_TIMEOUT_FRAMES"));
        assert!(cfg.apply_env(env(&[("ROSE_BACKEND", "etcd")])).is_err());
    }

    #[test]
    fn zero_sweep_interval_disables_sweeper() {
        let mut cfg = EngineConfig::default();
        cfg.sweep_interval_secs = 0;
        assert!(cfg.sweep_interval().is_none());
    }
}
