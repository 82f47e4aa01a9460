use crate::limit::Limit;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env, fs, path::Path};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub default_limit: LimitConfig,
    #[serde(default)]
    pub routes: BTreeMap<String, LimitConfig>, // path prefix -> limit
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String, // e.g., "0.0.0.0"
    pub port: u16,         // e.g., 8080
}

/// Rate for one limiter. `rate_per_sec` wins over `interval_ms`; neither => unlimited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(default)]
    pub rate_per_sec: Option<f64>,
    #[serde(default)]
    pub interval_ms: Option<i64>,
    #[serde(default = "default_burst")]
    pub burst: usize,
    #[serde(default)]
    pub max_wait_ms: u64, // 0 => drop instead of queueing
}
fn default_burst() -> usize { 1 }

impl Default for LimitConfig {
    fn default() -> Self {
        Self { rate_per_sec: None, interval_ms: None, burst: default_burst(), max_wait_ms: 0 }
    }
}

impl LimitConfig {
    pub fn limit(&self) -> Limit {
        match (self.rate_per_sec, self.interval_ms) {
            (Some(r), _) => Limit::per_second(r),
            (None, Some(ms)) => Limit::every_millis(ms),
            (None, None) => Limit::Unlimited,
        }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut cfg = Self::from_yaml_str(&content)?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(addr) = env::var("TG_HTTP_ADDR") { cfg.server.bind_addr = addr; }
    if let Ok(port) = env::var("TG_HTTP_PORT") {
        if let Ok(p) = port.parse::<u16>() { cfg.server.port = p; }
    }
    if let Ok(rate) = env::var("TG_DEFAULT_RATE") {
        if let Ok(r) = rate.parse::<f64>() { cfg.default_limit.rate_per_sec = Some(r); }
    }
    if let Ok(burst) = env::var("TG_DEFAULT_BURST") {
        if let Ok(b) = burst.parse::<usize>() { cfg.default_limit.burst = b; }
    }
    if let Ok(ms) = env::var("TG_MAX_WAIT_MS") {
        if let Ok(v) = ms.parse::<u64>() { cfg.default_limit.max_wait_ms = v; }
    }
}
